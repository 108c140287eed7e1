//! Per-peer reliable delivery for control packets.
//!
//! Each peer keeps two independent counters for the control direction
//! (`f0`): the next outbound sequence number and the highest inbound one.
//! Outbound packets are retained until the matching ack arrives and are
//! retransmitted on a doubling timer. Inbound duplicates are re-acked but
//! never re-applied; gaps are accepted and the skipped counters are lost,
//! which is the behaviour original clients are built for.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const RETRANSMIT_INITIAL: Duration = Duration::from_millis(200);
pub const RETRANSMIT_CAP: Duration = Duration::from_secs(2);
/// Resends before the peer is declared dead.
pub const MAX_TRIES: u32 = 10;
/// Unacked age before the peer is declared dead.
pub const GIVE_UP_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct PendingPacket {
    counter: u32,
    bytes: Vec<u8>,
    first_sent: Instant,
    next_resend: Instant,
    interval: Duration,
    tries: u32,
}

/// Where an inbound counter lands relative to what we have already applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Not seen before; apply it. Gaps are accepted (see module docs).
    New,
    /// Already applied; re-ack only.
    Duplicate,
}

#[derive(Debug)]
pub struct PeerLink {
    f0_s_counter: u32,
    f0_r_counter: u32,
    pending: VecDeque<PendingPacket>,
}

impl PeerLink {
    /// `first_inbound` is the counter of the packet that created the
    /// session (the LOGIN), which is already being applied.
    pub fn new(first_inbound: u32) -> Self {
        Self { f0_s_counter: 1, f0_r_counter: first_inbound, pending: VecDeque::new() }
    }

    pub fn send_counter(&self) -> u32 {
        self.f0_s_counter
    }

    pub fn recv_counter(&self) -> u32 {
        self.f0_r_counter
    }

    /// Claim the next outbound counter.
    pub fn next_counter(&mut self) -> u32 {
        let counter = self.f0_s_counter;
        self.f0_s_counter += 1;
        counter
    }

    /// Retain a sealed packet until its ack arrives.
    pub fn retain(&mut self, counter: u32, bytes: Vec<u8>, now: Instant) {
        self.pending.push_back(PendingPacket {
            counter,
            bytes,
            first_sent: now,
            next_resend: now + RETRANSMIT_INITIAL,
            interval: RETRANSMIT_INITIAL,
            tries: 0,
        });
    }

    /// Drop the retained packet for `counter`. Returns whether anything
    /// was actually pending (a stray ack is not an error, just noise).
    pub fn acknowledge(&mut self, counter: u32) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.counter != counter);
        self.pending.len() != before
    }

    pub fn classify_inbound(&mut self, counter: u32) -> Inbound {
        if counter <= self.f0_r_counter {
            return Inbound::Duplicate;
        }
        self.f0_r_counter = counter;
        Inbound::New
    }

    /// Packets whose resend timer has fired. Each call backs the timer off
    /// (doubling, capped) and counts a try.
    pub fn due_retransmits(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        for p in &mut self.pending {
            if p.next_resend <= now {
                p.tries += 1;
                p.interval = (p.interval * 2).min(RETRANSMIT_CAP);
                p.next_resend = now + p.interval;
                due.push(p.bytes.clone());
            }
        }
        due
    }

    /// Whether retransmission has been given up on: some packet has burned
    /// all its tries or has been pending for too long.
    pub fn is_dead(&self, now: Instant) -> bool {
        self.pending
            .iter()
            .any(|p| p.tries >= MAX_TRIES || now.duration_since(p.first_sent) >= GIVE_UP_AFTER)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
