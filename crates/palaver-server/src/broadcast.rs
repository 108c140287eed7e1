//! Template-then-personalise notification fan-out.
//!
//! One event, one allocation: the payload is built once with the header's
//! recipient words and CRC left zero, then for each recipient three words
//! are rewritten, the CRC is respliced, and the sealed copy goes to the
//! reliability layer. This is the hot path for every state change the
//! server announces.

use std::net::SocketAddr;
use std::time::Instant;

use palaver_protocol::header;

use crate::state::{ChannelId, PublicId, ServerState};

/// Outgoing datagrams queued by the engine, flushed by the socket driver.
#[derive(Default)]
pub struct Outbox {
    queue: Vec<(Vec<u8>, SocketAddr)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: Vec<u8>, addr: SocketAddr) {
        self.queue.push((bytes, addr));
    }

    pub fn drain(&mut self) -> Vec<(Vec<u8>, SocketAddr)> {
        std::mem::take(&mut self.queue)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Seal one copy of `template` for a single player and hand it to the
/// reliability layer (retained until acked, retransmitted on a timer).
pub fn send_reliable(
    state: &mut ServerState,
    outbox: &mut Outbox,
    public_id: PublicId,
    template: &[u8],
    now: Instant,
) {
    let Some(player) = state.player_mut(public_id) else {
        return;
    };
    let counter = player.link.next_counter();
    let mut packet = template.to_vec();
    header::personalize(&mut packet, player.private_id, player.public_id, counter);
    player.link.retain(counter, packet.clone(), now);
    outbox.push(packet, player.remote_addr);
}

/// Fan a notification out to every connected player.
pub fn broadcast(state: &mut ServerState, outbox: &mut Outbox, template: &[u8], now: Instant) {
    for public_id in state.player_ids_sorted() {
        send_reliable(state, outbox, public_id, template, now);
    }
}

/// Fan a notification out to the members of one channel.
pub fn broadcast_channel(
    state: &mut ServerState,
    outbox: &mut Outbox,
    channel_id: ChannelId,
    template: &[u8],
    now: Instant,
) {
    let Some(channel) = state.channel(channel_id) else {
        return;
    };
    let mut members: Vec<_> = channel.members.iter().copied().collect();
    members.sort_unstable();
    for public_id in members {
        send_reliable(state, outbox, public_id, template, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::PeerLink;
    use crate::state::{Channel, Player};
    use palaver_protocol::command::{DisconnectNotice, LeaveReason};
    use palaver_protocol::header::{control_template, parse_frame, Frame};
    use palaver_protocol::{ChannelFlags, CommandCode, GlobalFlags, PlayerAttributes};
    use std::collections::{HashMap, HashSet};
    use zeroize::Zeroizing;

    fn state_with_players(n: u16) -> ServerState {
        let mut state = ServerState::new();
        state.add_channel(Channel {
            id: 1,
            parent_id: 0,
            name: "lobby".into(),
            topic: String::new(),
            description: String::new(),
            password: Zeroizing::new(String::new()),
            max_users: 0,
            sort_order: 0,
            flags: ChannelFlags::DEFAULT,
            members: HashSet::new(),
            privileges: HashMap::new(),
        });
        for i in 1..=n {
            let public_id = state.alloc_public_id();
            state.insert_player(Player {
                public_id,
                private_id: 0x1000 + i as u32,
                nickname: format!("p{i}"),
                in_channel: 1,
                remote_addr: format!("127.0.0.1:{}", 9000 + i).parse().unwrap(),
                last_ping: Instant::now(),
                attributes: PlayerAttributes::empty(),
                global_flags: GlobalFlags::empty(),
                registration: None,
                login_name: String::new(),
                login_password: Zeroizing::new(String::new()),
                link: PeerLink::new(1),
            });
        }
        state
    }

    fn notice_template() -> Vec<u8> {
        let notice = DisconnectNotice { public_id: 9, reason: LeaveReason::Quit };
        control_template(CommandCode::Disconnect, &notice.encode())
    }

    #[test]
    fn every_player_gets_a_personalised_copy() {
        let mut state = state_with_players(3);
        let mut outbox = Outbox::new();
        broadcast(&mut state, &mut outbox, &notice_template(), Instant::now());

        let sent = outbox.drain();
        assert_eq!(sent.len(), 3);
        for (bytes, addr) in &sent {
            let Frame::Control { header, command, payload } = parse_frame(bytes).unwrap() else {
                panic!("expected control frame");
            };
            assert_eq!(command, CommandCode::Disconnect);
            // the copy is addressed to its recipient
            let player = state.player(header.public_id as u16).unwrap();
            assert_eq!(player.private_id, header.private_id);
            assert_eq!(player.remote_addr, *addr);
            // the shared payload is untouched
            let decoded = DisconnectNotice::decode(payload).unwrap();
            assert_eq!(decoded.public_id, 9);
        }
    }

    #[test]
    fn counters_strictly_increase_across_broadcasts() {
        let mut state = state_with_players(2);
        let mut outbox = Outbox::new();
        let now = Instant::now();

        broadcast(&mut state, &mut outbox, &notice_template(), now);
        broadcast(&mut state, &mut outbox, &notice_template(), now);
        broadcast(&mut state, &mut outbox, &notice_template(), now);

        let mut seen: HashMap<u16, Vec<u32>> = HashMap::new();
        for (bytes, _) in outbox.drain() {
            let Frame::Control { header, .. } = parse_frame(&bytes).unwrap() else {
                panic!("expected control frame");
            };
            seen.entry(header.public_id as u16).or_default().push(header.counter);
        }
        assert_eq!(seen.len(), 2);
        for counters in seen.values() {
            assert_eq!(counters, &vec![1, 2, 3]);
        }
    }

    #[test]
    fn sent_copies_are_retained_for_retransmission() {
        let mut state = state_with_players(1);
        let mut outbox = Outbox::new();
        broadcast(&mut state, &mut outbox, &notice_template(), Instant::now());
        assert_eq!(state.player(1).unwrap().link.pending_len(), 1);
    }

    #[test]
    fn channel_broadcast_reaches_members_only() {
        let mut state = state_with_players(3);
        state.add_channel(Channel {
            id: 2,
            parent_id: 0,
            name: "side".into(),
            topic: String::new(),
            description: String::new(),
            password: Zeroizing::new(String::new()),
            max_users: 0,
            sort_order: 0,
            flags: ChannelFlags::UNREGISTERED,
            members: HashSet::new(),
            privileges: HashMap::new(),
        });
        state.move_player(2, 2).unwrap();

        let mut outbox = Outbox::new();
        broadcast_channel(&mut state, &mut outbox, 2, &notice_template(), Instant::now());

        let sent = outbox.drain();
        assert_eq!(sent.len(), 1);
        let Frame::Control { header, .. } = parse_frame(&sent[0].0).unwrap() else {
            panic!("expected control frame");
        };
        assert_eq!(header.public_id, 2);
    }

    #[test]
    fn vanished_recipient_is_skipped() {
        let mut state = state_with_players(1);
        let mut outbox = Outbox::new();
        send_reliable(&mut state, &mut outbox, 42, &notice_template(), Instant::now());
        assert!(outbox.is_empty());
    }
}
