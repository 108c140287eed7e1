//! Frame dispatch and session lifecycle.
//!
//! The engine is sans-io: the socket driver feeds it datagrams and clock
//! ticks, and it queues outgoing datagrams in an [`Outbox`]. Handlers run
//! synchronously against the single owned [`ServerState`]; a broadcast
//! triggered by one command is queued for every peer before the next
//! command is looked at, which gives the causal ordering the protocol
//! promises.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use palaver_protocol::command::{DisconnectNotice, LeaveReason};
use palaver_protocol::header::{self, Frame, Header};
use palaver_protocol::{ChannelFlags, CommandCode};

use crate::broadcast::{self, Outbox};
use crate::config::ServerConfig;
use crate::error::ControlError;
use crate::privilege::{PrivilegeEngine, PrivilegePolicy};
use crate::reliability::Inbound;
use crate::state::{Channel, PublicId, Registration, ServerState};
use crate::store::RegistrationStore;

/// Clients ping every 10 s; sessions silent for longer than this are
/// reaped.
pub const PING_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Engine {
    pub(crate) state: ServerState,
    pub(crate) store: Box<dyn RegistrationStore>,
    pub(crate) privileges: PrivilegeEngine,
    pub(crate) config: ServerConfig,
    pub(crate) outbox: Outbox,
}

impl Engine {
    /// Load the store snapshot into a fresh domain model. A server with no
    /// persisted channels gets a DEFAULT channel bootstrapped (and
    /// persisted) so logins have somewhere to land.
    pub fn new(
        config: ServerConfig,
        mut store: Box<dyn RegistrationStore>,
    ) -> anyhow::Result<Self> {
        let snapshot = store.load_all().map_err(anyhow::Error::from)?;
        let mut state = ServerState::new();
        for row in &snapshot.channels {
            state.add_channel(Channel::from_row(row));
        }
        for row in &snapshot.registrations {
            state.insert_registration(Registration {
                id: row.id,
                name: row.name.clone(),
                password: Zeroizing::new(row.password.clone()),
                server_admin: row.server_admin,
            });
        }

        let privileges = PrivilegeEngine::new(PrivilegePolicy {
            allow_guest_channels: config.allow_guest_channels,
        });
        let mut engine = Self { state, store, privileges, config, outbox: Outbox::new() };

        if engine.state.default_channel_id().is_none() {
            engine.bootstrap_default_channel()?;
        }
        info!(
            channels = engine.state.channel_count(),
            registrations = snapshot.registrations.len(),
            "domain model loaded"
        );
        Ok(engine)
    }

    fn bootstrap_default_channel(&mut self) -> anyhow::Result<()> {
        let id = self.state.alloc_channel_id();
        let channel = Channel {
            id,
            parent_id: 0,
            name: self.config.default_channel_name.clone(),
            topic: String::new(),
            description: String::new(),
            password: Zeroizing::new(String::new()),
            max_users: 0,
            sort_order: 0,
            flags: ChannelFlags::DEFAULT,
            members: Default::default(),
            privileges: Default::default(),
        };
        self.store.register_channel(&channel.row()).map_err(anyhow::Error::from)?;
        info!(id, name = %channel.name, "bootstrapped default channel");
        self.state.add_channel(channel);
        Ok(())
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn drain_outbox(&mut self) -> Vec<(Vec<u8>, SocketAddr)> {
        self.outbox.drain()
    }

    /// Entry point for one received datagram.
    pub fn handle_datagram(&mut self, datagram: &[u8], addr: SocketAddr, now: Instant) {
        match header::parse_frame(datagram) {
            Err(e) => debug!(%addr, error = %e, "dropping datagram"),
            Ok(Frame::Voice) => {} // data plane, not ours
            Ok(Frame::Ack { header, acked }) => {
                match self.state.player_by_private_mut(header.private_id) {
                    Some(player) => {
                        if !player.link.acknowledge(acked) {
                            debug!(public_id = player.public_id, acked, "stray ack");
                        }
                    }
                    None => debug!(%addr, acked, "ack without a session"),
                }
            }
            Ok(Frame::Control { header, command, payload }) => {
                self.dispatch(header, command, payload, addr, now);
            }
        }
    }

    fn dispatch(
        &mut self,
        header: Header,
        command: CommandCode,
        payload: &[u8],
        addr: SocketAddr,
        now: Instant,
    ) {
        // LOGIN is the only command accepted without a session
        if command == CommandCode::Login {
            self.handle_login(&header, payload, addr, now);
            return;
        }

        let (public_id, private_id, disposition) = {
            let Some(player) = self.state.player_by_private_mut(header.private_id) else {
                debug!(%addr, ?command, "command without a session, dropping");
                return;
            };
            if player.public_id as u32 != header.public_id {
                debug!(%addr, ?command, "public id mismatch, dropping");
                return;
            }
            (player.public_id, player.private_id, player.link.classify_inbound(header.counter))
        };

        // the reliability obligation comes before any semantic reply
        self.outbox.push(header::ack_packet(private_id, public_id, header.counter), addr);
        if disposition == Inbound::Duplicate {
            debug!(public_id, counter = header.counter, "duplicate control packet, re-acked");
            return;
        }

        let result = match command {
            CommandCode::Login => unreachable!("handled above"),
            CommandCode::Ping => self.handle_ping(public_id, now),
            CommandCode::Disconnect => self.handle_disconnect(public_id, now),
            CommandCode::ChannelList => self.handle_channel_list(public_id, now),
            CommandCode::PlayerList => self.handle_player_list(public_id, now),
            CommandCode::SwitchChannel => self.handle_switch_channel(public_id, payload, now),
            CommandCode::CreateChannel => self.handle_create_channel(public_id, payload, now),
            CommandCode::ChannelInfo => self.handle_channel_info(public_id, payload, now),
            CommandCode::ChanDelete => {
                self.handle_channel_delete(public_id, header.counter, payload, now)
            }
            CommandCode::ChannelPrivilege => {
                self.handle_channel_privilege(public_id, payload, now)
            }
            CommandCode::ServerPrivilege => self.handle_server_privilege(public_id, payload, now),
            CommandCode::PlayerStatus => self.handle_player_status(public_id, payload, now),
            CommandCode::KickServer => self.handle_kick_server(public_id, payload, now),
            CommandCode::KickChannel => self.handle_kick_channel(public_id, payload, now),
            CommandCode::MessagePlayer => self.handle_message_player(public_id, payload, now),
            CommandCode::MessageChannel => self.handle_message_channel(public_id, payload, now),
            CommandCode::MessageServer => self.handle_message_server(public_id, payload, now),
            CommandCode::Pong
            | CommandCode::LoginOk
            | CommandCode::LoginFail
            | CommandCode::ChanDeleteError => {
                debug!(public_id, ?command, "server-to-client code received, ignoring");
                Ok(())
            }
        };

        // nothing propagates past this point; every failure is a log line
        // (the ack is already out, so the client will not retry)
        if let Err(e) = result {
            match &e {
                ControlError::Denied(_) => warn!(public_id, ?command, %e, "command refused"),
                ControlError::Store(_) => warn!(public_id, ?command, %e, "command failed"),
                ControlError::Unknown(_)
                | ControlError::Precondition(_)
                | ControlError::Protocol(_) => {
                    debug!(public_id, ?command, %e, "command dropped")
                }
            }
        }
    }

    /// Timer path: reap silent sessions, give up on dead peers, retransmit
    /// what is due.
    pub fn tick(&mut self, now: Instant) {
        let timed_out: Vec<PublicId> = self
            .state
            .player_ids_sorted()
            .into_iter()
            .filter(|id| {
                self.state
                    .player(*id)
                    .map(|p| now.duration_since(p.last_ping) > PING_TIMEOUT)
                    .unwrap_or(false)
            })
            .collect();
        for public_id in timed_out {
            info!(public_id, "no ping for too long, reaping session");
            self.destroy_session(public_id, LeaveReason::PingTimeout, now);
        }

        let dead: Vec<PublicId> = self
            .state
            .player_ids_sorted()
            .into_iter()
            .filter(|id| self.state.player(*id).map(|p| p.link.is_dead(now)).unwrap_or(false))
            .collect();
        for public_id in dead {
            info!(public_id, "retransmission given up, destroying session");
            self.destroy_session(public_id, LeaveReason::ConnectionLost, now);
        }

        for public_id in self.state.player_ids_sorted() {
            let Some(player) = self.state.player_mut(public_id) else {
                continue;
            };
            let addr = player.remote_addr;
            let due = player.link.due_retransmits(now);
            for bytes in due {
                self.outbox.push(bytes, addr);
            }
        }
    }

    /// Remove a session and tell the survivors.
    pub(crate) fn destroy_session(
        &mut self,
        public_id: PublicId,
        reason: LeaveReason,
        now: Instant,
    ) {
        let Some(player) = self.state.remove_player(public_id) else {
            return;
        };
        info!(public_id, nickname = %player.nickname, ?reason, "session destroyed");
        let notice = DisconnectNotice { public_id, reason };
        let template = header::control_template(CommandCode::Disconnect, &notice.encode());
        broadcast::broadcast(&mut self.state, &mut self.outbox, &template, now);
    }

    // ── handler plumbing ──────────────────────────────────────────────

    pub(crate) fn send_notice(
        &mut self,
        public_id: PublicId,
        code: CommandCode,
        payload: &[u8],
        now: Instant,
    ) {
        let template = header::control_template(code, payload);
        broadcast::send_reliable(&mut self.state, &mut self.outbox, public_id, &template, now);
    }

    pub(crate) fn broadcast_notice(&mut self, code: CommandCode, payload: &[u8], now: Instant) {
        let template = header::control_template(code, payload);
        broadcast::broadcast(&mut self.state, &mut self.outbox, &template, now);
    }

    pub(crate) fn broadcast_channel_notice(
        &mut self,
        channel_id: u32,
        code: CommandCode,
        payload: &[u8],
        now: Instant,
    ) {
        let template = header::control_template(code, payload);
        broadcast::broadcast_channel(&mut self.state, &mut self.outbox, channel_id, &template, now);
    }
}

/// Shared harness for the engine and handler tests: builds engines over a
/// seeded [`MemoryStore`], crafts client datagrams and picks apart what
/// the engine queued in reply.
#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::store::{
        ChannelRow, MemoryStore, RegistrationRow, StoreError, StoreSnapshot,
    };
    use palaver_protocol::command::LoginRequest;
    use palaver_protocol::header::{control_template, parse_frame, personalize};
    use std::sync::{Arc, Mutex, MutexGuard};

    pub(crate) fn test_config() -> ServerConfig {
        ServerConfig { welcome_message: "welcome!".into(), ..ServerConfig::default() }
    }

    pub(crate) fn seeded_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.seed_registration(RegistrationRow {
            id: 1,
            name: "alice".into(),
            password: "pw".into(),
            server_admin: true,
        });
        store
    }

    /// A handle-keeping wrapper so a test can look inside the store the
    /// engine owns (and inject failures into it).
    #[derive(Clone)]
    pub(crate) struct SharedStore(Arc<Mutex<MemoryStore>>);

    impl SharedStore {
        pub(crate) fn lock(&self) -> MutexGuard<'_, MemoryStore> {
            self.0.lock().unwrap()
        }
    }

    impl RegistrationStore for SharedStore {
        fn load_all(&mut self) -> Result<StoreSnapshot, StoreError> {
            self.lock().load_all()
        }
        fn register_channel(&mut self, row: &ChannelRow) -> Result<(), StoreError> {
            self.lock().register_channel(row)
        }
        fn update_channel(&mut self, row: &ChannelRow) -> Result<(), StoreError> {
            self.lock().update_channel(row)
        }
        fn unregister_channel(&mut self, id: u32) -> Result<(), StoreError> {
            self.lock().unregister_channel(id)
        }
        fn register_player(&mut self, row: &RegistrationRow) -> Result<(), StoreError> {
            self.lock().register_player(row)
        }
        fn update_player(&mut self, row: &RegistrationRow) -> Result<(), StoreError> {
            self.lock().update_player(row)
        }
        fn unregister_player(&mut self, id: u32) -> Result<(), StoreError> {
            self.lock().unregister_player(id)
        }
    }

    pub(crate) fn test_engine() -> Engine {
        Engine::new(test_config(), Box::new(seeded_store())).unwrap()
    }

    pub(crate) fn test_engine_with_store() -> (Engine, SharedStore) {
        let store = SharedStore(Arc::new(Mutex::new(seeded_store())));
        let engine = Engine::new(test_config(), Box::new(store.clone())).unwrap();
        (engine, store)
    }

    pub(crate) fn addr(n: u16) -> SocketAddr {
        format!("127.0.0.1:{}", 40000 + n).parse().unwrap()
    }

    /// A sealed client request, addressed with the player's own ids as the
    /// protocol requires.
    pub(crate) fn request(
        private_id: u32,
        public_id: u16,
        counter: u32,
        code: CommandCode,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut pkt = control_template(code, payload);
        personalize(&mut pkt, private_id, public_id, counter);
        pkt
    }

    pub(crate) fn login_datagram(nickname: &str, login: &str, password: &str, counter: u32) -> Vec<u8> {
        let req = LoginRequest {
            client_version: "2.0".into(),
            login_name: login.into(),
            login_password: password.into(),
            nickname: nickname.into(),
            server_password: String::new(),
        };
        request(0, 0, counter, CommandCode::Login, &req.encode())
    }

    /// What one drain of the outbox contained, parsed.
    pub(crate) enum Sent {
        Ack { acked: u32, to: SocketAddr },
        Control { code: CommandCode, counter: u32, public_id: u16, payload: Vec<u8>, to: SocketAddr },
    }

    pub(crate) fn drain_sent(engine: &mut Engine) -> Vec<Sent> {
        engine
            .drain_outbox()
            .into_iter()
            .map(|(bytes, to)| match parse_frame(&bytes).expect("engine emits valid packets") {
                Frame::Ack { acked, .. } => Sent::Ack { acked, to },
                Frame::Control { header, command, payload } => Sent::Control {
                    code: command,
                    counter: header.counter,
                    public_id: header.public_id as u16,
                    payload: payload.to_vec(),
                    to,
                },
                Frame::Voice => panic!("engine never emits voice"),
            })
            .collect()
    }

    pub(crate) fn controls_of(sent: &[Sent], code: CommandCode) -> Vec<(u16, Vec<u8>)> {
        sent.iter()
            .filter_map(|s| match s {
                Sent::Control { code: c, public_id, payload, .. } if *c == code => {
                    Some((*public_id, payload.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub(crate) fn ack_count(sent: &[Sent]) -> usize {
        sent.iter().filter(|s| matches!(s, Sent::Ack { .. })).count()
    }

    /// Ack, on behalf of one client, every control packet addressed to it
    /// in `sent`, the way a healthy client does continuously.
    pub(crate) fn ack_controls(
        engine: &mut Engine,
        private_id: u32,
        public_id: u16,
        from: SocketAddr,
        sent: &[Sent],
        now: Instant,
    ) {
        for s in sent {
            if let Sent::Control { counter, public_id: to, .. } = s {
                if *to == public_id {
                    let ack = header::ack_packet(private_id, public_id, *counter);
                    engine.handle_datagram(&ack, from, now);
                }
            }
        }
    }

    /// Run a login end to end and hand back the assigned ids.
    pub(crate) fn login(
        engine: &mut Engine,
        nickname: &str,
        login_name: &str,
        password: &str,
        at: SocketAddr,
        now: Instant,
    ) -> (u16, u32) {
        engine.handle_datagram(&login_datagram(nickname, login_name, password, 1), at, now);
        let player = engine
            .state()
            .player_by_addr(at)
            .unwrap_or_else(|| panic!("login of {nickname} failed"));
        (player.public_id, player.private_id)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    // dispatch-level behaviour; the handler semantics live in handlers.rs

    #[test]
    fn malformed_datagram_is_dropped_silently() {
        let mut engine = test_engine();
        let now = Instant::now();
        engine.handle_datagram(&[0xde, 0xad], addr(1), now);
        engine.handle_datagram(&[0u8; 600], addr(1), now);
        assert!(engine.drain_outbox().is_empty());
        assert_eq!(engine.state().player_count(), 0);
    }

    #[test]
    fn corrupted_crc_is_dropped() {
        let mut engine = test_engine();
        let now = Instant::now();
        let mut dgram = login_datagram("Eve", "", "", 1);
        dgram[26] ^= 0xff;
        engine.handle_datagram(&dgram, addr(1), now);
        assert!(engine.drain_outbox().is_empty());
        assert_eq!(engine.state().player_count(), 0);
    }

    #[test]
    fn commands_before_login_are_dropped() {
        let mut engine = test_engine();
        let now = Instant::now();
        let dgram = request(0xbad, 0xbad, 1, CommandCode::Ping, &[]);
        engine.handle_datagram(&dgram, addr(1), now);
        assert!(engine.drain_outbox().is_empty());
    }

    #[test]
    fn wrong_public_id_is_dropped() {
        let mut engine = test_engine();
        let now = Instant::now();
        let (public, private) = login(&mut engine, "Alice", "alice", "pw", addr(1), now);
        engine.drain_outbox();

        let dgram = request(private, public + 1, 2, CommandCode::Ping, &[]);
        engine.handle_datagram(&dgram, addr(1), now);
        assert!(engine.drain_outbox().is_empty());
    }

    #[test]
    fn duplicate_packet_yields_only_one_more_ack() {
        let mut engine = test_engine();
        let now = Instant::now();
        let (public, private) = login(&mut engine, "Alice", "alice", "pw", addr(1), now);
        engine.drain_outbox();

        let ping = request(private, public, 2, CommandCode::Ping, &[]);
        engine.handle_datagram(&ping, addr(1), now);
        let first = drain_sent(&mut engine);
        assert_eq!(ack_count(&first), 1);
        assert_eq!(controls_of(&first, CommandCode::Pong).len(), 1);

        // same counter again: re-acked, not re-applied
        engine.handle_datagram(&ping, addr(1), now);
        let second = drain_sent(&mut engine);
        assert_eq!(ack_count(&second), 1);
        assert!(controls_of(&second, CommandCode::Pong).is_empty());
    }

    #[test]
    fn ack_clears_retransmission() {
        let mut engine = test_engine();
        let t0 = Instant::now();
        let (public, private) = login(&mut engine, "Alice", "alice", "pw", addr(1), t0);
        let pending_before = engine.state().player(public).unwrap().link.pending_len();
        assert!(pending_before > 0);

        // ack everything the login sent
        for counter in 1..=pending_before as u32 {
            let ack = header::ack_packet(private, public, counter);
            engine.handle_datagram(&ack, addr(1), t0);
        }
        assert_eq!(engine.state().player(public).unwrap().link.pending_len(), 0);

        // nothing left to retransmit, ever
        engine.drain_outbox();
        engine.tick(t0 + Duration::from_secs(10));
        assert!(engine.drain_outbox().is_empty());
    }

    #[test]
    fn unacked_packets_are_retransmitted() {
        let mut engine = test_engine();
        let t0 = Instant::now();
        login(&mut engine, "Alice", "alice", "pw", addr(1), t0);
        engine.drain_outbox();

        engine.tick(t0 + Duration::from_millis(250));
        let resent = engine.drain_outbox();
        assert!(!resent.is_empty());
    }

    #[test]
    fn dead_link_destroys_session_and_tells_survivors() {
        let mut engine = test_engine();
        let t0 = Instant::now();
        let (alice, alice_private) = login(&mut engine, "Alice", "alice", "pw", addr(1), t0);
        let sent = drain_sent(&mut engine);
        ack_controls(&mut engine, alice_private, alice, addr(1), &sent, t0);
        let (bob, _) = login(&mut engine, "Bob", "", "", addr(2), t0);
        let sent = drain_sent(&mut engine);
        ack_controls(&mut engine, alice_private, alice, addr(1), &sent, t0);

        // bob acks nothing; alice stays healthy and keeps pinging
        let mut at = t0;
        let mut seen = Vec::new();
        for _ in 0..12 {
            at += Duration::from_secs(2);
            if let Some(p) = engine.state.player_mut(alice) {
                p.last_ping = at;
            }
            engine.tick(at);
            let sent = drain_sent(&mut engine);
            ack_controls(&mut engine, alice_private, alice, addr(1), &sent, at);
            seen.extend(sent);
        }

        assert!(engine.state().player(bob).is_none());
        assert!(engine.state().player(alice).is_some());
        let disconnects = controls_of(&seen, CommandCode::Disconnect);
        assert!(!disconnects.is_empty());
        let notice = DisconnectNotice::decode(&disconnects[0].1).unwrap();
        assert_eq!(notice.public_id, bob);
        assert_eq!(notice.reason, LeaveReason::ConnectionLost);
    }

    #[test]
    fn session_reaped_after_ping_silence() {
        let mut engine = test_engine();
        let t0 = Instant::now();
        let (alice, alice_private) = login(&mut engine, "Alice", "alice", "pw", addr(1), t0);
        let sent = drain_sent(&mut engine);
        ack_controls(&mut engine, alice_private, alice, addr(1), &sent, t0);
        let (bob, bob_private) = login(&mut engine, "Bob", "", "", addr(2), t0);
        let sent = drain_sent(&mut engine);
        ack_controls(&mut engine, alice_private, alice, addr(1), &sent, t0);
        ack_controls(&mut engine, bob_private, bob, addr(2), &sent, t0);

        // both clients ack everything, but only alice keeps pinging;
        // bob's last sign of life stays at t0
        let mut at = t0;
        let mut counter = 1;
        let mut seen = Vec::new();
        for _ in 0..7 {
            at += Duration::from_secs(10);
            counter += 1;
            let ping = request(alice_private, alice, counter, CommandCode::Ping, &[]);
            engine.handle_datagram(&ping, addr(1), at);
            engine.tick(at);
            let sent = drain_sent(&mut engine);
            ack_controls(&mut engine, alice_private, alice, addr(1), &sent, at);
            ack_controls(&mut engine, bob_private, bob, addr(2), &sent, at);
            seen.extend(sent);
        }

        // bob is gone, his membership went with him, survivors were told
        assert!(engine.state().player(bob).is_none());
        assert_eq!(engine.state().player_count(), 1);
        let default = engine.state().default_channel_id().unwrap();
        assert!(!engine.state().channel(default).unwrap().members.contains(&bob));
        let disconnects = controls_of(&seen, CommandCode::Disconnect);
        assert!(!disconnects.is_empty());
        let notice = DisconnectNotice::decode(&disconnects[0].1).unwrap();
        assert_eq!(notice.public_id, bob);
        assert_eq!(notice.reason, LeaveReason::PingTimeout);
    }
}
