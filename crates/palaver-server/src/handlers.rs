//! One handler per command code.
//!
//! Every handler follows the same shape: the dispatcher has already parsed
//! the header, acked the packet and ruled out duplicates; the handler
//! decodes its payload, resolves the referenced entities, asks the
//! privilege engine, mutates the model (persisting registered entities
//! around the mutation), and broadcasts the change.

use std::net::SocketAddr;
use std::time::Instant;

use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use palaver_protocol::command::{
    encode_channel_list, encode_player_list, ChangeChannelInfoRequest, ChannelCreatedNotice,
    ChannelDeleteError, ChannelDeleteRequest, ChannelDeletedNotice, ChannelInfoNotice,
    ChannelKickNotice, ChannelMessageRequest, CreateChannelRequest, KickRequest, LeaveReason,
    LoginFail, LoginOk, LoginRequest, MessageNotice, PlayerMessageRequest, PrivilegeAction,
    PrivilegeChangeNotice, PrivilegeChangeRequest, ServerKickNotice, ServerMessageRequest,
    StatusChangeNotice, StatusChangeRequest, SwitchChannelNotice, SwitchChannelRequest,
};
use palaver_protocol::header::{self, Header};
use palaver_protocol::{ChannelFlags, ChannelPrivileges, CommandCode, GlobalFlags};

use crate::engine::Engine;
use crate::error::{ControlError, ControlResult};
use crate::privilege::{channel_right_ops, global_flag_ops, PrivilegeOp};
use crate::reliability::PeerLink;
use crate::state::{Channel, ChannelId, Player, PrivilegeSubject, PublicId, Registration};
use crate::store::RegistrationRow;

/// Constant-time credential comparison; the protocol is cleartext but we
/// do not have to be a timing oracle about it.
fn credential_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

impl Engine {
    // ── session establishment ─────────────────────────────────────────

    pub(crate) fn handle_login(
        &mut self,
        header: &Header,
        payload: &[u8],
        addr: SocketAddr,
        now: Instant,
    ) {
        // a retransmitted LOGIN from a live session means our LOGIN_OK got
        // lost; re-ack and let the retransmit path carry the rest
        if let Some(player) = self.state.player_by_addr(addr) {
            if header.counter <= player.link.recv_counter() {
                let ack = header::ack_packet(player.private_id, player.public_id, header.counter);
                self.outbox.push(ack, addr);
            } else {
                debug!(%addr, "second login from a live session, dropping");
            }
            return;
        }

        let request = match LoginRequest::decode(payload) {
            Ok(r) => r,
            Err(e) => {
                debug!(%addr, error = %e, "malformed login, dropping");
                return;
            }
        };

        if let Some(expected) = &self.config.server_password {
            if !credential_eq(&request.server_password, expected) {
                self.refuse_login(addr, header.counter, "bad server password");
                return;
            }
        }

        if self.state.player_count() >= self.config.max_users as usize {
            self.refuse_login(addr, header.counter, "server is full");
            return;
        }

        let nickname = request.nickname.trim().to_owned();
        if nickname.is_empty() {
            self.refuse_login(addr, header.counter, "empty nickname");
            return;
        }
        if self.state.is_nickname_taken(&nickname) {
            self.refuse_login(addr, header.counter, "nickname already in use");
            return;
        }

        // an offered login name must match a registration; an empty one
        // is an anonymous session
        let mut global_flags = GlobalFlags::empty();
        let mut registration = None;
        if !request.login_name.is_empty() {
            match self.state.registration_by_name(&request.login_name) {
                Some(reg) if credential_eq(&request.login_password, &reg.password) => {
                    global_flags |= GlobalFlags::REGISTERED;
                    if reg.server_admin {
                        global_flags |= GlobalFlags::SERVER_ADMIN;
                    }
                    registration = Some(reg.id);
                }
                _ => {
                    self.refuse_login(addr, header.counter, "bad login credentials");
                    return;
                }
            }
        }

        let Some(default_channel) = self.state.default_channel_id() else {
            warn!("no default channel, cannot accept logins");
            return;
        };

        let public_id = self.state.alloc_public_id();
        let mut private_id = rand::random::<u32>();
        while private_id == 0 || self.state.player_by_private(private_id).is_some() {
            private_id = rand::random();
        }

        self.state.insert_player(Player {
            public_id,
            private_id,
            nickname: nickname.clone(),
            in_channel: default_channel,
            remote_addr: addr,
            last_ping: now,
            attributes: Default::default(),
            global_flags,
            registration,
            login_name: request.login_name,
            login_password: Zeroizing::new(request.login_password),
            link: PeerLink::new(header.counter),
        });
        self.apply_auto_rights(default_channel, public_id);

        info!(public_id, nickname = %nickname, %addr, registered = registration.is_some(), "player logged in");

        // ack first, then LOGIN_OK, then the full snapshots, then tell the
        // rest of the server
        self.outbox.push(header::ack_packet(private_id, public_id, header.counter), addr);

        let ok = LoginOk {
            private_id,
            public_id,
            default_channel,
            welcome: self.config.welcome_message.clone(),
        };
        self.send_notice(public_id, CommandCode::LoginOk, &ok.encode(), now);

        for chunk in encode_channel_list(&self.state.channel_records()) {
            self.send_notice(public_id, CommandCode::ChannelList, &chunk, now);
        }
        for chunk in encode_player_list(&self.state.player_records()) {
            self.send_notice(public_id, CommandCode::PlayerList, &chunk, now);
        }

        let privileges = self.privileges_in(default_channel, public_id);
        let joined = SwitchChannelNotice { public_id, from: 0, to: default_channel, privileges };
        self.broadcast_notice(CommandCode::SwitchChannel, &joined.encode(), now);
    }

    /// Refusals are answered once with zeroed ids; there is no session to
    /// retry from.
    fn refuse_login(&mut self, addr: SocketAddr, counter: u32, reason: &str) {
        warn!(%addr, reason, "login refused");
        self.outbox.push(header::ack_packet(0, 0, counter), addr);
        let payload = LoginFail { reason: reason.into() }.encode();
        let mut packet = header::control_template(CommandCode::LoginFail, &payload);
        header::personalize(&mut packet, 0, 0, 0);
        self.outbox.push(packet, addr);
    }

    // ── keepalive and teardown ────────────────────────────────────────

    pub(crate) fn handle_ping(&mut self, public_id: PublicId, now: Instant) -> ControlResult<()> {
        let player = self.state.player_mut(public_id).ok_or(ControlError::Unknown("player"))?;
        player.last_ping = now;
        self.send_notice(public_id, CommandCode::Pong, &[], now);
        Ok(())
    }

    pub(crate) fn handle_disconnect(
        &mut self,
        public_id: PublicId,
        now: Instant,
    ) -> ControlResult<()> {
        self.destroy_session(public_id, LeaveReason::Quit, now);
        Ok(())
    }

    // ── snapshots ─────────────────────────────────────────────────────

    pub(crate) fn handle_channel_list(
        &mut self,
        public_id: PublicId,
        now: Instant,
    ) -> ControlResult<()> {
        for chunk in encode_channel_list(&self.state.channel_records()) {
            self.send_notice(public_id, CommandCode::ChannelList, &chunk, now);
        }
        Ok(())
    }

    pub(crate) fn handle_player_list(
        &mut self,
        public_id: PublicId,
        now: Instant,
    ) -> ControlResult<()> {
        for chunk in encode_player_list(&self.state.player_records()) {
            self.send_notice(public_id, CommandCode::PlayerList, &chunk, now);
        }
        Ok(())
    }

    // ── channel membership ────────────────────────────────────────────

    pub(crate) fn handle_switch_channel(
        &mut self,
        public_id: PublicId,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = SwitchChannelRequest::decode(payload)?;
        {
            let target =
                self.state.channel(request.target).ok_or(ControlError::Unknown("channel"))?;
            let actor = self.state.player(public_id).ok_or(ControlError::Unknown("player"))?;
            if actor.in_channel == request.target {
                return Err(ControlError::Precondition("already in that channel"));
            }
            // joining needs one of: no password on the channel, the
            // privilege to walk past it, or the password itself
            let allowed = !target.has_password()
                || self.privileges.may(actor, PrivilegeOp::JoinWithoutPassword, Some(target))
                || credential_eq(&request.password, &target.password);
            if !allowed {
                return Err(ControlError::Denied("channel password"));
            }
        }

        let from = self.state.move_player(public_id, request.target)?;
        self.apply_auto_rights(request.target, public_id);
        let privileges = self.privileges_in(request.target, public_id);
        info!(public_id, from, to = request.target, "player switched channel");

        let notice =
            SwitchChannelNotice { public_id, from, to: request.target, privileges };
        self.broadcast_notice(CommandCode::SwitchChannel, &notice.encode(), now);
        Ok(())
    }

    // ── channel lifecycle ─────────────────────────────────────────────

    pub(crate) fn handle_create_channel(
        &mut self,
        public_id: PublicId,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = CreateChannelRequest::decode(payload)?;

        let mut flags = request.record.flags
            & (ChannelFlags::UNREGISTERED
                | ChannelFlags::MODERATED
                | ChannelFlags::SUBCHANNELS
                | ChannelFlags::DEFAULT);
        if request.password.is_empty() {
            flags -= ChannelFlags::PASSWORD;
        } else {
            flags |= ChannelFlags::PASSWORD;
        }

        let name = request.record.name.trim().to_owned();
        if name.is_empty() {
            return Err(ControlError::Precondition("empty channel name"));
        }

        // one op per requested flag; a single missing one aborts
        let mut required = vec![if flags.contains(ChannelFlags::UNREGISTERED) {
            PrivilegeOp::CreateUnregistered
        } else {
            PrivilegeOp::CreateRegistered
        }];
        if flags.contains(ChannelFlags::DEFAULT) {
            required.push(PrivilegeOp::CreateDefault);
        }
        if flags.contains(ChannelFlags::MODERATED) {
            required.push(PrivilegeOp::CreateModerated);
        }
        if flags.contains(ChannelFlags::SUBCHANNELS) {
            required.push(PrivilegeOp::CreateSubchanneled);
        }
        {
            let actor = self.state.player(public_id).ok_or(ControlError::Unknown("player"))?;
            for op in required {
                if !self.privileges.may(actor, op, None) {
                    return Err(ControlError::Denied("channel creation"));
                }
            }
        }

        if flags.contains(ChannelFlags::DEFAULT) && self.state.default_channel_id().is_some() {
            return Err(ControlError::Precondition("a default channel already exists"));
        }

        let parent_id = request.record.parent_id;
        if parent_id != 0 {
            let parent =
                self.state.channel(parent_id).ok_or(ControlError::Unknown("parent channel"))?;
            // a registered parent forces the child registered
            if parent.is_registered() {
                flags -= ChannelFlags::UNREGISTERED;
            }
        }
        if self.state.sibling_name_taken(parent_id, &name) {
            return Err(ControlError::Precondition("channel name taken"));
        }

        let id = self.state.alloc_channel_id();
        let channel = Channel {
            id,
            parent_id,
            name,
            topic: request.record.topic,
            description: request.record.description,
            password: Zeroizing::new(request.password),
            max_users: request.record.max_users,
            sort_order: request.record.sort_order,
            flags,
            members: Default::default(),
            privileges: Default::default(),
        };
        if channel.is_registered() {
            self.store.register_channel(&channel.row())?;
        }
        let record = channel.record();
        info!(id, name = %record.name, creator = public_id, registered = channel.is_registered(), "channel created");
        self.state.add_channel(channel);

        let notice = ChannelCreatedNotice { creator: public_id, record };
        self.broadcast_notice(CommandCode::CreateChannel, &notice.encode(), now);
        Ok(())
    }

    pub(crate) fn handle_channel_info(
        &mut self,
        public_id: PublicId,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = ChangeChannelInfoRequest::decode(payload)?;
        let id = request.record.id;

        let name = request.record.name.trim().to_owned();
        if name.is_empty() {
            return Err(ControlError::Precondition("empty channel name"));
        }

        let (new_flags, was_registered) = {
            let channel = self.state.channel(id).ok_or(ControlError::Unknown("channel"))?;
            let actor = self.state.player(public_id).ok_or(ControlError::Unknown("player"))?;
            if !self.privileges.may(actor, PrivilegeOp::EditChannel, Some(channel)) {
                return Err(ControlError::Denied("channel edit"));
            }
            // UNREGISTERED and DEFAULT are lifecycle flags, not editable
            let editable = ChannelFlags::MODERATED | ChannelFlags::SUBCHANNELS;
            let mut flags =
                (channel.flags - editable - ChannelFlags::PASSWORD) | (request.record.flags & editable);
            if !request.password.is_empty() {
                flags |= ChannelFlags::PASSWORD;
            }
            (flags, channel.is_registered())
        };

        if was_registered {
            let mut row = self.state.channel(id).expect("checked above").row();
            row.name = name.clone();
            row.topic = request.record.topic.clone();
            row.description = request.record.description.clone();
            row.flags = new_flags.bits();
            row.max_users = request.record.max_users;
            row.sort_order = request.record.sort_order;
            row.password = request.password.clone();
            self.store.update_channel(&row)?;
        }

        let channel = self.state.channel_mut(id).expect("checked above");
        channel.name = name;
        channel.topic = request.record.topic;
        channel.description = request.record.description;
        channel.max_users = request.record.max_users;
        channel.sort_order = request.record.sort_order;
        channel.flags = new_flags;
        channel.password = Zeroizing::new(request.password);
        let record = channel.record();
        info!(id, name = %record.name, actor = public_id, "channel info changed");

        let notice = ChannelInfoNotice { actor: public_id, record };
        self.broadcast_notice(CommandCode::ChannelInfo, &notice.encode(), now);
        Ok(())
    }

    pub(crate) fn handle_channel_delete(
        &mut self,
        public_id: PublicId,
        request_counter: u32,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = ChannelDeleteRequest::decode(payload)?;

        let (blocked, was_registered) = {
            let channel =
                self.state.channel(request.id).ok_or(ControlError::Unknown("channel"))?;
            let actor = self.state.player(public_id).ok_or(ControlError::Unknown("player"))?;
            if !self.privileges.may(actor, PrivilegeOp::DeleteChannel, Some(channel)) {
                return Err(ControlError::Denied("channel delete"));
            }
            (
                !channel.members.is_empty()
                    || channel.is_default()
                    || self.state.has_subchannels(request.id),
                channel.is_registered(),
            )
        };

        if blocked {
            let error = ChannelDeleteError { request_counter };
            self.send_notice(public_id, CommandCode::ChanDeleteError, &error.encode(), now);
            return Err(ControlError::Precondition("channel not deletable"));
        }

        if was_registered {
            if let Err(e) = self.store.unregister_channel(request.id) {
                let error = ChannelDeleteError { request_counter };
                self.send_notice(public_id, CommandCode::ChanDeleteError, &error.encode(), now);
                return Err(e.into());
            }
        }

        let removed = self.state.remove_channel(request.id).expect("checked above");
        info!(id = removed.id, name = %removed.name, actor = public_id, "channel deleted");

        let notice = ChannelDeletedNotice { id: removed.id as u16 };
        self.broadcast_notice(CommandCode::ChanDelete, &notice.encode(), now);
        Ok(())
    }

    // ── privileges ────────────────────────────────────────────────────

    pub(crate) fn handle_channel_privilege(
        &mut self,
        public_id: PublicId,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = PrivilegeChangeRequest::decode(payload)?;

        let bit = 1u16.checked_shl(request.right as u32).unwrap_or(0);
        let right = ChannelPrivileges::from_bits(bit).unwrap_or_default();
        let (grant_op, revoke_op) =
            channel_right_ops(right).ok_or(ControlError::Unknown("channel right"))?;
        let op = match request.action {
            PrivilegeAction::Grant => grant_op,
            PrivilegeAction::Revoke => revoke_op,
        };

        let (channel_id, subject) = {
            let target =
                self.state.player(request.target).ok_or(ControlError::Unknown("player"))?;
            (target.in_channel, target.subject())
        };
        {
            let actor = self.state.player(public_id).ok_or(ControlError::Unknown("player"))?;
            if !self.privileges.may(actor, op, self.state.channel(channel_id)) {
                return Err(ControlError::Denied("channel privilege change"));
            }
        }

        // mutate, then persist; a store refusal rolls the bits back
        let before = self
            .state
            .channel(channel_id)
            .ok_or(ControlError::Unknown("channel"))?
            .privileges_for(subject);
        let grant = request.action == PrivilegeAction::Grant;
        self.state.set_channel_privilege(channel_id, subject, right, grant)?;

        let durable = matches!(subject, PrivilegeSubject::Registration(_))
            && self.state.channel(channel_id).map(|c| c.is_registered()).unwrap_or(false);
        if durable {
            let row = self.state.channel(channel_id).expect("checked above").row();
            if let Err(e) = self.store.update_channel(&row) {
                let channel = self.state.channel_mut(channel_id).expect("checked above");
                if before.is_empty() {
                    channel.privileges.remove(&subject);
                } else {
                    channel.privileges.insert(subject, before);
                }
                return Err(e.into());
            }
        }

        info!(
            target = request.target,
            actor = public_id,
            right = request.right,
            grant,
            "channel privilege changed"
        );
        let notice = PrivilegeChangeNotice {
            target: request.target,
            action: request.action,
            right: request.right,
            actor: public_id,
        };
        self.broadcast_notice(CommandCode::ChannelPrivilege, &notice.encode(), now);
        Ok(())
    }

    pub(crate) fn handle_server_privilege(
        &mut self,
        public_id: PublicId,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = PrivilegeChangeRequest::decode(payload)?;

        let bit = 1u8.checked_shl(request.right as u32).unwrap_or(0);
        let flag = GlobalFlags::from_bits(bit).unwrap_or_default();
        let (grant_op, revoke_op) =
            global_flag_ops(flag).ok_or(ControlError::Unknown("global flag"))?;
        let op = match request.action {
            PrivilegeAction::Grant => grant_op,
            PrivilegeAction::Revoke => revoke_op,
        };

        let target_channel = self
            .state
            .player(request.target)
            .ok_or(ControlError::Unknown("player"))?
            .in_channel;
        {
            let actor = self.state.player(public_id).ok_or(ControlError::Unknown("player"))?;
            // self-registration is exactly that
            if op == PrivilegeOp::SelfRegister
                && !actor.is_server_admin()
                && actor.public_id != request.target
            {
                return Err(ControlError::Denied("can only register oneself"));
            }
            if !self.privileges.may(actor, op, self.state.channel(target_channel)) {
                return Err(ControlError::Denied("server privilege change"));
            }
        }

        let grant = request.action == PrivilegeAction::Grant;
        if flag == GlobalFlags::REGISTERED {
            if grant {
                self.grant_registration(request.target)?;
            } else {
                self.revoke_registration(request.target)?;
            }
        } else {
            // admin status is part of the persisted identity
            if flag == GlobalFlags::SERVER_ADMIN {
                let reg = self
                    .state
                    .player(request.target)
                    .and_then(|p| p.registration)
                    .and_then(|id| self.state.registration(id));
                if let Some(reg) = reg {
                    let mut row = reg.row();
                    row.server_admin = grant;
                    self.store.update_player(&row)?;
                    let reg_id = row.id;
                    if let Some(reg) = self.state.registration_mut(reg_id) {
                        reg.server_admin = grant;
                    }
                }
            }
            let target = self
                .state
                .player_mut(request.target)
                .ok_or(ControlError::Unknown("player"))?;
            if grant {
                target.global_flags |= flag;
            } else {
                target.global_flags -= flag;
            }
        }

        info!(
            target = request.target,
            actor = public_id,
            right = request.right,
            grant,
            "global flags changed"
        );
        let notice = PrivilegeChangeNotice {
            target: request.target,
            action: request.action,
            right: request.right,
            actor: public_id,
        };
        self.broadcast_notice(CommandCode::ServerPrivilege, &notice.encode(), now);
        Ok(())
    }

    /// Persist a new registration from the credentials the player logged
    /// in with, then attach it.
    fn grant_registration(&mut self, public_id: PublicId) -> ControlResult<()> {
        let (name, password, server_admin) = {
            let target = self.state.player(public_id).ok_or(ControlError::Unknown("player"))?;
            if target.registration.is_some() {
                // identity already exists, only the flag was missing
                let target = self.state.player_mut(public_id).expect("checked above");
                target.global_flags |= GlobalFlags::REGISTERED;
                return Ok(());
            }
            let name = if target.login_name.is_empty() {
                target.nickname.clone()
            } else {
                target.login_name.clone()
            };
            (name, target.login_password.to_string(), target.is_server_admin())
        };
        if self.state.registration_by_name(&name).is_some() {
            return Err(ControlError::Precondition("name already registered"));
        }

        let id = self.state.alloc_registration_id();
        let row = RegistrationRow { id, name: name.clone(), password: password.clone(), server_admin };
        self.store.register_player(&row)?;
        self.state.insert_registration(Registration {
            id,
            name,
            password: Zeroizing::new(password),
            server_admin,
        });
        let target = self.state.player_mut(public_id).expect("checked above");
        target.registration = Some(id);
        target.global_flags |= GlobalFlags::REGISTERED;
        Ok(())
    }

    /// Delete the persisted identity and rebind its channel privileges to
    /// the live session for the remainder of it.
    fn revoke_registration(&mut self, public_id: PublicId) -> ControlResult<()> {
        let reg_id = self
            .state
            .player(public_id)
            .ok_or(ControlError::Unknown("player"))?
            .registration
            .ok_or(ControlError::Precondition("not registered"))?;
        self.store.unregister_player(reg_id)?;
        self.state.rebind_registration_privileges(reg_id, public_id);
        self.state.remove_registration(reg_id);
        let target = self.state.player_mut(public_id).expect("checked above");
        target.registration = None;
        target.global_flags -= GlobalFlags::REGISTERED;
        Ok(())
    }

    // ── player status ─────────────────────────────────────────────────

    pub(crate) fn handle_player_status(
        &mut self,
        public_id: PublicId,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = StatusChangeRequest::decode(payload)?;
        // the target is always the sender
        let player = self.state.player_mut(public_id).ok_or(ControlError::Unknown("player"))?;
        player.attributes = request.attributes;

        let notice = StatusChangeNotice { public_id, attributes: request.attributes };
        self.broadcast_notice(CommandCode::PlayerStatus, &notice.encode(), now);
        Ok(())
    }

    // ── kicks ─────────────────────────────────────────────────────────

    pub(crate) fn handle_kick_server(
        &mut self,
        public_id: PublicId,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = KickRequest::decode(payload)?;
        if self.state.player(request.target).is_none() {
            return Err(ControlError::Unknown("player"));
        }
        {
            let actor = self.state.player(public_id).ok_or(ControlError::Unknown("player"))?;
            if !self.privileges.may(actor, PrivilegeOp::KickFromServer, None) {
                return Err(ControlError::Denied("server kick"));
            }
        }

        // the victim is still connected here, so the broadcast doubles as
        // its terminal notification (sent once; the session dies with its
        // retransmit queue)
        let notice =
            ServerKickNotice { target: request.target, kicker: public_id, reason: request.reason };
        self.broadcast_notice(CommandCode::KickServer, &notice.encode(), now);

        if let Some(victim) = self.state.remove_player(request.target) {
            info!(target = request.target, nickname = %victim.nickname, kicker = public_id, "player kicked from server");
        }
        Ok(())
    }

    pub(crate) fn handle_kick_channel(
        &mut self,
        public_id: PublicId,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = KickRequest::decode(payload)?;
        let target_channel = self
            .state
            .player(request.target)
            .ok_or(ControlError::Unknown("player"))?
            .in_channel;
        let default_channel =
            self.state.default_channel_id().ok_or(ControlError::Unknown("default channel"))?;
        if target_channel == default_channel {
            return Err(ControlError::Precondition("already in the default channel"));
        }
        {
            let actor = self.state.player(public_id).ok_or(ControlError::Unknown("player"))?;
            if !self.privileges.may(
                actor,
                PrivilegeOp::KickFromChannel,
                self.state.channel(target_channel),
            ) {
                return Err(ControlError::Denied("channel kick"));
            }
        }

        self.state.move_player(request.target, default_channel)?;
        info!(target = request.target, kicker = public_id, from = target_channel, "player kicked from channel");

        let notice = ChannelKickNotice {
            target: request.target,
            kicker: public_id,
            to_channel: default_channel,
            reason: request.reason,
        };
        self.broadcast_notice(CommandCode::KickChannel, &notice.encode(), now);
        Ok(())
    }

    // ── text messages (pure fan-out, no state change) ─────────────────

    pub(crate) fn handle_message_player(
        &mut self,
        public_id: PublicId,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = PlayerMessageRequest::decode(payload)?;
        if self.state.player(request.target).is_none() {
            return Err(ControlError::Unknown("player"));
        }
        let notice = MessageNotice { sender: public_id, text: request.text };
        self.send_notice(request.target, CommandCode::MessagePlayer, &notice.encode(), now);
        Ok(())
    }

    pub(crate) fn handle_message_channel(
        &mut self,
        public_id: PublicId,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = ChannelMessageRequest::decode(payload)?;
        {
            let channel =
                self.state.channel(request.channel).ok_or(ControlError::Unknown("channel"))?;
            let actor = self.state.player(public_id).ok_or(ControlError::Unknown("player"))?;
            // members talk; outsiders need standing in the channel
            if actor.in_channel != request.channel
                && channel.privileges_for(actor.subject()).is_empty()
            {
                return Err(ControlError::Denied("not in that channel"));
            }
        }
        let notice = MessageNotice { sender: public_id, text: request.text };
        self.broadcast_channel_notice(
            request.channel,
            CommandCode::MessageChannel,
            &notice.encode(),
            now,
        );
        Ok(())
    }

    pub(crate) fn handle_message_server(
        &mut self,
        public_id: PublicId,
        payload: &[u8],
        now: Instant,
    ) -> ControlResult<()> {
        let request = ServerMessageRequest::decode(payload)?;
        let notice = MessageNotice { sender: public_id, text: request.text };
        self.broadcast_notice(CommandCode::MessageServer, &notice.encode(), now);
        Ok(())
    }

    // ── shared helpers ────────────────────────────────────────────────

    /// AUTO_OP / AUTO_VOICE turn into the real right when their holder
    /// enters the channel.
    pub(crate) fn apply_auto_rights(&mut self, channel_id: ChannelId, public_id: PublicId) {
        let Some(player) = self.state.player(public_id) else {
            return;
        };
        let subject = player.subject();
        let Some(channel) = self.state.channel(channel_id) else {
            return;
        };
        let bits = channel.privileges_for(subject);
        let mut add = ChannelPrivileges::empty();
        if bits.contains(ChannelPrivileges::AUTO_OP) && !bits.contains(ChannelPrivileges::OPERATOR)
        {
            add |= ChannelPrivileges::OPERATOR;
        }
        if bits.contains(ChannelPrivileges::AUTO_VOICE) && !bits.contains(ChannelPrivileges::VOICE)
        {
            add |= ChannelPrivileges::VOICE;
        }
        if !add.is_empty() {
            let _ = self.state.set_channel_privilege(channel_id, subject, add, true);
        }
    }

    /// The effective privilege bits a player holds in a channel.
    pub(crate) fn privileges_in(
        &self,
        channel_id: ChannelId,
        public_id: PublicId,
    ) -> ChannelPrivileges {
        let Some(player) = self.state.player(public_id) else {
            return ChannelPrivileges::empty();
        };
        self.state
            .channel(channel_id)
            .map(|c| c.privileges_for(player.subject()))
            .unwrap_or_default()
    }
}
