//! The live domain model: channels, players, registrations.
//!
//! Everything is owned by [`ServerState`] and cross-referenced by id, so
//! there are no ownership cycles: a channel's member set holds public ids,
//! the authoritative membership pointer is `Player::in_channel`, and
//! privilege records bind a channel to either a registration id or a live
//! session's public id.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;

use zeroize::Zeroizing;

use palaver_protocol::command::{ChannelRecord, PlayerRecord};
use palaver_protocol::{ChannelFlags, ChannelPrivileges, GlobalFlags, PlayerAttributes};

use crate::error::{ControlError, ControlResult};
use crate::reliability::PeerLink;
use crate::store::{ChannelPrivilegeRow, ChannelRow, RegistrationRow};

pub type ChannelId = u32;
pub type PublicId = u16;
pub type PrivateId = u32;
pub type RegistrationId = u32;

/// A persisted identity a live player can be attached to.
#[derive(Debug)]
pub struct Registration {
    pub id: RegistrationId,
    pub name: String,
    pub password: Zeroizing<String>,
    pub server_admin: bool,
}

impl Registration {
    pub fn row(&self) -> RegistrationRow {
        RegistrationRow {
            id: self.id,
            name: self.name.clone(),
            password: self.password.to_string(),
            server_admin: self.server_admin,
        }
    }
}

/// Who a channel privilege record is bound to. Registration-bound records
/// survive the session; session-bound ones die with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivilegeSubject {
    Registration(RegistrationId),
    Session(PublicId),
}

#[derive(Debug)]
pub struct Channel {
    pub id: ChannelId,
    pub parent_id: ChannelId,
    pub name: String,
    pub topic: String,
    pub description: String,
    pub password: Zeroizing<String>,
    pub max_users: u16,
    pub sort_order: u16,
    pub flags: ChannelFlags,
    /// Weak back-references; `Player::in_channel` is authoritative.
    pub members: HashSet<PublicId>,
    pub privileges: HashMap<PrivilegeSubject, ChannelPrivileges>,
}

impl Channel {
    pub fn is_default(&self) -> bool {
        self.flags.contains(ChannelFlags::DEFAULT)
    }

    pub fn is_registered(&self) -> bool {
        !self.flags.contains(ChannelFlags::UNREGISTERED)
    }

    pub fn has_password(&self) -> bool {
        self.flags.contains(ChannelFlags::PASSWORD)
    }

    pub fn privileges_for(&self, subject: PrivilegeSubject) -> ChannelPrivileges {
        self.privileges.get(&subject).copied().unwrap_or_default()
    }

    pub fn record(&self) -> ChannelRecord {
        ChannelRecord {
            id: self.id,
            parent_id: self.parent_id,
            flags: self.flags,
            max_users: self.max_users,
            sort_order: self.sort_order,
            name: self.name.clone(),
            topic: self.topic.clone(),
            description: self.description.clone(),
        }
    }

    /// Persistence row, registration-bound privilege records included.
    pub fn row(&self) -> ChannelRow {
        let mut privileges: Vec<_> = self
            .privileges
            .iter()
            .filter_map(|(subject, bits)| match subject {
                PrivilegeSubject::Registration(id) => {
                    Some(ChannelPrivilegeRow { registration_id: *id, privileges: bits.bits() })
                }
                PrivilegeSubject::Session(_) => None,
            })
            .collect();
        privileges.sort_by_key(|p| p.registration_id);
        ChannelRow {
            id: self.id,
            parent_id: self.parent_id,
            name: self.name.clone(),
            topic: self.topic.clone(),
            description: self.description.clone(),
            flags: self.flags.bits(),
            max_users: self.max_users,
            sort_order: self.sort_order,
            password: self.password.to_string(),
            privileges,
        }
    }

    pub fn from_row(row: &ChannelRow) -> Self {
        let privileges = row
            .privileges
            .iter()
            .map(|p| {
                (
                    PrivilegeSubject::Registration(p.registration_id),
                    ChannelPrivileges::from_bits_truncate(p.privileges),
                )
            })
            .collect();
        Self {
            id: row.id,
            parent_id: row.parent_id,
            name: row.name.clone(),
            topic: row.topic.clone(),
            description: row.description.clone(),
            password: Zeroizing::new(row.password.clone()),
            max_users: row.max_users,
            sort_order: row.sort_order,
            flags: ChannelFlags::from_bits_truncate(row.flags),
            members: HashSet::new(),
            privileges,
        }
    }
}

/// A connected session.
#[derive(Debug)]
pub struct Player {
    pub public_id: PublicId,
    pub private_id: PrivateId,
    pub nickname: String,
    pub in_channel: ChannelId,
    pub remote_addr: SocketAddr,
    pub last_ping: Instant,
    pub attributes: PlayerAttributes,
    pub global_flags: GlobalFlags,
    pub registration: Option<RegistrationId>,
    /// Credentials presented at LOGIN, kept so a later self-registration
    /// can be persisted from them.
    pub login_name: String,
    pub login_password: Zeroizing<String>,
    pub link: PeerLink,
}

impl Player {
    pub fn subject(&self) -> PrivilegeSubject {
        match self.registration {
            Some(id) => PrivilegeSubject::Registration(id),
            None => PrivilegeSubject::Session(self.public_id),
        }
    }

    pub fn is_server_admin(&self) -> bool {
        self.global_flags.contains(GlobalFlags::SERVER_ADMIN)
    }

    pub fn record(&self) -> PlayerRecord {
        PlayerRecord {
            public_id: self.public_id,
            channel_id: self.in_channel,
            attributes: self.attributes,
            global_flags: self.global_flags,
            nickname: self.nickname.clone(),
        }
    }
}

#[derive(Default)]
pub struct ServerState {
    channels: HashMap<ChannelId, Channel>,
    players: HashMap<PublicId, Player>,
    by_private: HashMap<PrivateId, PublicId>,
    by_addr: HashMap<SocketAddr, PublicId>,
    registrations: HashMap<RegistrationId, Registration>,
    next_public_id: PublicId,
    next_channel_id: ChannelId,
    next_registration_id: RegistrationId,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            next_public_id: 1,
            next_channel_id: 1,
            next_registration_id: 1,
            ..Self::default()
        }
    }

    // ── id allocation ─────────────────────────────────────────────────

    pub fn alloc_public_id(&mut self) -> PublicId {
        let id = self.next_public_id;
        self.next_public_id = self.next_public_id.wrapping_add(1).max(1);
        id
    }

    pub fn alloc_channel_id(&mut self) -> ChannelId {
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        id
    }

    pub fn alloc_registration_id(&mut self) -> RegistrationId {
        let id = self.next_registration_id;
        self.next_registration_id += 1;
        id
    }

    // ── channels ──────────────────────────────────────────────────────

    pub fn add_channel(&mut self, channel: Channel) {
        self.next_channel_id = self.next_channel_id.max(channel.id + 1);
        self.channels.insert(channel.id, channel);
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn remove_channel(&mut self, id: ChannelId) -> Option<Channel> {
        self.channels.remove(&id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn default_channel_id(&self) -> Option<ChannelId> {
        self.channels.values().find(|c| c.is_default()).map(|c| c.id)
    }

    pub fn has_subchannels(&self, id: ChannelId) -> bool {
        self.channels.values().any(|c| c.parent_id == id)
    }

    pub fn sibling_name_taken(&self, parent_id: ChannelId, name: &str) -> bool {
        self.channels.values().any(|c| c.parent_id == parent_id && c.name == name)
    }

    /// Channel snapshot for CHANLIST, in display order.
    pub fn channel_records(&self) -> Vec<ChannelRecord> {
        let mut records: Vec<_> = self.channels.values().map(Channel::record).collect();
        records.sort_by_key(|r| (r.sort_order, r.id));
        records
    }

    // ── players ───────────────────────────────────────────────────────

    pub fn insert_player(&mut self, player: Player) {
        self.by_private.insert(player.private_id, player.public_id);
        self.by_addr.insert(player.remote_addr, player.public_id);
        if let Some(channel) = self.channels.get_mut(&player.in_channel) {
            channel.members.insert(player.public_id);
        }
        self.players.insert(player.public_id, player);
    }

    /// Tear a session out of the model: indexes, channel membership and
    /// session-bound privilege records all go with it.
    pub fn remove_player(&mut self, public_id: PublicId) -> Option<Player> {
        let player = self.players.remove(&public_id)?;
        self.by_private.remove(&player.private_id);
        self.by_addr.remove(&player.remote_addr);
        if let Some(channel) = self.channels.get_mut(&player.in_channel) {
            channel.members.remove(&public_id);
        }
        for channel in self.channels.values_mut() {
            channel.privileges.remove(&PrivilegeSubject::Session(public_id));
        }
        Some(player)
    }

    pub fn player(&self, public_id: PublicId) -> Option<&Player> {
        self.players.get(&public_id)
    }

    pub fn player_mut(&mut self, public_id: PublicId) -> Option<&mut Player> {
        self.players.get_mut(&public_id)
    }

    pub fn player_by_private(&self, private_id: PrivateId) -> Option<&Player> {
        self.by_private.get(&private_id).and_then(|id| self.players.get(id))
    }

    pub fn player_by_private_mut(&mut self, private_id: PrivateId) -> Option<&mut Player> {
        let public_id = *self.by_private.get(&private_id)?;
        self.players.get_mut(&public_id)
    }

    pub fn player_by_addr(&self, addr: SocketAddr) -> Option<&Player> {
        self.by_addr.get(&addr).and_then(|id| self.players.get(id))
    }

    pub fn player_by_addr_mut(&mut self, addr: SocketAddr) -> Option<&mut Player> {
        let public_id = *self.by_addr.get(&addr)?;
        self.players.get_mut(&public_id)
    }

    pub fn is_nickname_taken(&self, nickname: &str) -> bool {
        self.players.values().any(|p| p.nickname == nickname)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Public ids in a stable order, for deterministic fan-out.
    pub fn player_ids_sorted(&self) -> Vec<PublicId> {
        let mut ids: Vec<_> = self.players.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Player snapshot for PLAYERLIST.
    pub fn player_records(&self) -> Vec<PlayerRecord> {
        let mut records: Vec<_> = self.players.values().map(Player::record).collect();
        records.sort_by_key(|r| r.public_id);
        records
    }

    /// Move a player between channels atomically. Returns the channel the
    /// player came from.
    pub fn move_player(&mut self, public_id: PublicId, to: ChannelId) -> ControlResult<ChannelId> {
        let from = self.players.get(&public_id).ok_or(ControlError::Unknown("player"))?.in_channel;
        {
            let target = self.channels.get(&to).ok_or(ControlError::Unknown("channel"))?;
            if target.max_users > 0 && target.members.len() >= target.max_users as usize {
                return Err(ControlError::Precondition("channel full"));
            }
        }
        if let Some(old) = self.channels.get_mut(&from) {
            old.members.remove(&public_id);
        }
        self.channels
            .get_mut(&to)
            .expect("target checked above")
            .members
            .insert(public_id);
        self.players.get_mut(&public_id).expect("player checked above").in_channel = to;
        Ok(from)
    }

    // ── registrations ─────────────────────────────────────────────────

    pub fn insert_registration(&mut self, registration: Registration) {
        self.next_registration_id = self.next_registration_id.max(registration.id + 1);
        self.registrations.insert(registration.id, registration);
    }

    pub fn registration(&self, id: RegistrationId) -> Option<&Registration> {
        self.registrations.get(&id)
    }

    pub fn registration_mut(&mut self, id: RegistrationId) -> Option<&mut Registration> {
        self.registrations.get_mut(&id)
    }

    pub fn registration_by_name(&self, name: &str) -> Option<&Registration> {
        self.registrations.values().find(|r| r.name == name)
    }

    pub fn remove_registration(&mut self, id: RegistrationId) -> Option<Registration> {
        self.registrations.remove(&id)
    }

    /// When a player loses REGISTERED, every privilege record bound to the
    /// registration is rebound to the live session for the rest of it.
    pub fn rebind_registration_privileges(&mut self, reg_id: RegistrationId, public_id: PublicId) {
        let from = PrivilegeSubject::Registration(reg_id);
        let to = PrivilegeSubject::Session(public_id);
        for channel in self.channels.values_mut() {
            if let Some(bits) = channel.privileges.remove(&from) {
                let entry = channel.privileges.entry(to).or_default();
                *entry |= bits;
            }
        }
    }

    /// Flip one privilege bit for a subject in a channel; returns the new
    /// bits. Empty records are dropped rather than kept around as zeroes.
    pub fn set_channel_privilege(
        &mut self,
        channel_id: ChannelId,
        subject: PrivilegeSubject,
        right: ChannelPrivileges,
        grant: bool,
    ) -> ControlResult<ChannelPrivileges> {
        let channel = self.channels.get_mut(&channel_id).ok_or(ControlError::Unknown("channel"))?;
        let mut bits = channel.privileges_for(subject);
        if grant {
            bits |= right;
        } else {
            bits -= right;
        }
        if bits.is_empty() {
            channel.privileges.remove(&subject);
        } else {
            channel.privileges.insert(subject, bits);
        }
        Ok(bits)
    }
}
