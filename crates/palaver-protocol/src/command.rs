//! Command codes and their payload layouts.
//!
//! Requests and the notifications they trigger share a command code, as the
//! original clients expect. Offsets below are relative to the end of the
//! 24-byte header.

use crate::error::ProtocolError;
use crate::flags::{ChannelFlags, ChannelPrivileges, GlobalFlags, PlayerAttributes};
use crate::header::{HEADER_LEN, MAX_CONTROL_DATAGRAM};
use crate::wire::{Reader, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandCode {
    Ping = 0x0001,
    Pong = 0x0002,
    Login = 0x0003,
    LoginOk = 0x0004,
    LoginFail = 0x0005,
    Disconnect = 0x0006,
    KickServer = 0x0065,
    KickChannel = 0x0066,
    ChannelList = 0x006C,
    PlayerList = 0x006D,
    MessagePlayer = 0x0082,
    MessageChannel = 0x0083,
    MessageServer = 0x0084,
    CreateChannel = 0x00C9,
    ChannelInfo = 0x00CA,
    ChanDelete = 0x00D1,
    ChanDeleteError = 0x00D2,
    SwitchChannel = 0x012F,
    ChannelPrivilege = 0x0130,
    ServerPrivilege = 0x0131,
    PlayerStatus = 0x0132,
}

impl CommandCode {
    pub fn from_wire(raw: u16) -> Result<Self, ProtocolError> {
        Ok(match raw {
            0x0001 => Self::Ping,
            0x0002 => Self::Pong,
            0x0003 => Self::Login,
            0x0004 => Self::LoginOk,
            0x0005 => Self::LoginFail,
            0x0006 => Self::Disconnect,
            0x0065 => Self::KickServer,
            0x0066 => Self::KickChannel,
            0x006C => Self::ChannelList,
            0x006D => Self::PlayerList,
            0x0082 => Self::MessagePlayer,
            0x0083 => Self::MessageChannel,
            0x0084 => Self::MessageServer,
            0x00C9 => Self::CreateChannel,
            0x00CA => Self::ChannelInfo,
            0x00D1 => Self::ChanDelete,
            0x00D2 => Self::ChanDeleteError,
            0x012F => Self::SwitchChannel,
            0x0130 => Self::ChannelPrivilege,
            0x0131 => Self::ServerPrivilege,
            0x0132 => Self::PlayerStatus,
            other => return Err(ProtocolError::UnknownCommand(other)),
        })
    }

    pub fn to_wire(self) -> u16 {
        self as u16
    }
}

// ── Login ─────────────────────────────────────────────────────────────

/// LOGIN request. All credentials travel in cleartext; the protocol
/// predates better ideas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub client_version: String,
    pub login_name: String,
    pub login_password: String,
    pub nickname: String,
    pub server_password: String,
}

impl LoginRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(150);
        w.string29(&self.client_version);
        w.string29(&self.login_name);
        w.string29(&self.login_password);
        w.string29(&self.nickname);
        w.string29(&self.server_password);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            client_version: r.string29()?,
            login_name: r.string29()?,
            login_password: r.string29()?,
            nickname: r.string29()?,
            server_password: r.string29()?,
        })
    }
}

/// LOGIN_OK. The assigned ids are repeated in the payload because the
/// client cannot read them from the header yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOk {
    pub private_id: u32,
    pub public_id: u16,
    pub default_channel: u32,
    pub welcome: String,
}

impl LoginOk {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(42);
        w.u32(self.private_id);
        w.u32(self.public_id as u32);
        w.u32(self.default_channel);
        w.string29(&self.welcome);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            private_id: r.u32()?,
            public_id: r.u32()? as u16,
            default_channel: r.u32()?,
            welcome: r.string29()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginFail {
    pub reason: String,
}

impl LoginFail {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(30);
        w.string29(&self.reason);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { reason: r.string29()? })
    }
}

// ── Disconnect ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LeaveReason {
    Quit = 0,
    PingTimeout = 1,
    Kicked = 2,
    ConnectionLost = 3,
}

impl LeaveReason {
    pub fn from_wire(raw: u8) -> Result<Self, ProtocolError> {
        Ok(match raw {
            0 => Self::Quit,
            1 => Self::PingTimeout,
            2 => Self::Kicked,
            3 => Self::ConnectionLost,
            _ => return Err(ProtocolError::Malformed("disconnect")),
        })
    }
}

/// Broadcast when a player leaves the server for any reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectNotice {
    pub public_id: u16,
    pub reason: LeaveReason,
}

impl DisconnectNotice {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(5);
        w.u32(self.public_id as u32);
        w.u8(self.reason as u8);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { public_id: r.u32()? as u16, reason: LeaveReason::from_wire(r.u8()?)? })
    }
}

// ── Channel and player records ────────────────────────────────────────

/// One channel as it appears in CHANLIST, CREATE_CH and CHANGE_CH_INFO.
/// The password itself never travels; only the PASSWORD flag does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub id: u32,
    pub parent_id: u32,
    pub flags: ChannelFlags,
    pub max_users: u16,
    pub sort_order: u16,
    pub name: String,
    pub topic: String,
    pub description: String,
}

/// Encoded size of one channel record.
pub const CHANNEL_RECORD_LEN: usize = 4 + 4 + 2 + 2 + 2 + 30 * 3;

impl ChannelRecord {
    pub fn write(&self, w: &mut Writer) {
        w.u32(self.id);
        w.u32(self.parent_id);
        w.u16(self.flags.bits());
        w.u16(self.max_users);
        w.u16(self.sort_order);
        w.string29(&self.name);
        w.string29(&self.topic);
        w.string29(&self.description);
    }

    pub fn read(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: r.u32()?,
            parent_id: r.u32()?,
            flags: ChannelFlags::from_bits_truncate(r.u16()?),
            max_users: r.u16()?,
            sort_order: r.u16()?,
            name: r.string29()?,
            topic: r.string29()?,
            description: r.string29()?,
        })
    }
}

/// One player as it appears in PLAYERLIST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub public_id: u16,
    pub channel_id: u32,
    pub attributes: PlayerAttributes,
    pub global_flags: GlobalFlags,
    pub nickname: String,
}

/// Encoded size of one player record.
pub const PLAYER_RECORD_LEN: usize = 4 + 4 + 2 + 1 + 30;

impl PlayerRecord {
    pub fn write(&self, w: &mut Writer) {
        w.u32(self.public_id as u32);
        w.u32(self.channel_id);
        w.u16(self.attributes.bits());
        w.u8(self.global_flags.bits());
        w.string29(&self.nickname);
    }

    pub fn read(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(Self {
            public_id: r.u32()? as u16,
            channel_id: r.u32()?,
            attributes: PlayerAttributes::from_bits_truncate(r.u16()?),
            global_flags: GlobalFlags::from_bits_truncate(r.u8()?),
            nickname: r.string29()?,
        })
    }
}

fn chunked<T>(items: &[T], write_one: impl Fn(&mut Writer, &T), item_len: usize) -> Vec<Vec<u8>> {
    let per_chunk = (MAX_CONTROL_DATAGRAM - HEADER_LEN - 1) / item_len;
    if items.is_empty() {
        // a snapshot is still owed, even when there is nothing in it
        let mut w = Writer::with_capacity(1);
        w.u8(0);
        return vec![w.finish()];
    }
    items
        .chunks(per_chunk)
        .map(|chunk| {
            let mut w = Writer::with_capacity(1 + chunk.len() * item_len);
            w.u8(chunk.len() as u8);
            for item in chunk {
                write_one(&mut w, item);
            }
            w.finish()
        })
        .collect()
}

/// Encode a CHANLIST snapshot, split so no datagram exceeds the 512-byte
/// cap. An empty server still produces one zero-count payload.
pub fn encode_channel_list(channels: &[ChannelRecord]) -> Vec<Vec<u8>> {
    chunked(channels, |w, c| c.write(w), CHANNEL_RECORD_LEN)
}

pub fn decode_channel_list(payload: &[u8]) -> Result<Vec<ChannelRecord>, ProtocolError> {
    let mut r = Reader::new(payload);
    let count = r.u8()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(ChannelRecord::read(&mut r)?);
    }
    Ok(out)
}

/// Encode a PLAYERLIST snapshot, chunked like [`encode_channel_list`].
pub fn encode_player_list(players: &[PlayerRecord]) -> Vec<Vec<u8>> {
    chunked(players, |w, p| p.write(w), PLAYER_RECORD_LEN)
}

pub fn decode_player_list(payload: &[u8]) -> Result<Vec<PlayerRecord>, ProtocolError> {
    let mut r = Reader::new(payload);
    let count = r.u8()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(PlayerRecord::read(&mut r)?);
    }
    Ok(out)
}

// ── Channel membership ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchChannelRequest {
    pub target: u32,
    pub password: String,
}

impl SwitchChannelRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(34);
        w.u32(self.target);
        w.string29(&self.password);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { target: r.u32()?, password: r.string29()? })
    }
}

/// Broadcast after a successful channel switch (also announces a fresh
/// login, with `from` = 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchChannelNotice {
    pub public_id: u16,
    pub from: u32,
    pub to: u32,
    /// The mover's privilege bits in the destination channel.
    pub privileges: ChannelPrivileges,
}

impl SwitchChannelNotice {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(14);
        w.u32(self.public_id as u32);
        w.u32(self.from);
        w.u32(self.to);
        w.u16(self.privileges.bits());
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            public_id: r.u32()? as u16,
            from: r.u32()?,
            to: r.u32()?,
            privileges: ChannelPrivileges::from_bits_truncate(r.u16()?),
        })
    }
}

// ── Channel lifecycle ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateChannelRequest {
    /// `record.id` is ignored; the server assigns the id.
    pub record: ChannelRecord,
    pub password: String,
}

impl CreateChannelRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(CHANNEL_RECORD_LEN + 30);
        self.record.write(&mut w);
        w.string29(&self.password);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { record: ChannelRecord::read(&mut r)?, password: r.string29()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCreatedNotice {
    pub creator: u16,
    pub record: ChannelRecord,
}

impl ChannelCreatedNotice {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(4 + CHANNEL_RECORD_LEN);
        w.u32(self.creator as u32);
        self.record.write(&mut w);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { creator: r.u32()? as u16, record: ChannelRecord::read(&mut r)? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeChannelInfoRequest {
    pub record: ChannelRecord,
    /// Replacement password; empty clears it.
    pub password: String,
}

impl ChangeChannelInfoRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(CHANNEL_RECORD_LEN + 30);
        self.record.write(&mut w);
        w.string29(&self.password);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { record: ChannelRecord::read(&mut r)?, password: r.string29()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfoNotice {
    pub actor: u16,
    pub record: ChannelRecord,
}

impl ChannelInfoNotice {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(4 + CHANNEL_RECORD_LEN);
        w.u32(self.actor as u32);
        self.record.write(&mut w);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { actor: r.u32()? as u16, record: ChannelRecord::read(&mut r)? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDeleteRequest {
    pub id: u32,
}

impl ChannelDeleteRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(4);
        w.u32(self.id);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { id: r.u32()? })
    }
}

/// Deletion broadcast. The layout is the one original clients accept: the
/// id lands in a two-byte slot (the low half of the u32) immediately
/// followed by a u32 `1`. Do not "fix" this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDeletedNotice {
    pub id: u16,
}

impl ChannelDeletedNotice {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(6);
        w.u16(self.id);
        w.u32(1);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        let id = r.u16()?;
        let _marker = r.u32()?;
        Ok(Self { id })
    }
}

/// Sent to the requester when a deletion is refused. Echoes the CHANDELETE
/// command code and the counter of the refused request so the client can
/// correlate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDeleteError {
    pub request_counter: u32,
}

impl ChannelDeleteError {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(6);
        w.u16(CommandCode::ChanDelete.to_wire());
        w.u32(self.request_counter);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        if r.u16()? != CommandCode::ChanDelete.to_wire() {
            return Err(ProtocolError::Malformed("chandelete error"));
        }
        Ok(Self { request_counter: r.u32()? })
    }
}

// ── Privileges and status ─────────────────────────────────────────────

/// The wire convention for the on/off byte: 0 grants, 2 revokes, 1 is
/// unused and everything else is rejected rather than guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PrivilegeAction {
    Grant = 0,
    Revoke = 2,
}

impl PrivilegeAction {
    pub fn from_wire(raw: u8) -> Result<Self, ProtocolError> {
        match raw {
            0 => Ok(Self::Grant),
            2 => Ok(Self::Revoke),
            _ => Err(ProtocolError::Malformed("privilege action")),
        }
    }
}

/// CHANGE_PL_CHPRIV / CHANGE_PL_SVPRIV request; the command code decides
/// whether `right` indexes a channel right or a global flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeChangeRequest {
    pub target: u16,
    pub action: PrivilegeAction,
    /// Bit offset of the right: `1 << right` selects it.
    pub right: u8,
}

impl PrivilegeChangeRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(6);
        w.u32(self.target as u32);
        w.u8(self.action as u8);
        w.u8(self.right);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            target: r.u32()? as u16,
            action: PrivilegeAction::from_wire(r.u8()?)?,
            right: r.u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeChangeNotice {
    pub target: u16,
    pub action: PrivilegeAction,
    pub right: u8,
    pub actor: u16,
}

impl PrivilegeChangeNotice {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(10);
        w.u32(self.target as u32);
        w.u8(self.action as u8);
        w.u8(self.right);
        w.u32(self.actor as u32);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            target: r.u32()? as u16,
            action: PrivilegeAction::from_wire(r.u8()?)?,
            right: r.u8()?,
            actor: r.u32()? as u16,
        })
    }
}

/// CHANGE_PL_STATUS request; the target is always the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChangeRequest {
    pub attributes: PlayerAttributes,
}

impl StatusChangeRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(2);
        w.u16(self.attributes.bits());
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { attributes: PlayerAttributes::from_bits_truncate(r.u16()?) })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChangeNotice {
    pub public_id: u16,
    pub attributes: PlayerAttributes,
}

impl StatusChangeNotice {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(6);
        w.u32(self.public_id as u32);
        w.u16(self.attributes.bits());
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            public_id: r.u32()? as u16,
            attributes: PlayerAttributes::from_bits_truncate(r.u16()?),
        })
    }
}

// ── Kicks ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KickRequest {
    pub target: u16,
    pub reason: String,
}

impl KickRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(34);
        w.u32(self.target as u32);
        w.string29(&self.reason);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { target: r.u32()? as u16, reason: r.string29()? })
    }
}

/// KICK_SERVER broadcast; the victim receives it too, as a terminal notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKickNotice {
    pub target: u16,
    pub kicker: u16,
    pub reason: String,
}

impl ServerKickNotice {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(38);
        w.u32(self.target as u32);
        w.u32(self.kicker as u32);
        w.string29(&self.reason);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            target: r.u32()? as u16,
            kicker: r.u32()? as u16,
            reason: r.string29()?,
        })
    }
}

/// KICK_CHANNEL broadcast; the victim is dropped into `to_channel` (the
/// default channel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelKickNotice {
    pub target: u16,
    pub kicker: u16,
    pub to_channel: u32,
    pub reason: String,
}

impl ChannelKickNotice {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(42);
        w.u32(self.target as u32);
        w.u32(self.kicker as u32);
        w.u32(self.to_channel);
        w.string29(&self.reason);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self {
            target: r.u32()? as u16,
            kicker: r.u32()? as u16,
            to_channel: r.u32()?,
            reason: r.string29()?,
        })
    }
}

// ── Text messages ─────────────────────────────────────────────────────

/// MESSAGE_PL request: text to one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerMessageRequest {
    pub target: u16,
    pub text: String,
}

impl PlayerMessageRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(4 + self.text.len());
        w.u32(self.target as u32);
        w.text(&self.text);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { target: r.u32()? as u16, text: r.text()? })
    }
}

/// MESSAGE_CH request: text to every member of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessageRequest {
    pub channel: u32,
    pub text: String,
}

impl ChannelMessageRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(4 + self.text.len());
        w.u32(self.channel);
        w.text(&self.text);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { channel: r.u32()?, text: r.text()? })
    }
}

/// MESSAGE_SERVER request: text to everyone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessageRequest {
    pub text: String,
}

impl ServerMessageRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(self.text.len());
        w.text(&self.text);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { text: r.text()? })
    }
}

/// Delivery for all three message scopes; the command code tells them
/// apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageNotice {
    pub sender: u16,
    pub text: String,
}

impl MessageNotice {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(4 + self.text.len());
        w.u32(self.sender as u32);
        w.text(&self.text);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        Ok(Self { sender: r.u32()? as u16, text: r.text()? })
    }
}
