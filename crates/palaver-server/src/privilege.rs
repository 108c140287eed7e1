//! The privilege engine: may this player do that, here?
//!
//! Operations are named, not bit masks; the wire's `(on_off, right)` pairs
//! are translated through the fixed tables below before any check runs.

use palaver_protocol::{ChannelPrivileges, GlobalFlags};

use crate::state::{Channel, Player};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeOp {
    // channel-right grants and revocations
    GrantChannelAdmin,
    RevokeChannelAdmin,
    GrantOperator,
    RevokeOperator,
    GrantVoice,
    RevokeVoice,
    GrantAutoOp,
    RevokeAutoOp,
    GrantAutoVoice,
    RevokeAutoVoice,
    // server-scoped
    GrantServerAdmin,
    RevokeServerAdmin,
    GrantAllowReg,
    RevokeAllowReg,
    SelfRegister,
    DeleteRegistration,
    KickFromServer,
    EditServerInfo,
    // channel-scoped behaviour
    KickFromChannel,
    EditChannel,
    DeleteChannel,
    JoinWithoutPassword,
    // channel creation, one op per flag on the requested channel
    CreateUnregistered,
    CreateRegistered,
    CreateDefault,
    CreateModerated,
    CreateSubchanneled,
    // self-operations
    ChangeOwnStatus,
}

/// The protocol-fixed mapping from a channel right to the ops that grant
/// and revoke it.
pub fn channel_right_ops(right: ChannelPrivileges) -> Option<(PrivilegeOp, PrivilegeOp)> {
    use PrivilegeOp::*;
    if right == ChannelPrivileges::CHANNEL_ADMIN {
        Some((GrantChannelAdmin, RevokeChannelAdmin))
    } else if right == ChannelPrivileges::OPERATOR {
        Some((GrantOperator, RevokeOperator))
    } else if right == ChannelPrivileges::VOICE {
        Some((GrantVoice, RevokeVoice))
    } else if right == ChannelPrivileges::AUTO_OP {
        Some((GrantAutoOp, RevokeAutoOp))
    } else if right == ChannelPrivileges::AUTO_VOICE {
        Some((GrantAutoVoice, RevokeAutoVoice))
    } else {
        None
    }
}

/// The same mapping for the global flags of CHANGE_PL_SVPRIV.
pub fn global_flag_ops(flag: GlobalFlags) -> Option<(PrivilegeOp, PrivilegeOp)> {
    use PrivilegeOp::*;
    if flag == GlobalFlags::SERVER_ADMIN {
        Some((GrantServerAdmin, RevokeServerAdmin))
    } else if flag == GlobalFlags::ALLOW_REG {
        Some((GrantAllowReg, RevokeAllowReg))
    } else if flag == GlobalFlags::REGISTERED {
        Some((SelfRegister, DeleteRegistration))
    } else {
        None
    }
}

/// Site policy knobs the engine consults for ops the protocol leaves to
/// the server operator.
#[derive(Debug, Clone, Copy)]
pub struct PrivilegePolicy {
    /// Whether anyone may create UNREGISTERED channels.
    pub allow_guest_channels: bool,
}

pub struct PrivilegeEngine {
    policy: PrivilegePolicy,
}

impl PrivilegeEngine {
    pub fn new(policy: PrivilegePolicy) -> Self {
        Self { policy }
    }

    /// Resolution order: server admin wins; server-scoped ops consult
    /// global flags only; channel-scoped ops consult the privilege record
    /// bound to (actor, context); self-operations always pass; everything
    /// else is denied.
    pub fn may(&self, actor: &Player, op: PrivilegeOp, context: Option<&Channel>) -> bool {
        use PrivilegeOp::*;

        if actor.is_server_admin() {
            return true;
        }

        match op {
            ChangeOwnStatus => true,

            GrantServerAdmin | RevokeServerAdmin | GrantAllowReg | RevokeAllowReg
            | DeleteRegistration | KickFromServer | EditServerInfo | CreateRegistered
            | CreateDefault | CreateModerated | CreateSubchanneled => false,

            SelfRegister => actor.global_flags.contains(GlobalFlags::ALLOW_REG),

            CreateUnregistered => self.policy.allow_guest_channels,

            GrantChannelAdmin | RevokeChannelAdmin | GrantOperator | RevokeOperator
            | GrantVoice | RevokeVoice | GrantAutoOp | RevokeAutoOp | GrantAutoVoice
            | RevokeAutoVoice | KickFromChannel | EditChannel | DeleteChannel
            | JoinWithoutPassword => {
                let Some(channel) = context else {
                    return false;
                };
                let bits = channel.privileges_for(actor.subject());
                if bits.contains(ChannelPrivileges::CHANNEL_ADMIN) {
                    return true;
                }
                match op {
                    KickFromChannel | EditChannel | JoinWithoutPassword => {
                        bits.contains(ChannelPrivileges::OPERATOR)
                    }
                    _ => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::PeerLink;
    use crate::state::{PrivilegeSubject, PublicId};
    use palaver_protocol::{ChannelFlags, PlayerAttributes};
    use std::collections::{HashMap, HashSet};
    use std::time::Instant;
    use zeroize::Zeroizing;

    fn engine() -> PrivilegeEngine {
        PrivilegeEngine::new(PrivilegePolicy { allow_guest_channels: true })
    }

    fn player(public_id: PublicId, global_flags: GlobalFlags) -> Player {
        Player {
            public_id,
            private_id: public_id as u32,
            nickname: format!("p{public_id}"),
            in_channel: 1,
            remote_addr: "127.0.0.1:9000".parse().unwrap(),
            last_ping: Instant::now(),
            attributes: PlayerAttributes::empty(),
            global_flags,
            registration: None,
            login_name: String::new(),
            login_password: Zeroizing::new(String::new()),
            link: PeerLink::new(1),
        }
    }

    fn channel_with(subject: PrivilegeSubject, bits: ChannelPrivileges) -> Channel {
        let mut privileges = HashMap::new();
        if !bits.is_empty() {
            privileges.insert(subject, bits);
        }
        Channel {
            id: 1,
            parent_id: 0,
            name: "room".into(),
            topic: String::new(),
            description: String::new(),
            password: Zeroizing::new(String::new()),
            max_users: 0,
            sort_order: 0,
            flags: ChannelFlags::UNREGISTERED,
            members: HashSet::new(),
            privileges,
        }
    }

    #[test]
    fn server_admin_may_do_anything() {
        let e = engine();
        let admin = player(1, GlobalFlags::SERVER_ADMIN);
        let ch = channel_with(PrivilegeSubject::Session(1), ChannelPrivileges::empty());
        for op in [
            PrivilegeOp::GrantServerAdmin,
            PrivilegeOp::GrantChannelAdmin,
            PrivilegeOp::DeleteChannel,
            PrivilegeOp::KickFromServer,
            PrivilegeOp::CreateDefault,
            PrivilegeOp::JoinWithoutPassword,
        ] {
            assert!(e.may(&admin, op, Some(&ch)), "{op:?}");
            assert!(e.may(&admin, op, None), "{op:?} without context");
        }
    }

    #[test]
    fn plain_player_is_denied_grants() {
        let e = engine();
        let plain = player(2, GlobalFlags::empty());
        let ch = channel_with(PrivilegeSubject::Session(2), ChannelPrivileges::empty());
        for op in [
            PrivilegeOp::GrantServerAdmin,
            PrivilegeOp::RevokeServerAdmin,
            PrivilegeOp::GrantChannelAdmin,
            PrivilegeOp::GrantOperator,
            PrivilegeOp::GrantVoice,
            PrivilegeOp::RevokeAutoVoice,
            PrivilegeOp::KickFromServer,
            PrivilegeOp::DeleteRegistration,
        ] {
            assert!(!e.may(&plain, op, Some(&ch)), "{op:?}");
        }
    }

    #[test]
    fn channel_admin_implies_channel_ops() {
        let e = engine();
        let p = player(3, GlobalFlags::empty());
        let ch = channel_with(PrivilegeSubject::Session(3), ChannelPrivileges::CHANNEL_ADMIN);
        for op in [
            PrivilegeOp::GrantOperator,
            PrivilegeOp::RevokeOperator,
            PrivilegeOp::GrantVoice,
            PrivilegeOp::KickFromChannel,
            PrivilegeOp::EditChannel,
            PrivilegeOp::DeleteChannel,
            PrivilegeOp::JoinWithoutPassword,
        ] {
            assert!(e.may(&p, op, Some(&ch)), "{op:?}");
        }
        // but not server-scoped power
        assert!(!e.may(&p, PrivilegeOp::GrantServerAdmin, Some(&ch)));
        assert!(!e.may(&p, PrivilegeOp::KickFromServer, Some(&ch)));
    }

    #[test]
    fn operator_implies_kick_and_edit_only() {
        let e = engine();
        let p = player(4, GlobalFlags::empty());
        let ch = channel_with(PrivilegeSubject::Session(4), ChannelPrivileges::OPERATOR);
        assert!(e.may(&p, PrivilegeOp::KickFromChannel, Some(&ch)));
        assert!(e.may(&p, PrivilegeOp::EditChannel, Some(&ch)));
        assert!(e.may(&p, PrivilegeOp::JoinWithoutPassword, Some(&ch)));
        assert!(!e.may(&p, PrivilegeOp::GrantOperator, Some(&ch)));
        assert!(!e.may(&p, PrivilegeOp::DeleteChannel, Some(&ch)));
    }

    #[test]
    fn voice_is_not_control_plane_power() {
        let e = engine();
        let p = player(5, GlobalFlags::empty());
        let ch = channel_with(PrivilegeSubject::Session(5), ChannelPrivileges::VOICE);
        assert!(!e.may(&p, PrivilegeOp::KickFromChannel, Some(&ch)));
        assert!(!e.may(&p, PrivilegeOp::EditChannel, Some(&ch)));
        assert!(!e.may(&p, PrivilegeOp::GrantVoice, Some(&ch)));
    }

    #[test]
    fn channel_ops_need_a_context() {
        let e = engine();
        let p = player(6, GlobalFlags::empty());
        assert!(!e.may(&p, PrivilegeOp::KickFromChannel, None));
        assert!(!e.may(&p, PrivilegeOp::EditChannel, None));
    }

    #[test]
    fn self_status_always_allowed() {
        let e = engine();
        let p = player(7, GlobalFlags::empty());
        assert!(e.may(&p, PrivilegeOp::ChangeOwnStatus, None));
    }

    #[test]
    fn allow_reg_gates_self_registration() {
        let e = engine();
        let without = player(8, GlobalFlags::empty());
        let with = player(9, GlobalFlags::ALLOW_REG);
        assert!(!e.may(&without, PrivilegeOp::SelfRegister, None));
        assert!(e.may(&with, PrivilegeOp::SelfRegister, None));
    }

    #[test]
    fn guest_channel_policy_gates_unregistered_creation() {
        let open = PrivilegeEngine::new(PrivilegePolicy { allow_guest_channels: true });
        let closed = PrivilegeEngine::new(PrivilegePolicy { allow_guest_channels: false });
        let p = player(10, GlobalFlags::empty());
        assert!(open.may(&p, PrivilegeOp::CreateUnregistered, None));
        assert!(!closed.may(&p, PrivilegeOp::CreateUnregistered, None));
        // registered creation stays admin-only either way
        assert!(!open.may(&p, PrivilegeOp::CreateRegistered, None));
    }

    #[test]
    fn right_op_table_is_fixed() {
        assert_eq!(
            channel_right_ops(ChannelPrivileges::CHANNEL_ADMIN),
            Some((PrivilegeOp::GrantChannelAdmin, PrivilegeOp::RevokeChannelAdmin))
        );
        assert_eq!(
            channel_right_ops(ChannelPrivileges::OPERATOR),
            Some((PrivilegeOp::GrantOperator, PrivilegeOp::RevokeOperator))
        );
        assert_eq!(
            channel_right_ops(ChannelPrivileges::VOICE),
            Some((PrivilegeOp::GrantVoice, PrivilegeOp::RevokeVoice))
        );
        assert_eq!(
            channel_right_ops(ChannelPrivileges::AUTO_OP),
            Some((PrivilegeOp::GrantAutoOp, PrivilegeOp::RevokeAutoOp))
        );
        assert_eq!(
            channel_right_ops(ChannelPrivileges::AUTO_VOICE),
            Some((PrivilegeOp::GrantAutoVoice, PrivilegeOp::RevokeAutoVoice))
        );
        // a multi-bit or unknown right maps to nothing
        assert_eq!(channel_right_ops(ChannelPrivileges::from_bits_truncate(0b11)), None);
    }

    #[test]
    fn global_flag_table_is_fixed() {
        assert_eq!(
            global_flag_ops(GlobalFlags::SERVER_ADMIN),
            Some((PrivilegeOp::GrantServerAdmin, PrivilegeOp::RevokeServerAdmin))
        );
        assert_eq!(
            global_flag_ops(GlobalFlags::ALLOW_REG),
            Some((PrivilegeOp::GrantAllowReg, PrivilegeOp::RevokeAllowReg))
        );
        assert_eq!(
            global_flag_ops(GlobalFlags::REGISTERED),
            Some((PrivilegeOp::SelfRegister, PrivilegeOp::DeleteRegistration))
        );
    }
}
