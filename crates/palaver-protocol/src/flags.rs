use bitflags::bitflags;

bitflags! {
    /// Channel property bits, carried in every channel record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelFlags: u16 {
        /// Lives only for this server run; has no persistence row.
        const UNREGISTERED = 1 << 0;
        const MODERATED = 1 << 1;
        const PASSWORD = 1 << 2;
        const SUBCHANNELS = 1 << 3;
        /// Newly logged-in players land here. Exactly one per server.
        const DEFAULT = 1 << 4;
    }
}

bitflags! {
    /// Self-reported player status bits (CHANGE_PL_STATUS).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PlayerAttributes: u16 {
        const MUTED_MIC = 1 << 0;
        const MUTED_SPEAKERS = 1 << 1;
        const AWAY = 1 << 2;
        const CHANNEL_COMMANDER = 1 << 3;
        const BLOCK_WHISPERS = 1 << 4;
    }
}

bitflags! {
    /// Server-wide player flags. The bit positions double as the `right`
    /// byte of CHANGE_PL_SVPRIV (`1 << right` selects the flag).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GlobalFlags: u8 {
        const SERVER_ADMIN = 1 << 0;
        const ALLOW_REG = 1 << 1;
        const REGISTERED = 1 << 2;
    }
}

bitflags! {
    /// Channel-scoped rights. The bit positions double as the `right` byte
    /// of CHANGE_PL_CHPRIV (`1 << right` selects the right).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelPrivileges: u16 {
        const CHANNEL_ADMIN = 1 << 0;
        const OPERATOR = 1 << 1;
        const VOICE = 1 << 2;
        const AUTO_OP = 1 << 3;
        const AUTO_VOICE = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn right_byte_selects_channel_privilege() {
        assert_eq!(ChannelPrivileges::from_bits_truncate(1 << 0), ChannelPrivileges::CHANNEL_ADMIN);
        assert_eq!(ChannelPrivileges::from_bits_truncate(1 << 1), ChannelPrivileges::OPERATOR);
        assert_eq!(ChannelPrivileges::from_bits_truncate(1 << 4), ChannelPrivileges::AUTO_VOICE);
    }

    #[test]
    fn unknown_bits_are_dropped() {
        let f = ChannelFlags::from_bits_truncate(0xffff);
        assert_eq!(f.bits(), 0b1_1111);
    }

    #[test]
    fn global_flags_fit_one_byte() {
        let all = GlobalFlags::all();
        assert_eq!(all.bits(), 0b111);
    }
}
