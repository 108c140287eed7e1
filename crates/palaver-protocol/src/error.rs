use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet too short: expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("datagram too large: {0} bytes (max 512)")]
    Oversize(usize),

    #[error("unknown packet class: 0x{0:04x}")]
    UnknownClass(u16),

    #[error("unknown command code: 0x{0:04x}")]
    UnknownCommand(u16),

    #[error("crc mismatch: packet carries 0x{carried:08x}, computed 0x{computed:08x}")]
    CrcMismatch { carried: u32, computed: u32 },

    #[error("string field too long: {0} bytes (max 29)")]
    StringTooLong(usize),

    #[error("string field is not valid utf-8")]
    InvalidUtf8,

    #[error("malformed {0} payload")]
    Malformed(&'static str),
}
