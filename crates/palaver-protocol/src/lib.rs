//! Wire format for the palaver control protocol.
//!
//! Everything on the wire is little-endian. A control datagram is a fixed
//! 24-byte header followed by a command-specific payload; integrity is a
//! CRC-32 over the whole packet with the CRC field zeroed. This crate is
//! pure data: no sockets, no state, no clocks.

pub mod command;
pub mod error;
pub mod flags;
pub mod header;
pub mod wire;

pub use command::CommandCode;
pub use error::ProtocolError;
pub use flags::{ChannelFlags, ChannelPrivileges, GlobalFlags, PlayerAttributes};
pub use header::{Frame, Header, PacketClass};
