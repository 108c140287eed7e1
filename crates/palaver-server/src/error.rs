use thiserror::Error;

use crate::store::StoreError;

pub type ControlResult<T> = Result<T, ControlError>;

/// Handler outcome. Handlers never raise past the dispatcher; every variant
/// maps to a wire reply or a log line, and the process never dies over a
/// protocol-level error.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A referenced entity does not exist. Silent on the wire.
    #[error("unknown {0}")]
    Unknown(&'static str),

    /// The privilege engine said no. Silent on the wire; the ack has
    /// already gone, so the client does not retry.
    #[error("permission denied: {0}")]
    Denied(&'static str),

    /// A domain precondition failed (channel full, name taken, ...).
    #[error("precondition failed: {0}")]
    Precondition(&'static str),

    /// The registration store refused; the in-memory model is unchanged.
    #[error("persistence failure: {0}")]
    Store(#[from] StoreError),

    /// The payload did not parse.
    #[error("malformed payload: {0}")]
    Protocol(#[from] palaver_protocol::ProtocolError),
}
