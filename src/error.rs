//! Error hierarchy, split by the kinds described in the error handling
//! design: transport, protocol, state and decline.

use thiserror::Error;

use crate::id::Id;

/// TCP connect, read, write or timeout failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect to {0} timed out")]
    ConnectTimeout(Id),

    #[error("read from {0} timed out")]
    ReadTimeout(Id),

    #[error("write to {0} timed out")]
    WriteTimeout(Id),
}

/// Unknown type byte, truncated frame or over-length xlist.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown frame type byte {0:#04x}")]
    UnknownFrameType(u8),

    #[error("truncated frame")]
    Truncated,

    #[error("xlist length {0} exceeds the 1-byte wire limit")]
    XListTooLong(usize),

    #[error("unexpected reply byte {0:#04x} during handshake")]
    UnexpectedReply(u8),
}

/// Illegal requests against the node's own state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("{0} is already in the active view")]
    AlreadyActive(Id),
}

/// A neighbour request was declined by its recipient.
#[derive(Debug, Error)]
#[error("neighbour request to {0} was declined")]
pub struct DeclineError(pub Id);

/// Unifies the above for call sites that need a single `Result` type, such
/// as the connection manager's handshake functions (§4.3).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Decline(#[from] DeclineError),
}
