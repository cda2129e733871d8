//! Transport error types.

use muxcall_encoding::EncodingError;
use muxcall_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by connections, streams, and calls.
///
/// The type is `Clone`: a connection stores its first fatal error in a slot
/// and hands the same value to every unblocked waiter. I/O errors are carried
/// as strings for that reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("connection closed")]
    Closed,

    #[error("stream closed")]
    StreamClosed,

    #[error("stream closed by remote")]
    ClosedByRemote,

    #[error("buffer too short: payload is {needed} bytes, buffer is {got}")]
    BufferTooShort { needed: usize, got: usize },

    #[error("call timeout")]
    Timeout,

    #[error("open stream timeout")]
    OpenTimeout,

    #[error("unexpected payload type on the call channel")]
    UnexpectedPayload,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}
