//! Client error types.

use muxcall_transport::TransportError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("dial {addr}: {message}")]
    Dial { addr: String, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("reconnecting")]
    Reconnecting,

    #[error("client closed")]
    Closed,
}

impl ClientError {
    /// Whether the operation may succeed if retried on the same client.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Reconnecting => true,
            ClientError::Transport(TransportError::Timeout) => true,
            ClientError::Transport(TransportError::Closed) => true,
            _ => false,
        }
    }
}
