//! Protocol error types.

use thiserror::Error;

/// Errors produced by the frame layer.
///
/// All variants are connection-fatal; they are `Clone` so a single stored
/// instance can be handed to every waiter on a dying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("truncated frame: connection closed with {buffered} bytes buffered")]
    TruncatedFrame { buffered: usize },
}
