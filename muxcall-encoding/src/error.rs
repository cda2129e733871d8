//! Encoding error types.

use thiserror::Error;

/// Errors produced by the payload pipeline.
///
/// Decode-side failures are connection-fatal for the transport; all variants
/// are `Clone` so they can live in a connection's fatal-error slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("unsupported payload type: {0}")]
    UnsupportedType(u8),

    #[error("empty payload")]
    EmptyPayload,

    #[error("malformed http message: {0}")]
    Http(String),

    #[error("compress: {0}")]
    Compress(String),

    #[error("compress: invalid checksum")]
    CompressChecksum,

    #[error("encrypt: invalid block size: {len} bytes is not a multiple of {block}")]
    BadBlockSize { len: usize, block: usize },

    #[error("encrypt: invalid checksum")]
    EncryptChecksum,

    #[error("encrypt: empty key")]
    EmptyKey,
}
