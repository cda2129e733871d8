//! # muxcall-protocol
//!
//! Wire framing for the muxcall transport.
//!
//! This crate provides:
//! - The 18-byte frame header (sequence, size, CRC-32, flag)
//! - The flag bitfield carrying control bits and the 24-bit stream ID
//! - Incremental frame decoding from a byte buffer

pub mod error;
pub mod frame;

pub use error::ProtocolError;
pub use frame::{Frame, FrameDecoder, FrameFlags, FRAME_HEADER_SIZE};

/// Maximum frame payload size (the header's size field is 16 bits).
pub const MAX_PAYLOAD_SIZE: usize = 65535;
