//! # muxcall-encoding
//!
//! Payload pipeline for the muxcall transport.
//!
//! This crate provides:
//! - A type-tagged payload codec (raw bytes, HTTP request, HTTP response)
//! - HTTP/1.x wire-form message types
//! - Optional gzip/zstd compression with appended-CRC integrity
//! - Optional AES-256-CBC / 3DES-CBC encryption with appended-CRC integrity
//! - The composed encode/decode [`Pipeline`]

pub mod codec;
pub mod compress;
pub mod encrypt;
pub mod error;
pub mod http;
pub mod pipeline;

pub use codec::Payload;
pub use compress::{CompressMethod, Compressor};
pub use encrypt::{CipherMethod, Encrypter};
pub use error::EncodingError;
pub use http::{Headers, HttpRequest, HttpResponse};
pub use pipeline::Pipeline;
