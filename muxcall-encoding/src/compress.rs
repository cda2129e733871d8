//! Payload compression with appended-CRC integrity.
//!
//! The compresser operates on opaque byte arrays: an IEEE CRC-32 of the
//! cleartext is appended before compression and verified (then stripped)
//! after decompression, so corruption that survives the container format is
//! still caught.

use crate::error::EncodingError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

/// Supported compression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressMethod {
    Gzip,
    Zstd,
}

/// A pooled, level-aware compresser.
///
/// Zstd encoder contexts are reused through a pool keyed by compression
/// level; gzip encoders are one-shot in `flate2` and built per call. Both
/// paths are safe for concurrent use.
pub struct Compressor {
    method: CompressMethod,
    level: AtomicI32,
    zstd_encoders: Mutex<HashMap<i32, Vec<zstd::bulk::Compressor<'static>>>>,
}

impl Compressor {
    /// Creates a compresser with the algorithm's default level.
    pub fn new(method: CompressMethod) -> Self {
        let level = match method {
            CompressMethod::Gzip => 6,
            CompressMethod::Zstd => zstd::DEFAULT_COMPRESSION_LEVEL,
        };
        Self {
            method,
            level: AtomicI32::new(level),
            zstd_encoders: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_level(self, level: i32) -> Self {
        self.set_level(level);
        self
    }

    /// Sets the compression level for subsequent calls.
    pub fn set_level(&self, level: i32) {
        self.level.store(level, Ordering::Relaxed);
    }

    pub fn method(&self) -> CompressMethod {
        self.method
    }

    /// Appends the cleartext CRC and compresses.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, EncodingError> {
        let mut plain = Vec::with_capacity(data.len() + 4);
        plain.extend_from_slice(data);
        plain.extend_from_slice(&crc32fast::hash(data).to_be_bytes());

        let level = self.level.load(Ordering::Relaxed);
        match self.method {
            CompressMethod::Gzip => {
                let gz_level = level.clamp(0, 9) as u32;
                let mut encoder =
                    GzEncoder::new(Vec::new(), flate2::Compression::new(gz_level));
                encoder.write_all(&plain).map_err(compress_err)?;
                encoder.finish().map_err(compress_err)
            }
            CompressMethod::Zstd => {
                let mut encoder = self.checkout_zstd(level)?;
                let result = encoder.compress(&plain).map_err(compress_err);
                self.release_zstd(level, encoder);
                result
            }
        }
    }

    /// Decompresses, then verifies and strips the cleartext CRC.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, EncodingError> {
        let plain = match self.method {
            CompressMethod::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out).map_err(compress_err)?;
                out
            }
            CompressMethod::Zstd => zstd::stream::decode_all(data).map_err(compress_err)?,
        };

        if plain.len() < 4 {
            return Err(EncodingError::CompressChecksum);
        }
        let (clear, crc_bytes) = plain.split_at(plain.len() - 4);
        let expected = u32::from_be_bytes(crc_bytes.try_into().expect("4-byte slice"));
        if crc32fast::hash(clear) != expected {
            return Err(EncodingError::CompressChecksum);
        }
        Ok(clear.to_vec())
    }

    fn checkout_zstd(
        &self,
        level: i32,
    ) -> Result<zstd::bulk::Compressor<'static>, EncodingError> {
        let mut pool = self.zstd_encoders.lock().expect("zstd pool lock");
        if let Some(encoder) = pool.entry(level).or_default().pop() {
            return Ok(encoder);
        }
        drop(pool);
        zstd::bulk::Compressor::new(level).map_err(compress_err)
    }

    fn release_zstd(&self, level: i32, encoder: zstd::bulk::Compressor<'static>) {
        let mut pool = self.zstd_encoders.lock().expect("zstd pool lock");
        pool.entry(level).or_default().push(encoder);
    }
}

fn compress_err(e: std::io::Error) -> EncodingError {
    EncodingError::Compress(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_roundtrip() {
        let cp = Compressor::new(CompressMethod::Gzip);
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = cp.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(cp.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_zstd_roundtrip() {
        let cp = Compressor::new(CompressMethod::Zstd);
        let data = b"0123456789".repeat(200);
        let compressed = cp.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(cp.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_empty_input_roundtrip() {
        let cp = Compressor::new(CompressMethod::Gzip);
        let compressed = cp.compress(b"").unwrap();
        assert_eq!(cp.decompress(&compressed).unwrap(), b"");
    }

    #[test]
    fn test_corrupted_container_rejected() {
        let cp = Compressor::new(CompressMethod::Zstd);
        let mut compressed = cp.compress(b"some payload bytes").unwrap();
        let mid = compressed.len() / 2;
        compressed[mid] ^= 0xFF;
        assert!(cp.decompress(&compressed).is_err());
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        // A well-formed gzip container whose embedded cleartext CRC is wrong.
        let mut inner = b"cleartext".to_vec();
        inner.extend_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&inner).unwrap();
        let forged = encoder.finish().unwrap();

        let cp = Compressor::new(CompressMethod::Gzip);
        assert_eq!(
            cp.decompress(&forged).unwrap_err(),
            EncodingError::CompressChecksum
        );
    }

    #[test]
    fn test_zstd_pool_reuse_across_levels() {
        let cp = Compressor::new(CompressMethod::Zstd);
        let data = b"abcdef".repeat(100);

        let at_default = cp.compress(&data).unwrap();
        cp.set_level(19);
        let at_19 = cp.compress(&data).unwrap();
        cp.set_level(zstd::DEFAULT_COMPRESSION_LEVEL);
        let again = cp.compress(&data).unwrap();

        assert_eq!(cp.decompress(&at_default).unwrap(), data);
        assert_eq!(cp.decompress(&at_19).unwrap(), data);
        assert_eq!(cp.decompress(&again).unwrap(), data);
    }
}
