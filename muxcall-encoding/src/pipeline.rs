//! The composed encode/decode path: codec ↔ compress ↔ encrypt.

use crate::codec::Payload;
use crate::compress::Compressor;
use crate::encrypt::Encrypter;
use crate::error::EncodingError;
use std::sync::Arc;

/// A payload pipeline with optional compression and encryption stages.
///
/// Outbound: codec serialize → compress → encrypt. Inbound: decrypt →
/// decompress → codec deserialize. Cloning shares the underlying stages, so
/// a reconnecting client can carry its pipeline onto a fresh transport.
#[derive(Clone, Default)]
pub struct Pipeline {
    compressor: Option<Arc<Compressor>>,
    encrypter: Option<Arc<Encrypter>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compressor(mut self, compressor: Compressor) -> Self {
        self.compressor = Some(Arc::new(compressor));
        self
    }

    pub fn with_encrypter(mut self, encrypter: Encrypter) -> Self {
        self.encrypter = Some(Arc::new(encrypter));
        self
    }

    /// Serializes a payload through every configured stage.
    pub fn encode(&self, payload: &Payload) -> Result<Vec<u8>, EncodingError> {
        let mut data = payload.encode();
        if let Some(compressor) = &self.compressor {
            data = compressor.compress(&data)?;
        }
        if let Some(encrypter) = &self.encrypter {
            data = encrypter.encrypt(&data);
        }
        Ok(data)
    }

    /// Runs every configured stage in reverse and deserializes.
    pub fn decode(&self, data: &[u8]) -> Result<Payload, EncodingError> {
        let mut data = data.to_vec();
        if let Some(encrypter) = &self.encrypter {
            data = encrypter.decrypt(&data)?;
        }
        if let Some(compressor) = &self.compressor {
            data = compressor.decompress(&data)?;
        }
        Payload::decode(&data)
    }
}
