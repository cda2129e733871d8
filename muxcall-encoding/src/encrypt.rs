//! Symmetric payload encryption with appended-CRC integrity.
//!
//! Block ciphers in CBC mode with a fixed IV derived from the user key. The
//! key string is repeated until it covers `key len + block len` bytes; the
//! first `key len` bytes become the cipher key and the next `block len` the
//! IV. An IEEE CRC-32 of the cleartext is appended before PKCS#7 padding and
//! verified (then stripped) after decryption.

use crate::error::EncodingError;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type TdesCbcEnc = cbc::Encryptor<des::TdesEde3>;
type TdesCbcDec = cbc::Decryptor<des::TdesEde3>;

/// Supported ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMethod {
    /// AES-256 (32-byte key, 16-byte block).
    Aes256,
    /// Triple DES (24-byte key, 8-byte block).
    TripleDes,
}

enum Keys {
    Aes256 { key: [u8; 32], iv: [u8; 16] },
    TripleDes { key: [u8; 24], iv: [u8; 8] },
}

/// A fixed-key payload encrypter.
pub struct Encrypter {
    keys: Keys,
}

impl std::fmt::Debug for Encrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encrypter").finish_non_exhaustive()
    }
}

impl Encrypter {
    /// Derives key material from `key` and builds an encrypter.
    pub fn new(method: CipherMethod, key: &str) -> Result<Self, EncodingError> {
        if key.is_empty() {
            return Err(EncodingError::EmptyKey);
        }

        let keys = match method {
            CipherMethod::Aes256 => {
                let material = stretch(key.as_bytes(), 32 + 16);
                Keys::Aes256 {
                    key: material[..32].try_into().expect("sized above"),
                    iv: material[32..48].try_into().expect("sized above"),
                }
            }
            CipherMethod::TripleDes => {
                let material = stretch(key.as_bytes(), 24 + 8);
                Keys::TripleDes {
                    key: material[..24].try_into().expect("sized above"),
                    iv: material[24..32].try_into().expect("sized above"),
                }
            }
        };
        Ok(Self { keys })
    }

    /// The cipher block size in bytes.
    pub fn block_size(&self) -> usize {
        match self.keys {
            Keys::Aes256 { .. } => 16,
            Keys::TripleDes { .. } => 8,
        }
    }

    /// Appends the cleartext CRC, pads, and encrypts.
    pub fn encrypt(&self, src: &[u8]) -> Vec<u8> {
        let mut plain = Vec::with_capacity(src.len() + 4 + self.block_size());
        plain.extend_from_slice(src);
        plain.extend_from_slice(&crc32fast::hash(src).to_be_bytes());

        match &self.keys {
            Keys::Aes256 { key, iv } => Aes256CbcEnc::new(key.into(), iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(&plain),
            Keys::TripleDes { key, iv } => TdesCbcEnc::new(key.into(), iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(&plain),
        }
    }

    /// Decrypts, unpads, then verifies and strips the cleartext CRC.
    pub fn decrypt(&self, src: &[u8]) -> Result<Vec<u8>, EncodingError> {
        if src.is_empty() {
            return Ok(Vec::new());
        }
        let block = self.block_size();
        if src.len() % block != 0 {
            return Err(EncodingError::BadBlockSize {
                len: src.len(),
                block,
            });
        }

        let plain = match &self.keys {
            Keys::Aes256 { key, iv } => Aes256CbcDec::new(key.into(), iv.into())
                .decrypt_padded_vec_mut::<Pkcs7>(src)
                .map_err(|_| EncodingError::EncryptChecksum)?,
            Keys::TripleDes { key, iv } => TdesCbcDec::new(key.into(), iv.into())
                .decrypt_padded_vec_mut::<Pkcs7>(src)
                .map_err(|_| EncodingError::EncryptChecksum)?,
        };

        if plain.len() < 4 {
            return Err(EncodingError::EncryptChecksum);
        }
        let (clear, crc_bytes) = plain.split_at(plain.len() - 4);
        let expected = u32::from_be_bytes(crc_bytes.try_into().expect("4-byte slice"));
        if crc32fast::hash(clear) != expected {
            return Err(EncodingError::EncryptChecksum);
        }
        Ok(clear.to_vec())
    }
}

/// Repeats `key` until it covers at least `len` bytes.
fn stretch(key: &[u8], len: usize) -> Vec<u8> {
    let mut material = Vec::with_capacity(len + key.len());
    while material.len() < len {
        material.extend_from_slice(key);
    }
    material
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_roundtrip() {
        let enc = Encrypter::new(CipherMethod::Aes256, "hello").unwrap();
        let data = b"attack at dawn";
        let ciphertext = enc.encrypt(data);
        assert_ne!(&ciphertext[..], &data[..]);
        assert_eq!(ciphertext.len() % 16, 0);
        assert_eq!(enc.decrypt(&ciphertext).unwrap(), data);
    }

    #[test]
    fn test_3des_roundtrip() {
        let enc = Encrypter::new(CipherMethod::TripleDes, "secret key").unwrap();
        let data = vec![0x5Au8; 1000];
        let ciphertext = enc.encrypt(&data);
        assert_eq!(ciphertext.len() % 8, 0);
        assert_eq!(enc.decrypt(&ciphertext).unwrap(), data);
    }

    #[test]
    fn test_ciphertext_hides_plaintext() {
        let enc = Encrypter::new(CipherMethod::Aes256, "hello").unwrap();
        let ciphertext = enc.encrypt(b"finding this would be bad");
        let needle = b"finding";
        assert!(!ciphertext
            .windows(needle.len())
            .any(|w| w == needle));
    }

    #[test]
    fn test_corruption_detected() {
        let enc = Encrypter::new(CipherMethod::Aes256, "k").unwrap();
        let mut ciphertext = enc.encrypt(b"payload under test");
        ciphertext[0] ^= 0x80;
        assert!(enc.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_bad_block_size() {
        let enc = Encrypter::new(CipherMethod::Aes256, "k").unwrap();
        let err = enc.decrypt(&[0u8; 17]).unwrap_err();
        assert_eq!(
            err,
            EncodingError::BadBlockSize {
                len: 17,
                block: 16
            }
        );
    }

    #[test]
    fn test_empty_ciphertext_passes_through() {
        let enc = Encrypter::new(CipherMethod::TripleDes, "k").unwrap();
        assert_eq!(enc.decrypt(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_empty_key_rejected() {
        assert_eq!(
            Encrypter::new(CipherMethod::Aes256, "").unwrap_err(),
            EncodingError::EmptyKey
        );
    }

    #[test]
    fn test_key_stretching_is_cyclic() {
        let material = stretch(b"ab", 5);
        assert!(material.len() >= 5);
        assert_eq!(&material[..6], b"ababab");
    }

    #[test]
    fn test_same_key_same_ciphertext() {
        // Fixed IV derivation means two encrypters from the same key string
        // are wire-compatible.
        let a = Encrypter::new(CipherMethod::Aes256, "shared").unwrap();
        let b = Encrypter::new(CipherMethod::Aes256, "shared").unwrap();
        let data = b"deterministic";
        assert_eq!(a.encrypt(data), b.encrypt(data));
        assert_eq!(b.decrypt(&a.encrypt(data)).unwrap(), data);
    }

    #[test]
    fn test_different_keys_do_not_interoperate() {
        let a = Encrypter::new(CipherMethod::Aes256, "alpha").unwrap();
        let b = Encrypter::new(CipherMethod::Aes256, "beta").unwrap();
        assert!(b.decrypt(&a.encrypt(b"data")).is_err());
    }
}
