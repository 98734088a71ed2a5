//! Symmetric content key: a 256-bit ChaCha20-Poly1305 key plus a 96-bit nonce,
//! stored as one fixed 44-byte blob.
//!
//! Sealed messages carry their own nonce (`nonce || ciphertext || tag`) and
//! every seal draws a fresh one. The nonce kept in the record belongs to the
//! escrowed blob format.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use getrandom::getrandom;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Length of the stored `key || nonce` blob.
pub const COMBINED_LEN: usize = KEY_LEN + NONCE_LEN;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ContentKeyError {
    #[error("invalid key data: expected {expected} bytes, got {got}")]
    InvalidKeyData { expected: usize, got: usize },
    #[error("invalid encrypted data")]
    InvalidEncryptedData,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("random source unavailable")]
    Rng,
}

/// One content key record. Exactly one is active per installation.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ContentKeyRecord {
    key: [u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
}

impl std::fmt::Debug for ContentKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKeyRecord")
            .field("key", &"<redacted>")
            .field("nonce", &hex::encode(self.nonce))
            .finish()
    }
}

impl ContentKeyRecord {
    /// Generate a fresh key and nonce from the OS random source.
    pub fn generate() -> Result<Self, ContentKeyError> {
        let mut key = [0u8; KEY_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        getrandom(&mut key).map_err(|_| ContentKeyError::Rng)?;
        getrandom(&mut nonce).map_err(|_| ContentKeyError::Rng)?;
        Ok(Self { key, nonce })
    }

    pub fn from_parts(key: [u8; KEY_LEN], nonce: [u8; NONCE_LEN]) -> Self {
        Self { key, nonce }
    }

    pub fn key_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn nonce_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Encode as the fixed 44-byte `key || nonce` blob.
    pub fn to_combined(&self) -> [u8; COMBINED_LEN] {
        let mut out = [0u8; COMBINED_LEN];
        out[..KEY_LEN].copy_from_slice(&self.key);
        out[KEY_LEN..].copy_from_slice(&self.nonce);
        out
    }

    /// Decode a stored blob. Anything but exactly 44 bytes is rejected.
    pub fn from_combined(bytes: &[u8]) -> Result<Self, ContentKeyError> {
        if bytes.len() != COMBINED_LEN {
            return Err(ContentKeyError::InvalidKeyData {
                expected: COMBINED_LEN,
                got: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        key.copy_from_slice(&bytes[..KEY_LEN]);
        nonce.copy_from_slice(&bytes[KEY_LEN..]);
        Ok(Self { key, nonce })
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }

    /// Seal `plaintext` under a fresh random nonce.
    ///
    /// Output layout: `nonce(12) || ciphertext || tag(16)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, ContentKeyError> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom(&mut nonce).map_err(|_| ContentKeyError::Rng)?;
        self.seal_with_nonce(&nonce, plaintext)
    }

    /// Seal under a caller-chosen nonce. A nonce must never be reused with the
    /// same key for different plaintexts.
    pub fn seal_with_nonce(
        &self,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, ContentKeyError> {
        let ct = self
            .cipher()
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| ContentKeyError::EncryptFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Open a sealed message produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, ContentKeyError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(ContentKeyError::InvalidEncryptedData);
        }
        let (nonce, ct) = sealed.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|_| ContentKeyError::InvalidEncryptedData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_layout() {
        let rec = ContentKeyRecord::from_parts([1u8; 32], [2u8; 12]);
        let combined = rec.to_combined();
        assert_eq!(combined.len(), 44);
        assert_eq!(&combined[..32], &[1u8; 32]);
        assert_eq!(&combined[32..], &[2u8; 12]);
        assert_eq!(ContentKeyRecord::from_combined(&combined).unwrap(), rec);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        for len in [0usize, 1, 32, 43, 45, 64] {
            let err = ContentKeyRecord::from_combined(&vec![0u8; len]).unwrap_err();
            assert_eq!(err, ContentKeyError::InvalidKeyData { expected: 44, got: len });
        }
    }

    #[test]
    fn test_seal_open_round_trip() {
        let rec = ContentKeyRecord::generate().unwrap();
        let sealed = rec.seal(b"photo bytes").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + b"photo bytes".len() + TAG_LEN);
        assert_eq!(rec.open(&sealed).unwrap(), b"photo bytes");
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let rec = ContentKeyRecord::generate().unwrap();
        let a = rec.seal(b"same").unwrap();
        let b = rec.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tamper_detected() {
        let rec = ContentKeyRecord::generate().unwrap();
        let mut sealed = rec.seal(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(rec.open(&sealed), Err(ContentKeyError::InvalidEncryptedData));
    }

    #[test]
    fn test_short_input_rejected() {
        let rec = ContentKeyRecord::generate().unwrap();
        assert_eq!(rec.open(&[0u8; 27]), Err(ContentKeyError::InvalidEncryptedData));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let a = ContentKeyRecord::generate().unwrap();
        let b = ContentKeyRecord::generate().unwrap();
        let sealed = a.seal(b"secret").unwrap();
        assert!(b.open(&sealed).is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let rec = ContentKeyRecord::from_parts([0xAB; 32], [0u8; 12]);
        let dbg = format!("{:?}", rec);
        assert!(!dbg.contains(&"ab".repeat(32)));
        assert!(dbg.contains("redacted"));
    }
}
