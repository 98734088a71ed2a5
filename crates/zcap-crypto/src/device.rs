//! P-256 device signing keys.
//!
//! Hardware keystores hold the real device key; this module provides the
//! matching verification and a software signer for hosts without secure
//! hardware. Signatures are ECDSA over SHA-256 of the message, ASN.1 DER encoded.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;
use zeroize::Zeroizing;

/// Uncompressed SEC1 public key length (0x04 || X || Y).
pub const PUBLIC_KEY_LEN: usize = 65;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DeviceKeyError {
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
}

/// Software P-256 signing key.
#[derive(Clone)]
pub struct DeviceSigningKey {
    signing: SigningKey,
}

impl std::fmt::Debug for DeviceSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSigningKey").finish_non_exhaustive()
    }
}

impl DeviceSigningKey {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeviceKeyError> {
        let signing = SigningKey::from_slice(bytes).map_err(|_| DeviceKeyError::InvalidPrivateKey)?;
        Ok(Self { signing })
    }

    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing.to_bytes().to_vec())
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.signing
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// DER-encoded ECDSA-SHA256 signature over `data`.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let sig: Signature = self.signing.sign(data);
        sig.to_der().as_bytes().to_vec()
    }
}

/// Verify a DER ECDSA-SHA256 signature against an uncompressed SEC1 public key.
pub fn verify_device_signature(
    public_key: &[u8],
    data: &[u8],
    der_signature: &[u8],
) -> Result<(), DeviceKeyError> {
    let vk =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| DeviceKeyError::InvalidPublicKey)?;
    let sig = Signature::from_der(der_signature).map_err(|_| DeviceKeyError::InvalidSignature)?;
    vk.verify(data, &sig)
        .map_err(|_| DeviceKeyError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_is_uncompressed() {
        let key = DeviceSigningKey::generate();
        let pk = key.public_key();
        assert_eq!(pk.len(), PUBLIC_KEY_LEN);
        assert_eq!(pk[0], 0x04);
    }

    #[test]
    fn test_sign_verify() {
        let key = DeviceSigningKey::generate();
        let sig = key.sign(b"digest bytes");
        assert!(verify_device_signature(&key.public_key(), b"digest bytes", &sig).is_ok());
        assert_eq!(
            verify_device_signature(&key.public_key(), b"other bytes", &sig),
            Err(DeviceKeyError::VerificationFailed)
        );
    }

    #[test]
    fn test_bytes_round_trip() {
        let key = DeviceSigningKey::generate();
        let again = DeviceSigningKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(key.public_key(), again.public_key());
    }

    #[test]
    fn test_garbage_rejected() {
        let key = DeviceSigningKey::generate();
        assert_eq!(
            verify_device_signature(&[0u8; 10], b"x", &key.sign(b"x")),
            Err(DeviceKeyError::InvalidPublicKey)
        );
        assert_eq!(
            verify_device_signature(&key.public_key(), b"x", &[0u8; 8]),
            Err(DeviceKeyError::InvalidSignature)
        );
    }
}
