//! Platform seams: secure hardware keystore, device attestation service and
//! the threshold-encryption network.
//!
//! Production hosts plug in their native implementations; `software` and
//! `harness` provide in-process ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::errors::{AttestationError, EscrowError, KeyError};

// ============================================================================
// Hardware keystore
// ============================================================================

/// Who may use a hardware key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    /// Usable only while the device is unlocked; never migrates to another device.
    WhenUnlockedThisDeviceOnly,
}

/// A keystore holding non-exportable P-256 signing keys, addressed by tag.
#[async_trait]
pub trait HardwareKeystore: Send + Sync {
    /// Whether a secure key store exists on this host at all.
    fn is_available(&self) -> bool;

    /// Whether ECDSA-SHA256 signing is supported by the keystore.
    fn supports_signing(&self) -> bool;

    /// Whether keys live inside a hardware security boundary.
    fn is_hardware_backed(&self) -> bool;

    /// Generate a new keypair under `tag` and return its uncompressed public key.
    /// May block on user presence.
    async fn generate_key(&self, tag: &str, policy: AccessPolicy) -> Result<Vec<u8>, KeyError>;

    /// Uncompressed public key for `tag`, if a key exists.
    fn public_key(&self, tag: &str) -> Result<Option<Vec<u8>>, KeyError>;

    /// DER ECDSA-SHA256 signature of `data` with the key under `tag`.
    async fn sign(&self, tag: &str, data: &[u8]) -> Result<Vec<u8>, KeyError>;

    /// Remove the key under `tag`. Returns whether a key was removed.
    fn delete_key(&self, tag: &str) -> Result<bool, KeyError>;
}

// ============================================================================
// Attestation service
// ============================================================================

/// Platform device-attestation service (App Attest style).
#[async_trait]
pub trait AttestationService: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Create a fresh attestation key and return its identifier.
    async fn generate_key(&self) -> Result<String, AttestationError>;

    /// Produce an attestation statement binding `key_id` to `client_data_hash`.
    async fn attest_key(
        &self,
        key_id: &str,
        client_data_hash: &[u8; 32],
    ) -> Result<Vec<u8>, AttestationError>;
}

// ============================================================================
// Threshold-encryption network
// ============================================================================

/// Session identity derived from the wallet: the key signs the session
/// handshake, the address identifies the depositor.
pub struct SessionIdentity {
    pub private_key: Zeroizing<[u8; 32]>,
    pub address: String,
}

impl std::fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Output of one threshold encryption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionResult {
    pub ciphertext: String,
    #[serde(rename = "dataToEncryptHash")]
    pub data_to_encrypt_hash: String,
}

/// A threshold-encryption network that can open authenticated sessions.
#[async_trait]
pub trait EscrowNetwork: Send + Sync {
    async fn connect(&self, identity: &SessionIdentity)
        -> Result<Box<dyn EscrowSession>, EscrowError>;
}

/// An established session.
#[async_trait]
pub trait EscrowSession: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptionResult, EscrowError>;
}
