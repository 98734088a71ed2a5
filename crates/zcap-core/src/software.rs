//! Software implementations of the platform seams for hosts without secure
//! hardware (development machines, CI, the CLI).
//!
//! Keys are ordinary P-256 keys kept in the credential store, so they offer
//! none of the guarantees of a hardware boundary. `is_hardware_backed()`
//! reports that honestly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use zcap_crypto::device::{verify_device_signature, DeviceSigningKey};
use zcap_crypto::hash::sha256;
use zcap_crypto::utils::{b64_decode, b64_encode};

use crate::errors::{AttestationError, KeyError, StoreError};
use crate::platform::{AccessPolicy, AttestationService, HardwareKeystore};
use crate::store::{CredentialStore, StoreKey};

// ============================================================================
// Software keystore
// ============================================================================

/// P-256 keystore backed by a [`CredentialStore`]. Tags are used as account names.
pub struct SoftwareKeystore {
    store: Arc<dyn CredentialStore>,
    namespace: String,
}

impl SoftwareKeystore {
    pub fn new(store: Arc<dyn CredentialStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    fn key(&self, tag: &str) -> StoreKey {
        StoreKey::new(&self.namespace, tag)
    }

    fn load(&self, tag: &str) -> Result<Option<DeviceSigningKey>, KeyError> {
        match self.store.get(&self.key(tag))? {
            Some(bytes) => Ok(Some(DeviceSigningKey::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl HardwareKeystore for SoftwareKeystore {
    fn is_available(&self) -> bool {
        true
    }

    fn supports_signing(&self) -> bool {
        true
    }

    fn is_hardware_backed(&self) -> bool {
        false
    }

    async fn generate_key(&self, tag: &str, policy: AccessPolicy) -> Result<Vec<u8>, KeyError> {
        let key = DeviceSigningKey::generate();
        match self.store.set(&self.key(tag), &key.to_bytes()) {
            Ok(()) => {
                debug!(tag, ?policy, "generated software device key");
                Ok(key.public_key())
            }
            // Lost a creation race; the stored key wins.
            Err(StoreError::AlreadyExists(_)) => self
                .load(tag)?
                .map(|k| k.public_key())
                .ok_or(KeyError::NoKeyFound),
            Err(e) => Err(KeyError::KeyStorageFailed(e.to_string())),
        }
    }

    fn public_key(&self, tag: &str) -> Result<Option<Vec<u8>>, KeyError> {
        Ok(self.load(tag)?.map(|k| k.public_key()))
    }

    async fn sign(&self, tag: &str, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        let key = self.load(tag)?.ok_or(KeyError::NoKeyFound)?;
        Ok(key.sign(data))
    }

    fn delete_key(&self, tag: &str) -> Result<bool, KeyError> {
        self.store
            .delete(&self.key(tag))
            .map_err(|e| KeyError::KeyStorageFailed(e.to_string()))
    }
}

// ============================================================================
// Software attestation
// ============================================================================

/// Statement format produced by [`SoftwareAttestor`].
pub const SOFTWARE_ATTESTATION_FORMAT: &str = "zcap-software";

/// JSON attestation statement: the attestation key signs the client data hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareStatement {
    pub fmt: String,
    pub key_id: String,
    pub public_key: String,
    pub client_data_hash: String,
    pub signature: String,
}

/// Attestation service that self-signs statements with in-memory P-256 keys.
pub struct SoftwareAttestor {
    keys: Mutex<HashMap<String, DeviceSigningKey>>,
    supported: bool,
}

impl Default for SoftwareAttestor {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareAttestor {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            supported: true,
        }
    }

    /// An attestor on a device without attestation support.
    pub fn unsupported() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            supported: false,
        }
    }
}

#[async_trait]
impl AttestationService for SoftwareAttestor {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn generate_key(&self) -> Result<String, AttestationError> {
        if !self.supported {
            return Err(AttestationError::Unsupported);
        }
        let key = DeviceSigningKey::generate();
        let key_id = b64_encode(&sha256(&key.public_key()));
        self.keys
            .lock()
            .map_err(|_| AttestationError::KeyGenFailed("attestor lock poisoned".into()))?
            .insert(key_id.clone(), key);
        Ok(key_id)
    }

    async fn attest_key(
        &self,
        key_id: &str,
        client_data_hash: &[u8; 32],
    ) -> Result<Vec<u8>, AttestationError> {
        let key = self
            .keys
            .lock()
            .map_err(|_| AttestationError::AttestationFailed("attestor lock poisoned".into()))?
            .get(key_id)
            .cloned()
            .ok_or_else(|| AttestationError::AttestationFailed(format!("unknown key id {}", key_id)))?;

        let statement = SoftwareStatement {
            fmt: SOFTWARE_ATTESTATION_FORMAT.to_string(),
            key_id: key_id.to_string(),
            public_key: b64_encode(&key.public_key()),
            client_data_hash: b64_encode(client_data_hash),
            signature: b64_encode(&key.sign(client_data_hash)),
        };
        serde_json::to_vec(&statement).map_err(|e| AttestationError::AttestationFailed(e.to_string()))
    }
}

/// Check a software statement and return the client data hash it commits to.
pub fn verify_software_statement(statement: &[u8]) -> Result<[u8; 32], AttestationError> {
    let invalid = |msg: &str| AttestationError::AttestationFailed(msg.to_string());

    let st: SoftwareStatement =
        serde_json::from_slice(statement).map_err(|e| invalid(&e.to_string()))?;
    if st.fmt != SOFTWARE_ATTESTATION_FORMAT {
        return Err(invalid("unknown statement format"));
    }
    let public_key = b64_decode(&st.public_key).map_err(|_| invalid("bad public key"))?;
    let hash = b64_decode(&st.client_data_hash).map_err(|_| invalid("bad client data hash"))?;
    let signature = b64_decode(&st.signature).map_err(|_| invalid("bad signature"))?;

    if b64_encode(&sha256(&public_key)) != st.key_id {
        return Err(invalid("key id does not match public key"));
    }
    verify_device_signature(&public_key, &hash, &signature)
        .map_err(|e| invalid(&e.to_string()))?;

    hash.try_into().map_err(|_| invalid("client data hash must be 32 bytes"))
}

// ============================================================================
// Unit Tests
// ============================================================================
