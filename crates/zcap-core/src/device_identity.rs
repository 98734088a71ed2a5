//! Hardware-isolated device signing key.
//!
//! The private half never leaves the [`HardwareKeystore`]; this manager only
//! sees the public key and signatures.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use zcap_crypto::device::verify_device_signature;
use zcap_crypto::utils::b64_encode;

use crate::errors::KeyError;
use crate::platform::{AccessPolicy, HardwareKeystore};
use crate::store::accounts;

pub struct DeviceIdentityKeyManager {
    keystore: Arc<dyn HardwareKeystore>,
    tag: String,
    generate_lock: Mutex<()>,
}

impl DeviceIdentityKeyManager {
    pub fn new(keystore: Arc<dyn HardwareKeystore>) -> Self {
        Self::with_tag(keystore, accounts::HARDWARE_KEY)
    }

    pub fn with_tag(keystore: Arc<dyn HardwareKeystore>, tag: impl Into<String>) -> Self {
        Self {
            keystore,
            tag: tag.into(),
            generate_lock: Mutex::new(()),
        }
    }

    /// Return the existing public key, or generate a keypair and return its
    /// public key. Idempotent.
    pub async fn ensure_key(&self) -> Result<Vec<u8>, KeyError> {
        if let Some(pk) = self.public_key()? {
            return Ok(pk);
        }

        let _guard = self.generate_lock.lock().await;
        if let Some(pk) = self.public_key()? {
            return Ok(pk);
        }
        if !self.keystore.is_available() {
            return Err(KeyError::SecureHardwareUnavailable);
        }

        let pk = self
            .keystore
            .generate_key(&self.tag, AccessPolicy::WhenUnlockedThisDeviceOnly)
            .await
            .map_err(|e| match e {
                KeyError::KeyGenerationFailed(_) | KeyError::SecureHardwareUnavailable => e,
                other => KeyError::KeyGenerationFailed(other.to_string()),
            })?;
        info!(
            hardware_backed = self.keystore.is_hardware_backed(),
            "generated device identity key"
        );
        Ok(pk)
    }

    /// Public key without generating one.
    pub fn public_key(&self) -> Result<Option<Vec<u8>>, KeyError> {
        self.keystore.public_key(&self.tag)
    }

    /// Base64 of the uncompressed public key, as sent on the wire.
    pub fn public_key_base64(&self) -> Result<Option<String>, KeyError> {
        Ok(self.public_key()?.map(|pk| b64_encode(&pk)))
    }

    pub fn has_key(&self) -> bool {
        matches!(self.public_key(), Ok(Some(_)))
    }

    /// DER ECDSA-SHA256 signature over `data`.
    pub async fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        if !self.keystore.supports_signing() {
            return Err(KeyError::SigningUnsupported);
        }
        if self.public_key()?.is_none() {
            return Err(KeyError::NoKeyFound);
        }
        self.keystore
            .sign(&self.tag, data)
            .await
            .map_err(|e| match e {
                KeyError::NoKeyFound | KeyError::SigningUnsupported | KeyError::SigningFailed(_) => e,
                other => KeyError::SigningFailed(other.to_string()),
            })
    }

    /// Check a signature made by this device's key.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
        let pk = self.public_key()?.ok_or(KeyError::NoKeyFound)?;
        Ok(verify_device_signature(&pk, data, signature).is_ok())
    }

    /// Remove the key. Absent counts as success.
    pub fn delete_key(&self) -> bool {
        match self.keystore.delete_key(&self.tag) {
            Ok(removed) => {
                if removed {
                    info!("deleted device identity key");
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to delete device identity key");
                false
            }
        }
    }
}
