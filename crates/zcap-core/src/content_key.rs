//! The installation's symmetric content key and its escrow.
//!
//! Lifecycle: absent, then present but unescrowed, then present and escrowed.
//! Creation escrows the key through the threshold-encryption network before
//! the key itself is persisted, so a persisted key always has an escrow
//! record. At most one key is ever created: concurrent callers serialize on
//! an in-flight lock and late callers pick up the winner's key.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use zcap_crypto::content_key::ContentKeyRecord;

use crate::errors::{EscrowError, KeyError};
use crate::platform::{EncryptionResult, EscrowNetwork};
use crate::store::{accounts, CredentialStore, StoreKey};
use crate::wallet::WalletKeyManager;

/// Default bound on establishing an escrow session.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// The content key's combined bytes as encrypted by the threshold network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowedContentKey {
    pub ciphertext: String,
    pub data_to_encrypt_hash: String,
}

impl From<EncryptionResult> for EscrowedContentKey {
    fn from(r: EncryptionResult) -> Self {
        Self {
            ciphertext: r.ciphertext,
            data_to_encrypt_hash: r.data_to_encrypt_hash,
        }
    }
}

/// What `get_or_create_key` did about escrow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscrowMetadata {
    /// A new key was created and escrowed by this call.
    Escrowed(EscrowedContentKey),
    /// The key already existed; no escrow round-trip was made.
    AlreadyEscrowed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKeyState {
    Absent,
    PresentUnescrowed,
    PresentEscrowed,
}

pub struct ContentKeyManager {
    store: Arc<dyn CredentialStore>,
    key_entry: StoreKey,
    escrow_entry: StoreKey,
    wallet: Arc<WalletKeyManager>,
    network: Arc<dyn EscrowNetwork>,
    session_timeout: Duration,
    in_flight: Mutex<()>,
}

impl ContentKeyManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        namespace: &str,
        wallet: Arc<WalletKeyManager>,
        network: Arc<dyn EscrowNetwork>,
    ) -> Self {
        Self {
            store,
            key_entry: StoreKey::new(namespace, accounts::CONTENT_KEY),
            escrow_entry: StoreKey::new(namespace, accounts::CONTENT_ESCROW),
            wallet,
            network,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Return the installation's content key, creating and escrowing it on
    /// first use.
    pub async fn get_or_create_key(&self) -> Result<(ContentKeyRecord, EscrowMetadata), KeyError> {
        if let Some(record) = self.load_key()? {
            return Ok((record, EscrowMetadata::AlreadyEscrowed));
        }

        let _guard = self.in_flight.lock().await;
        if let Some(record) = self.load_key()? {
            debug!("content key created by concurrent caller");
            return Ok((record, EscrowMetadata::AlreadyEscrowed));
        }

        let identity = self.wallet.session_identity()?;
        let session = tokio::time::timeout(self.session_timeout, self.network.connect(&identity))
            .await
            .map_err(|_| EscrowError::Timeout(self.session_timeout))??;
        drop(identity);

        let record = ContentKeyRecord::generate()?;
        let combined = Zeroizing::new(record.to_combined());
        let escrowed = EscrowedContentKey::from(session.encrypt(combined.as_ref()).await?);

        // The escrow record goes first; the key record is the commit point.
        let escrow_json = serde_json::to_vec(&escrowed)
            .map_err(|e| KeyError::KeyStorageFailed(e.to_string()))?;
        self.store
            .replace(&self.escrow_entry, &escrow_json)
            .map_err(|e| KeyError::KeyStorageFailed(e.to_string()))?;
        self.store
            .replace(&self.key_entry, combined.as_ref())
            .map_err(|e| KeyError::KeyStorageFailed(e.to_string()))?;

        info!(hash = %truncate(&escrowed.data_to_encrypt_hash), "created and escrowed content key");
        Ok((record, EscrowMetadata::Escrowed(escrowed)))
    }

    /// Seal `plaintext` under the content key. Each call draws a fresh nonce
    /// and prefixes it to the output; the record's stored nonce is not used.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyError> {
        let record = self.load_key()?.ok_or(KeyError::NoKeyFound)?;
        Ok(record.seal(plaintext)?)
    }

    /// Open a message sealed by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyError> {
        let record = self.load_key()?.ok_or(KeyError::NoKeyFound)?;
        record
            .open(ciphertext)
            .map_err(|_| KeyError::InvalidEncryptedData)
    }

    /// The escrow record for the current key.
    pub fn escrow_record(&self) -> Result<Option<EscrowedContentKey>, KeyError> {
        let Some(bytes) = self.store.get(&self.escrow_entry)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(rec) => Ok(Some(rec)),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable escrow record");
                Ok(None)
            }
        }
    }

    pub fn has_key(&self) -> bool {
        matches!(self.load_key(), Ok(Some(_)))
    }

    pub fn state(&self) -> Result<ContentKeyState, KeyError> {
        if self.load_key()?.is_none() {
            return Ok(ContentKeyState::Absent);
        }
        Ok(match self.escrow_record()? {
            Some(_) => ContentKeyState::PresentEscrowed,
            None => ContentKeyState::PresentUnescrowed,
        })
    }

    /// Delete the local key and its escrow record. Escrow is not revoked.
    pub fn remove_key(&self) -> bool {
        let mut ok = true;
        for entry in [&self.key_entry, &self.escrow_entry] {
            if let Err(e) = self.store.delete(entry) {
                warn!(account = %entry.account, error = %e, "failed to delete content key entry");
                ok = false;
            }
        }
        if ok {
            info!("removed content key");
        }
        ok
    }

    /// Decoded key, or `None` when absent or undecodable.
    fn load_key(&self) -> Result<Option<ContentKeyRecord>, KeyError> {
        let bytes = match self.store.get(&self.key_entry) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(crate::store::StoreError::DataCorruption(msg)) => {
                warn!(%msg, "content key entry unreadable, treating as absent");
                return Ok(None);
            }
            Err(e) => return Err(KeyError::KeyRetrievalFailed(e.to_string())),
        };
        match ContentKeyRecord::from_combined(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(error = %e, "content key record malformed, treating as absent");
                Ok(None)
            }
        }
    }
}

fn truncate(s: &str) -> &str {
    s.get(..12).unwrap_or(s)
}
