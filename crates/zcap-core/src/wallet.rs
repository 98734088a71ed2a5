//! Software-custodied secp256k1 wallet.
//!
//! The keypair is stored as one JSON record `{private_key, address}` under
//! `wallet.keypair`. A stored record that cannot be decoded is reported as
//! `InvalidKeyData` rather than regenerated: the address is bound to an
//! issued access credential and a new one would not match server state.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use zcap_crypto::wallet::{verify_personal_signature, WalletKey, PRIVATE_KEY_LEN};

use crate::errors::KeyError;
use crate::ledger::{fetch_balances, Balances, Ledger, RetryPolicy, TokenContracts};
use crate::platform::SessionIdentity;
use crate::store::{accounts, CredentialStore, StoreKey};

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct WalletRecord {
    private_key: String,
    address: String,
}

/// Raw private key bytes handed to other components. Zeroized on drop.
pub struct ExportedKey(Zeroizing<[u8; PRIVATE_KEY_LEN]>);

impl ExportedKey {
    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for ExportedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExportedKey(<redacted>)")
    }
}

/// Balance lookup settings.
#[derive(Clone)]
pub struct LedgerSettings {
    pub ledger: Arc<dyn Ledger>,
    pub tokens: TokenContracts,
    pub retry: RetryPolicy,
}

pub struct WalletKeyManager {
    store: Arc<dyn CredentialStore>,
    key: StoreKey,
    ledger: Option<LedgerSettings>,
    create_lock: Mutex<()>,
}

impl WalletKeyManager {
    pub fn new(store: Arc<dyn CredentialStore>, namespace: &str) -> Self {
        Self {
            store,
            key: StoreKey::new(namespace, accounts::WALLET),
            ledger: None,
            create_lock: Mutex::new(()),
        }
    }

    pub fn with_ledger(mut self, ledger: LedgerSettings) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Return the stored wallet's address, creating a wallet first if none exists.
    pub fn create_or_load_wallet(&self) -> Result<String, KeyError> {
        if let Some(key) = self.load()? {
            return Ok(key.address());
        }

        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| KeyError::KeyStorageFailed("wallet lock poisoned".into()))?;
        if let Some(key) = self.load()? {
            return Ok(key.address());
        }

        let key = WalletKey::generate();
        let record = WalletRecord {
            private_key: hex::encode(key.private_key_bytes().as_ref()),
            address: key.address(),
        };
        let bytes = Zeroizing::new(
            serde_json::to_vec(&record).map_err(|e| KeyError::KeyStorageFailed(e.to_string()))?,
        );
        self.store
            .replace(&self.key, &bytes)
            .map_err(|e| KeyError::KeyStorageFailed(e.to_string()))?;

        info!(address = %record.address, "created wallet");
        Ok(record.address.clone())
    }

    /// Address of the stored wallet, without creating one.
    pub fn stored_address(&self) -> Result<Option<String>, KeyError> {
        Ok(self.load()?.map(|k| k.address()))
    }

    pub fn has_wallet(&self) -> bool {
        matches!(self.store.contains(&self.key), Ok(true))
    }

    /// EIP-191 signature over the UTF-8 bytes of `message`, hex with `0x`.
    pub async fn sign_message(&self, message: &str) -> Result<String, KeyError> {
        let key = self.load()?.ok_or(KeyError::NoWalletFound)?;
        let message = message.to_owned();
        tokio::task::spawn_blocking(move || key.sign_personal_message_hex(message.as_bytes()))
            .await
            .map_err(|e| KeyError::SigningFailed(e.to_string()))?
            .map_err(KeyError::from)
    }

    /// True when `signature` is this wallet's signature of `message`.
    pub fn verify_message(&self, message: &str, signature: &str) -> Result<bool, KeyError> {
        let address = self.stored_address()?.ok_or(KeyError::NoWalletFound)?;
        Ok(verify_personal_signature(message.as_bytes(), signature, &address))
    }

    /// Native and token balances of the stored wallet.
    pub async fn get_balances(&self) -> Result<Balances, KeyError> {
        let address = self.stored_address()?.ok_or(KeyError::NoWalletFound)?;
        let settings = self
            .ledger
            .as_ref()
            .ok_or_else(|| KeyError::KeyRetrievalFailed("no ledger configured".into()))?;
        debug!(address = %address, "querying balances");
        Ok(fetch_balances(settings.ledger.as_ref(), &settings.tokens, &address, settings.retry).await?)
    }

    /// Raw private key bytes.
    pub fn get_private_key(&self) -> Result<ExportedKey, KeyError> {
        let key = self.load()?.ok_or(KeyError::NoWalletFound)?;
        Ok(ExportedKey(key.private_key_bytes()))
    }

    /// Identity used to open threshold-encryption sessions.
    pub fn session_identity(&self) -> Result<SessionIdentity, KeyError> {
        let key = self.load()?.ok_or(KeyError::NoWalletFound)?;
        Ok(SessionIdentity {
            private_key: key.private_key_bytes(),
            address: key.address(),
        })
    }

    /// Remove the wallet. Absent counts as success.
    pub fn delete_wallet(&self) -> bool {
        match self.store.delete(&self.key) {
            Ok(removed) => {
                if removed {
                    info!("deleted wallet");
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to delete wallet");
                false
            }
        }
    }

    fn load(&self) -> Result<Option<WalletKey>, KeyError> {
        let Some(bytes) = self.store.get(&self.key)? else {
            return Ok(None);
        };
        let record: WalletRecord = serde_json::from_slice(&bytes)
            .map_err(|e| KeyError::InvalidKeyData(format!("wallet record: {}", e)))?;
        let raw = Zeroizing::new(
            hex::decode(&record.private_key)
                .map_err(|e| KeyError::InvalidKeyData(format!("wallet key: {}", e)))?,
        );
        let key = WalletKey::from_bytes(&raw)?;
        if key.address() != record.address {
            return Err(KeyError::InvalidKeyData(
                "stored address does not match key".into(),
            ));
        }
        Ok(Some(key))
    }
}
