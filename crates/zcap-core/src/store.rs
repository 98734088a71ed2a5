//! Secure credential storage.
//!
//! Every persisted artifact (wallet keypair, content key, escrow record,
//! attestation record, local settings) lives in a [`CredentialStore`],
//! addressed by `(namespace, account)`. The store is synchronous: reads and
//! writes are small and fast, and callers serialize them as needed.
//!
//! `replace` is the only way to overwrite an entry. It removes any existing
//! value and inserts the new one as one step, so readers see either the old
//! value or the new value and never two conflicting entries.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use zcap_crypto::content_key::ContentKeyRecord;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::OperationFailed(e.to_string())
    }
}

// ============================================================================
// Addressing
// ============================================================================

/// Well-known account names.
pub mod accounts {
    /// Software keystore only; hardware keystores keep their own handle.
    pub const HARDWARE_KEY: &str = "device.hardware_key";
    pub const WALLET: &str = "wallet.keypair";
    pub const CONTENT_KEY: &str = "content.key";
    pub const CONTENT_ESCROW: &str = "content.escrow";
    pub const ATTESTATION_KEY_ID: &str = "attestation.key_id";
    pub const ACCESS_NFT: &str = "attestation.access_nft";
    pub const SETTINGS: &str = "settings.local";
}

/// Default service namespace.
pub const DEFAULT_NAMESPACE: &str = "io.zcap.credentials";

/// Address of one entry in a credential store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    pub namespace: String,
    pub account: String,
}

impl StoreKey {
    pub fn new(namespace: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            account: account.into(),
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.account)
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Key/value store for credential material.
pub trait CredentialStore: Send + Sync {
    /// Read an entry. `Ok(None)` when absent.
    fn get(&self, key: &StoreKey) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError>;

    /// Insert a new entry. Fails with `AlreadyExists` if one is present.
    fn set(&self, key: &StoreKey, value: &[u8]) -> Result<(), StoreError>;

    /// Delete-if-exists then insert, as one atomic step.
    fn replace(&self, key: &StoreKey, value: &[u8]) -> Result<(), StoreError>;

    /// Remove an entry. Returns whether something was removed; absent is not an error.
    fn delete(&self, key: &StoreKey) -> Result<bool, StoreError>;

    fn contains(&self, key: &StoreKey) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

/// In-memory credential store for tests and ephemeral sessions.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    entries: RwLock<HashMap<StoreKey, Zeroizing<Vec<u8>>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accounts currently stored, sorted.
    pub fn accounts(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .entries
            .read()
            .map(|m| m.keys().map(|k| k.account.clone()).collect())
            .unwrap_or_default();
        out.sort();
        out
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::OperationFailed("store lock poisoned".to_string())
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(&self, key: &StoreKey) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &StoreKey, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        if entries.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        entries.insert(key.clone(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn replace(&self, key: &StoreKey, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.remove(key);
        entries.insert(key.clone(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &StoreKey) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        Ok(entries.remove(key).is_some())
    }
}

// ============================================================================
// File Implementation
// ============================================================================

const MASTER_KEY_FILE: &str = "master.key";
const ENTRY_EXT: &str = "cred";

/// File-backed credential store.
///
/// One file per entry under `root`, each value sealed with a store master
/// key (ChaCha20-Poly1305). Writes go to a temp file that is renamed into
/// place, and deleted entries are overwritten with zeros before removal.
pub struct FileCredentialStore {
    root: PathBuf,
    master: ContentKeyRecord,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Open (or initialize) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let master = load_or_create_master(&root)?;
        debug!(root = %root.display(), "opened credential store");
        Ok(Self {
            root,
            master,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hex-encoded namespace and account, so distinct keys never share a file.
    fn entry_path(&self, key: &StoreKey) -> PathBuf {
        self.root.join(format!(
            "{}.{}.{}",
            hex::encode(key.namespace.as_bytes()),
            hex::encode(key.account.as_bytes()),
            ENTRY_EXT
        ))
    }

    fn write_entry(&self, path: &Path, value: &[u8]) -> Result<(), StoreError> {
        let sealed = self
            .master
            .seal(value)
            .map_err(|e| StoreError::OperationFailed(e.to_string()))?;
        write_atomic(path, &sealed)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &StoreKey) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        let path = self.entry_path(key);
        let sealed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let plain = self
            .master
            .open(&sealed)
            .map_err(|_| StoreError::DataCorruption(key.to_string()))?;
        Ok(Some(Zeroizing::new(plain)))
    }

    fn set(&self, key: &StoreKey, value: &[u8]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        let path = self.entry_path(key);
        if path.exists() {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        self.write_entry(&path, value)
    }

    fn replace(&self, key: &StoreKey, value: &[u8]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        // rename() swaps the entry in one step; there is no window with no file.
        self.write_entry(&self.entry_path(key), value)
    }

    fn delete(&self, key: &StoreKey) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(false);
        }
        zero_overwrite(&path);
        fs::remove_file(&path)?;
        Ok(true)
    }
}

fn load_or_create_master(root: &Path) -> Result<ContentKeyRecord, StoreError> {
    let path = root.join(MASTER_KEY_FILE);
    match fs::read(&path) {
        Ok(bytes) => {
            let bytes = Zeroizing::new(bytes);
            ContentKeyRecord::from_combined(&bytes)
                .map_err(|e| StoreError::DataCorruption(format!("master key: {}", e)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let master = ContentKeyRecord::generate()
                .map_err(|e| StoreError::OperationFailed(e.to_string()))?;
            let combined = Zeroizing::new(master.to_combined());
            write_atomic(&path, combined.as_ref())?;
            debug!("created credential store master key");
            Ok(master)
        }
        Err(e) => Err(e.into()),
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = open_private(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

fn zero_overwrite(path: &Path) {
    let Ok(mut file) = fs::OpenOptions::new().write(true).open(path) else {
        return;
    };
    let size = file.metadata().map(|m| m.len() as usize).unwrap_or(0);
    if let Err(e) = file.write_all(&vec![0u8; size]).and_then(|_| file.sync_all()) {
        warn!(path = %path.display(), error = %e, "zero overwrite failed");
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(account: &str) -> StoreKey {
        StoreKey::new(DEFAULT_NAMESPACE, account)
    }

    #[test]
    fn test_memory_set_get_delete() {
        let store = InMemoryCredentialStore::new();
        let k = key(accounts::WALLET);

        assert!(store.get(&k).unwrap().is_none());
        store.set(&k, b"abc").unwrap();
        assert_eq!(store.get(&k).unwrap().unwrap().as_slice(), b"abc");
        assert!(store.contains(&k).unwrap());

        assert!(store.delete(&k).unwrap());
        assert!(!store.delete(&k).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_set_rejects_duplicate() {
        let store = InMemoryCredentialStore::new();
        let k = key(accounts::CONTENT_KEY);
        store.set(&k, b"one").unwrap();
        assert!(matches!(store.set(&k, b"two"), Err(StoreError::AlreadyExists(_))));
        assert_eq!(store.get(&k).unwrap().unwrap().as_slice(), b"one");
    }

    #[test]
    fn test_memory_replace_leaves_single_entry() {
        let store = InMemoryCredentialStore::new();
        let k = key(accounts::WALLET);
        store.replace(&k, b"one").unwrap();
        store.replace(&k, b"two").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&k).unwrap().unwrap().as_slice(), b"two");
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let store = InMemoryCredentialStore::new();
        store.set(&StoreKey::new("a", "x"), b"1").unwrap();
        assert!(store.get(&StoreKey::new("b", "x")).unwrap().is_none());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        let k = key(accounts::ACCESS_NFT);

        store.set(&k, b"{\"token_id\":\"7\"}").unwrap();
        assert_eq!(store.get(&k).unwrap().unwrap().as_slice(), b"{\"token_id\":\"7\"}");

        store.replace(&k, b"updated").unwrap();
        assert_eq!(store.get(&k).unwrap().unwrap().as_slice(), b"updated");

        assert!(store.delete(&k).unwrap());
        assert!(store.get(&k).unwrap().is_none());
    }

    #[test]
    fn test_file_store_values_are_sealed_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        let k = key(accounts::WALLET);
        store.set(&k, b"very secret bytes").unwrap();

        let raw = fs::read(store.entry_path(&k)).unwrap();
        assert!(!raw.windows(6).any(|w| w == b"secret"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let k = key(accounts::SETTINGS);
        {
            let store = FileCredentialStore::open(dir.path()).unwrap();
            store.set(&k, b"persisted").unwrap();
        }
        let store = FileCredentialStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&k).unwrap().unwrap().as_slice(), b"persisted");
    }

    #[test]
    fn test_file_store_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        let k = key(accounts::CONTENT_KEY);
        store.set(&k, &[7u8; 44]).unwrap();

        let path = store.entry_path(&k);
        let mut raw = fs::read(&path).unwrap();
        raw[20] ^= 0xff;
        fs::write(&path, raw).unwrap();

        assert!(matches!(store.get(&k), Err(StoreError::DataCorruption(_))));
    }

    #[test]
    fn test_file_store_set_rejects_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        let k = key(accounts::WALLET);
        store.set(&k, b"a").unwrap();
        assert!(matches!(store.set(&k, b"b"), Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn test_entry_names_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        let pairs = [
            StoreKey::new("ns", "a/b"),
            StoreKey::new("ns", "a_b"),
            StoreKey::new("a__b", "c"),
            StoreKey::new("a", "b__c"),
            StoreKey::new("a.b", "c"),
            StoreKey::new("a", "b.c"),
        ];
        for (i, k) in pairs.iter().enumerate() {
            store.set(k, &[i as u8]).unwrap();
        }
        for (i, k) in pairs.iter().enumerate() {
            assert_eq!(store.get(k).unwrap().unwrap().as_slice(), &[i as u8]);
        }
    }

    #[test]
    fn test_entry_path_stays_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        let path = store.entry_path(&StoreKey::new("ns", "../etc/passwd"));
        assert_eq!(path.parent(), Some(dir.path()));
    }
}
