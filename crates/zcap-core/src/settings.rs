//! Locally cached user settings, kept in the credential store so a full
//! reset clears them with the keys.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::StoreError;
use crate::payload::Visibility;
use crate::store::{accounts, CredentialStore, StoreKey};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSettings {
    #[serde(default)]
    pub default_visibility: Visibility,
    #[serde(default)]
    pub onboarding_complete: bool,
    #[serde(default)]
    pub last_setup_at: Option<DateTime<Utc>>,
}

pub struct SettingsStore {
    store: Arc<dyn CredentialStore>,
    key: StoreKey,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn CredentialStore>, namespace: &str) -> Self {
        Self {
            store,
            key: StoreKey::new(namespace, accounts::SETTINGS),
        }
    }

    /// Stored settings, or defaults when absent or unreadable.
    pub fn load(&self) -> LocalSettings {
        match self.store.get(&self.key) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "local settings unreadable, using defaults");
                LocalSettings::default()
            }),
            Ok(None) => LocalSettings::default(),
            Err(e) => {
                warn!(error = %e, "failed to read local settings");
                LocalSettings::default()
            }
        }
    }

    pub fn save(&self, settings: &LocalSettings) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(settings).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.replace(&self.key, &bytes)
    }

    /// Record a completed setup run.
    pub fn mark_onboarded(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut settings = self.load();
        settings.onboarding_complete = true;
        settings.last_setup_at = Some(at);
        self.save(&settings)
    }

    /// Remove the settings. Absent counts as success.
    pub fn clear(&self) -> bool {
        match self.store.delete(&self.key) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "failed to clear local settings");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryCredentialStore, DEFAULT_NAMESPACE};

    #[test]
    fn test_defaults_when_absent() {
        let s = SettingsStore::new(Arc::new(InMemoryCredentialStore::new()), DEFAULT_NAMESPACE);
        assert_eq!(s.load(), LocalSettings::default());
        assert_eq!(s.load().default_visibility, Visibility::Public);
    }

    #[test]
    fn test_mark_onboarded_and_clear() {
        let s = SettingsStore::new(Arc::new(InMemoryCredentialStore::new()), DEFAULT_NAMESPACE);
        let now = Utc::now();
        s.mark_onboarded(now).unwrap();
        let loaded = s.load();
        assert!(loaded.onboarding_complete);
        assert_eq!(loaded.last_setup_at, Some(now));

        assert!(s.clear());
        assert!(!s.load().onboarding_complete);
        assert!(s.clear());
    }

    #[test]
    fn test_unreadable_settings_fall_back() {
        let store = Arc::new(InMemoryCredentialStore::new());
        store
            .replace(&StoreKey::new(DEFAULT_NAMESPACE, accounts::SETTINGS), b"{broken")
            .unwrap();
        let s = SettingsStore::new(store, DEFAULT_NAMESPACE);
        assert_eq!(s.load(), LocalSettings::default());
    }
}
