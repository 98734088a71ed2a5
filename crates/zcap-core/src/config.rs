//! Configuration: TOML file, environment overrides, validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use zcap_crypto::wallet::normalize_address;

use crate::attestation::ChallengeMode;
use crate::ledger::{RetryPolicy, TokenContracts};
use crate::store::DEFAULT_NAMESPACE;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("config validation error: {0}")]
    ValidationError(String),
    #[error("config write error: {0}")]
    WriteError(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZcapConfig {
    pub log_level: String,
    pub api: ApiConfig,
    pub ledger: LedgerConfig,
    pub escrow: EscrowConfig,
    pub setup: SetupConfig,
    pub storage: StorageConfig,
    pub attestation: AttestationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub token_a: String,
    pub token_b: String,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    pub bridge_url: String,
    pub session_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    pub step_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Credential store directory. `None` selects the platform data directory.
    pub dir: Option<PathBuf>,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestationConfig {
    pub challenge_mode: ChallengeMode,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.zcap.example".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://sepolia.base.org".to_string(),
            token_a: "0x0000000000000000000000000000000000000000".to_string(),
            token_b: "0x0000000000000000000000000000000000000000".to_string(),
            max_retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            bridge_url: "http://127.0.0.1:8787".to_string(),
            session_timeout_secs: 10,
        }
    }
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self { step_delay_ms: 400 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            challenge_mode: ChallengeMode::Canonical,
        }
    }
}

impl Default for ZcapConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            api: ApiConfig::default(),
            ledger: LedgerConfig::default(),
            escrow: EscrowConfig::default(),
            setup: SetupConfig::default(),
            storage: StorageConfig::default(),
            attestation: AttestationConfig::default(),
        }
    }
}

impl ZcapConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {}", path.display(), e)))?;
        let config: ZcapConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn load_from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `ZCAP_*` and `RUST_LOG` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("ZCAP_API_URL") {
            self.api.base_url = url;
        }
        if let Some(url) = lookup("ZCAP_RPC_URL") {
            self.ledger.rpc_url = url;
        }
        if let Some(url) = lookup("ZCAP_ESCROW_URL") {
            self.escrow.bridge_url = url;
        }
        if let Some(dir) = lookup("ZCAP_STORAGE_DIR") {
            self.storage.dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup("RUST_LOG") {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("api.base_url", &self.api.base_url)?;
        check_url("ledger.rpc_url", &self.ledger.rpc_url)?;
        check_url("escrow.bridge_url", &self.escrow.bridge_url)?;

        if self.escrow.session_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "escrow.session_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "api.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        for (name, addr) in [("ledger.token_a", &self.ledger.token_a), ("ledger.token_b", &self.ledger.token_b)] {
            normalize_address(addr)
                .map_err(|e| ConfigError::ValidationError(format!("{}: {}", name, e)))?;
        }
        if self.storage.namespace.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::WriteError(e.to_string()))
    }

    pub fn escrow_session_timeout(&self) -> Duration {
        Duration::from_secs(self.escrow.session_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.setup.step_delay_ms)
    }

    pub fn token_contracts(&self) -> TokenContracts {
        TokenContracts {
            token_a: self.ledger.token_a.clone(),
            token_b: self.ledger.token_b.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.ledger.max_retries,
            backoff: Duration::from_millis(self.ledger.retry_backoff_ms),
        }
    }
}

fn check_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::ValidationError(format!("{}: {}: {}", name, value, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::ValidationError(format!(
            "{} must use http or https, got {}",
            name, other
        ))),
    }
}
