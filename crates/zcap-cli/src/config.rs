//! Configuration file location and CLI overrides
//!
//! The settings themselves live in [`zcap_core::config::ZcapConfig`]; this
//! module decides where the file lives, creates it on first run and layers
//! environment variables and command-line flags on top.
//!
//! # Configuration File Locations
//!
//! - Linux: `~/.config/zcap/zcap.toml`
//! - macOS: `~/Library/Application Support/io.zcap.zcap/zcap.toml`
//! - Windows: `%APPDATA%\zcap\zcap\config\zcap.toml`
//!
//! Precedence, lowest first: defaults, config file, environment, flags.

use std::path::{Path, PathBuf};

use zcap_core::config::{ConfigError, ZcapConfig};

const CONFIG_FILE: &str = "zcap.toml";

/// Values taken from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub log_level: Option<String>,
    pub api_url: Option<String>,
    pub storage_dir: Option<PathBuf>,
}

pub struct CliConfig;

impl CliConfig {
    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("io", "zcap", "zcap")
    }

    /// Default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Platform data directory; the credential store lives below it.
    pub fn data_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Load from `custom_path`, else the default location, else defaults
    /// with environment overrides.
    pub fn load_from(custom_path: Option<&Path>) -> Result<ZcapConfig, ConfigError> {
        Self::load_with_default(custom_path, Self::default_path())
    }

    fn load_with_default(
        custom_path: Option<&Path>,
        default_path: Option<PathBuf>,
    ) -> Result<ZcapConfig, ConfigError> {
        match custom_path {
            Some(path) => ZcapConfig::load_from_file(path),
            None => match default_path {
                Some(path) if path.exists() => ZcapConfig::load_from_file(&path),
                _ => Ok(ZcapConfig::load_from_env()),
            },
        }
    }

    /// Write a default config file if none exists. Returns whether one was written.
    pub fn create_default_if_missing() -> Result<bool, ConfigError> {
        match Self::default_path() {
            Some(path) if !path.exists() => {
                ZcapConfig::default().save_to_file(&path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Apply environment variables, then flags, and validate the result.
    pub fn resolve(mut config: ZcapConfig, overrides: &CliOverrides) -> Result<ZcapConfig, ConfigError> {
        config.apply_env();
        if let Some(level) = &overrides.log_level {
            config.log_level = level.clone();
        }
        if let Some(url) = &overrides.api_url {
            config.api.base_url = url.clone();
        }
        if let Some(dir) = &overrides.storage_dir {
            config.storage.dir = Some(dir.clone());
        }
        config.validate()?;
        Ok(config)
    }

    /// Directory of the credential store.
    pub fn storage_dir(config: &ZcapConfig) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &config.storage.dir {
            return Ok(dir.clone());
        }
        Self::data_dir()
            .map(|dir| dir.join("credentials"))
            .ok_or_else(|| {
                ConfigError::ValidationError(
                    "no home directory; set storage.dir or ZCAP_STORAGE_DIR".to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_custom_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "log_level = \"debug\"\n[api]\nbase_url = \"https://api.custom\"\n",
        )
        .unwrap();

        let config = CliConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.api.base_url, "https://api.custom");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_no_config_file_falls_back_to_env_defaults() {
        let dir = TempDir::new().unwrap();
        let config =
            CliConfig::load_with_default(None, Some(dir.path().join("zcap.toml"))).unwrap();
        assert_eq!(config, ZcapConfig::load_from_env());
        assert_eq!(
            CliConfig::load_with_default(None, None).unwrap(),
            ZcapConfig::load_from_env()
        );
    }

    #[test]
    fn test_missing_custom_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(CliConfig::load_from(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let overrides = CliOverrides {
            log_level: Some("trace".into()),
            api_url: Some("https://flag.example".into()),
            storage_dir: Some(PathBuf::from("/tmp/zcap-flag")),
        };
        let config = CliConfig::resolve(ZcapConfig::default(), &overrides).unwrap();
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.api.base_url, "https://flag.example");
        assert_eq!(
            CliConfig::storage_dir(&config).unwrap(),
            PathBuf::from("/tmp/zcap-flag")
        );
    }

    #[test]
    fn test_invalid_override_rejected() {
        let overrides = CliOverrides {
            api_url: Some("not a url".into()),
            ..CliOverrides::default()
        };
        assert!(CliConfig::resolve(ZcapConfig::default(), &overrides).is_err());
    }

    #[test]
    fn test_default_path_name() {
        if let Some(path) = CliConfig::default_path() {
            assert!(path.ends_with(CONFIG_FILE));
        }
    }
}
