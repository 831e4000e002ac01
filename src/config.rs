//! Configuration file.
//!
//! ```json
//! {
//!   "base_dir": "/srv/www/wp-content/plugins",
//!   "entry_extension": "php",
//!   "active": ["akismet/akismet.php"],
//!   "permissions": { "delete_units": true, "install_units": true },
//!   "log_level": "info",
//!   "log_dir": null
//! }
//! ```
//!
//! Every key is optional.  A `secret` key is honoured as a fallback when
//! neither `--secret` nor `PLUGVAULT_SECRET` is set.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::host::StaticPermissions;
use crate::secret::Secret;

pub const DEFAULT_ENTRY_EXTENSION: &str = "php";
pub const DEFAULT_LOG_LEVEL:       &str = "info";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {}: {source}", .path.display())]
    Read { path: PathBuf, #[source] source: std::io::Error },
    #[error("Invalid config {}: {source}", .path.display())]
    Parse { path: PathBuf, #[source] source: serde_json::Error },
    #[error("Invalid entry extension {0:?}")]
    EntryExtension(String),
    #[error("No secret configured; pass --secret or set PLUGVAULT_SECRET")]
    MissingSecret,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PermissionsConfig {
    pub delete_units:  bool,
    pub install_units: bool,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self { delete_units: true, install_units: true }
    }
}

impl From<PermissionsConfig> for StaticPermissions {
    fn from(p: PermissionsConfig) -> Self {
        StaticPermissions { delete_units: p.delete_units, install_units: p.install_units }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub base_dir:        PathBuf,
    pub entry_extension: String,
    pub active:          BTreeSet<String>,
    pub permissions:     PermissionsConfig,
    pub log_level:       String,
    pub log_dir:         Option<PathBuf>,
    secret:              Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir:        PathBuf::from("."),
            entry_extension: DEFAULT_ENTRY_EXTENSION.to_owned(),
            active:          BTreeSet::new(),
            permissions:     PermissionsConfig::default(),
            log_level:       DEFAULT_LOG_LEVEL.to_owned(),
            log_dir:         None,
            secret:          None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path)
            .map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        let config = Self::from_slice(&bytes)
            .map_err(|source| ConfigError::Parse { path: path.to_owned(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ext = &self.entry_extension;
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::EntryExtension(ext.clone()));
        }
        Ok(())
    }

    /// The command-line/env secret when given, else the config file's.
    pub fn resolve_secret(&self, override_value: Option<String>) -> Result<Secret, ConfigError> {
        override_value
            .or_else(|| self.secret.clone())
            .filter(|s| !s.is_empty())
            .map(Secret::new)
            .ok_or(ConfigError::MissingSecret)
    }
}
