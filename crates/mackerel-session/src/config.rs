//! Store configuration.
//!
//! Loaded from a TOML file; every key is optional.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Account store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file (default: `mackerel.db`).
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Connection pool size (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait on a locked database before failing (default: 5).
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("mackerel.db")
}

const fn default_max_connections() -> u32 {
    4
}

const fn default_busy_timeout_secs() -> u64 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl StoreConfig {
    /// Default configuration pointing at `database`.
    #[must_use]
    pub fn with_database(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
