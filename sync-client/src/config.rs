//! Sync configuration.
//!
//! Passed explicitly into the engine and scheduler at construction. Loadable
//! from the `[sync]` table of a TOML file; every field has a default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use bufsync_types::{IdError, Namespace};

/// Configuration for the sync engine and scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Retention bound N and push/pull batch size (default: 5).
    #[serde(default = "default_sync_count")]
    pub sync_count: usize,
    /// Seconds between periodic syncs (default: 60).
    #[serde(default = "default_sync_frequency")]
    pub sync_frequency: u64,
    /// Namespace in the remote store (default: "tmux-buffer-sync").
    #[serde(default = "default_sync_namespace")]
    pub sync_namespace: String,
    /// Trailing debounce window after a copy event, in ms (default: 500).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Timeout of a single remote store call, in seconds (default: 10).
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    /// Retries of a failed remote store call (default: 2).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base retry backoff in ms (default: 250).
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Largest encoded entry written to the remote store, in bytes
    /// (default: 96 KiB, below the 128 KiB limit on one argv string).
    #[serde(default = "default_max_value_bytes")]
    pub max_value_bytes: usize,
}

// Default value functions
fn default_sync_count() -> usize {
    5
}

fn default_sync_frequency() -> u64 {
    60
}

fn default_sync_namespace() -> String {
    "tmux-buffer-sync".to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_remote_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_ms() -> u64 {
    250
}

fn default_max_value_bytes() -> usize {
    96 * 1024
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_count: default_sync_count(),
            sync_frequency: default_sync_frequency(),
            sync_namespace: default_sync_namespace(),
            debounce_ms: default_debounce_ms(),
            remote_timeout_secs: default_remote_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            max_value_bytes: default_max_value_bytes(),
        }
    }
}

impl SyncConfig {
    /// Parse from TOML text holding the fields at top level.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load from a TOML file holding the fields at top level.
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

    /// Set the retention bound.
    pub fn with_count(mut self, count: usize) -> Self {
        self.sync_count = count;
        self
    }

    /// Set the periodic sync interval in seconds.
    pub fn with_frequency(mut self, secs: u64) -> Self {
        self.sync_frequency = secs;
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.sync_namespace = namespace.to_string();
        self
    }

    /// Set the debounce window in ms.
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Set retry behaviour of remote store calls.
    pub fn with_retries(mut self, max_retries: u32, base_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_ms = base_ms;
        self
    }

    /// Set the largest encoded entry that is pushed.
    pub fn with_max_value_bytes(mut self, bytes: usize) -> Self {
        self.max_value_bytes = bytes;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_count == 0 {
            return Err(ConfigError::Invalid("sync_count must be at least 1".into()));
        }
        if self.sync_frequency == 0 {
            return Err(ConfigError::Invalid(
                "sync_frequency must be at least 1 second".into(),
            ));
        }
        if self.remote_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "remote_timeout_secs must be at least 1".into(),
            ));
        }
        if self.max_value_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_value_bytes must be at least 1".into(),
            ));
        }
        self.namespace()?;
        Ok(())
    }

    /// The validated namespace.
    pub fn namespace(&self) -> Result<Namespace, ConfigError> {
        Namespace::new(self.sync_namespace.clone()).map_err(ConfigError::Namespace)
    }

    /// Periodic sync interval.
    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.sync_frequency)
    }

    /// Debounce window.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Timeout of one remote store call.
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    /// Base retry backoff.
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }
}

/// Configuration error types.
#[derive(Debug, Error)]
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
    /// Namespace name is not usable.
    #[error(transparent)]
    Namespace(#[from] IdError),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
