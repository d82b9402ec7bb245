//! Storage configuration.
//!
//! Configuration is loaded from, in order of precedence (lowest first):
//! 1. Built-in defaults
//! 2. A JSON config file (`lodestore.json`)
//! 3. Environment overrides: `LODESTORE_FLUSH_DELAY_MS`, `LODESTORE_STORAGE_DIR`

use crate::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Default debounce delay between a mutation and its durable write.
pub const DEFAULT_FLUSH_DELAY_MS: u64 = 200;

/// Environment variable overriding [`StorageConfig::flush_delay_ms`].
pub const ENV_FLUSH_DELAY_MS: &str = "LODESTORE_FLUSH_DELAY_MS";

/// Environment variable overriding [`StorageConfig::directory`].
pub const ENV_STORAGE_DIR: &str = "LODESTORE_STORAGE_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Debounce delay for flushes, in milliseconds.
    pub flush_delay_ms: u64,

    /// Base directory handed to the durable store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// Keep an in-process mirror of every namespace for fast reloads.
    pub use_mirror: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: DEFAULT_FLUSH_DELAY_MS,
            directory: None,
            use_mirror: false,
        }
    }
}

impl StorageConfig {
    /// Load configuration from `path` (if it exists) and the environment.
    pub fn load(path: Option<&Path>) -> StorageResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading storage config");
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str(&content)?
            }
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(ENV_FLUSH_DELAY_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.flush_delay_ms = ms,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid {ENV_FLUSH_DELAY_MS}"),
            }
        }
        if let Some(dir) = lookup(ENV_STORAGE_DIR).filter(|d| !d.is_empty()) {
            self.directory = Some(PathBuf::from(dir));
        }
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    /// The storage directory, falling back to the platform data directory.
    pub fn storage_dir(&self) -> StorageResult<PathBuf> {
        self.directory
            .clone()
            .or_else(lodestore_util::path::storage_dir)
            .ok_or_else(|| StorageError::backend("could not determine a storage directory"))
    }
}
