//! Opening and closing the storage a command runs against.

use anyhow::Context;
use lodestore_storage::json::JsonFileServer;
use lodestore_storage::{Storage, StorageConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Global options shared by every command.
pub struct SessionOptions {
    pub config_path: Option<PathBuf>,
    pub directory: Option<PathBuf>,
    pub namespace: String,
    pub workspace: Option<String>,
}

impl SessionOptions {
    /// Load the storage config and apply command-line overrides.
    pub fn storage_config(&self) -> anyhow::Result<StorageConfig> {
        let path = self
            .config_path
            .clone()
            .or_else(lodestore_util::path::config_file);
        let mut config = StorageConfig::load(path.as_deref())
            .with_context(|| format!("Failed to load config from {path:?}"))?;
        if let Some(dir) = &self.directory {
            config.directory = Some(dir.clone());
        }
        Ok(config)
    }
}

/// An initialized storage bound to one namespace.
pub struct Session {
    pub storage: Storage,
}

impl Session {
    pub async fn open(options: &SessionOptions) -> anyhow::Result<Self> {
        let config = options.storage_config()?;
        let mut builder = Storage::builder(&options.namespace, Arc::new(JsonFileServer::new()))
            .config(config);
        if let Some(workspace) = &options.workspace {
            builder = builder.workspace(workspace);
        }

        let storage = builder.build()?;
        storage
            .init()
            .await
            .with_context(|| format!("Failed to open namespace {}", options.namespace))?;
        debug!(namespace = %options.namespace, "Session opened");
        Ok(Self { storage })
    }

    /// Flush what is pending and close the durable store.
    pub async fn close(self) {
        self.storage.close().await;
    }
}
