//! Durable store contract.
//!
//! The storage engine never talks to a database directly. It reaches the
//! durable side through [`StorageServer`], which may be a local file store,
//! a remote service or anything else that can apply batches atomically.

use crate::pending::UpdateRequest;
use crate::StorageResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a durable store should keep its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    /// Base storage directory.
    pub directory: PathBuf,
    /// Workspace the data is scoped to, if any.
    pub workspace: Option<String>,
}

impl ServerTarget {
    pub fn new(directory: impl Into<PathBuf>, workspace: Option<String>) -> Self {
        Self {
            directory: directory.into(),
            workspace,
        }
    }
}

/// Full contents of one namespace, captured at close.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageSnapshot {
    pub namespace: String,
    pub items: HashMap<String, String>,
}

/// Callback handing the durable store a last-resort snapshot of the cache.
pub type SnapshotProvider = Arc<dyn Fn() -> StorageSnapshot + Send + Sync>;

/// A durable key-value store addressed by namespace.
#[async_trait]
pub trait StorageServer: Send + Sync {
    /// Prepare backing storage for a directory and optional workspace.
    ///
    /// Must be idempotent; it runs on every (re)initialization.
    async fn init(&self, target: &ServerTarget) -> StorageResult<()>;

    /// Read every item stored under `namespace`.
    async fn get_items(&self, namespace: &str) -> StorageResult<HashMap<String, String>>;

    /// Apply a batch to `namespace`. Either all of it lands or none of it.
    async fn update_items(&self, namespace: &str, request: UpdateRequest) -> StorageResult<()>;

    /// Final shutdown hook.
    ///
    /// The store may call `snapshot` to persist the full cache when earlier
    /// writes did not make it.
    async fn close(&self, snapshot: SnapshotProvider) -> StorageResult<()>;
}
