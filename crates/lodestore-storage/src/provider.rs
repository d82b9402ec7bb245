//! Shared access to storages by namespace and scope.

use crate::config::StorageConfig;
use crate::memory::MemoryMirror;
use crate::mirror::LocalMirror;
use crate::server::StorageServer;
use crate::storage::Storage;
use crate::StorageResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Creates a durable store for one storage.
///
/// Each storage gets its own server so re-targeting one (on a workspace
/// change) never redirects another's writes.
pub type ServerFactory = Arc<dyn Fn() -> Arc<dyn StorageServer> + Send + Sync>;

/// Whether a storage follows the open workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    Global,
    Workspace,
}

/// Hands out one initialized [`Storage`] per namespace and scope.
pub struct StorageProvider {
    factory: ServerFactory,
    config: StorageConfig,
    /// Mirror for global storages, present when `config.use_mirror` is set.
    mirror: Option<Arc<dyn LocalMirror>>,
    workspace: watch::Sender<Option<String>>,
    storages: Mutex<HashMap<(String, StorageScope), Storage>>,
}

impl StorageProvider {
    pub fn new(factory: ServerFactory, config: StorageConfig) -> Self {
        let mirror: Option<Arc<dyn LocalMirror>> = if config.use_mirror {
            Some(Arc::new(MemoryMirror::new()))
        } else {
            None
        };
        let (workspace, _) = watch::channel(None);
        Self {
            factory,
            config,
            mirror,
            workspace,
            storages: Mutex::new(HashMap::new()),
        }
    }

    /// The workspace that workspace-scoped storages currently follow.
    pub fn workspace(&self) -> Option<String> {
        self.workspace.borrow().clone()
    }

    /// Switch the open workspace. Workspace-scoped storages reload.
    pub fn set_workspace(&self, workspace: Option<String>) {
        self.workspace.send_if_modified(|current| {
            if *current == workspace {
                return false;
            }
            *current = workspace;
            true
        });
    }

    /// Get the storage for `namespace`, creating and initializing it on first use.
    pub async fn storage(&self, namespace: &str, scope: StorageScope) -> StorageResult<Storage> {
        let mut storages = self.storages.lock().await;
        if let Some(storage) = storages.get(&(namespace.to_string(), scope)) {
            return Ok(storage.clone());
        }

        let mut builder =
            Storage::builder(namespace, (self.factory)()).config(self.config.clone());
        match scope {
            StorageScope::Global => {
                if let Some(mirror) = &self.mirror {
                    builder = builder.mirror(mirror.clone());
                }
            }
            StorageScope::Workspace => {
                if let Some(workspace) = self.workspace() {
                    builder = builder.workspace(workspace);
                }
            }
        }

        let storage = builder.build()?;
        storage.init().await?;
        if scope == StorageScope::Workspace {
            storage.watch_workspace(self.workspace.subscribe());
        }

        debug!(namespace, ?scope, "Created storage");
        storages.insert((namespace.to_string(), scope), storage.clone());
        Ok(storage)
    }

    /// Close every storage handed out so far.
    pub async fn close_all(&self) {
        let storages: Vec<Storage> = self.storages.lock().await.drain().map(|(_, s)| s).collect();
        for storage in storages {
            storage.close().await;
        }
    }
}
