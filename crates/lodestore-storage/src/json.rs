//! JSON file-based durable store.
//!
//! Each namespace is stored as one JSON object file:
//! `<directory>/[<workspace-id>/]<namespace>.json`.

use crate::pending::UpdateRequest;
use crate::server::{ServerTarget, SnapshotProvider, StorageServer};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use lodestore_util::path::{is_safe_component, scoped_dir};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// JSON file-based durable store.
#[derive(Default)]
pub struct JsonFileServer {
    /// Directory resolved by the last `init`.
    root: RwLock<Option<PathBuf>>,
    /// Serializes read-modify-write cycles on namespace files.
    write_lock: Mutex<()>,
    /// Namespaces whose last batch never reached disk.
    dirty: std::sync::Mutex<HashSet<String>>,
}

impl JsonFileServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory namespace files currently live in.
    pub fn root(&self) -> Option<PathBuf> {
        self.root.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn namespace_path(&self, namespace: &str) -> StorageResult<PathBuf> {
        if !is_safe_component(namespace) {
            return Err(StorageError::invalid_namespace(namespace));
        }
        let root = self.root().ok_or(StorageError::NotInitialized)?;
        Ok(root.join(format!("{namespace}.json")))
    }

    fn mark_dirty(&self, namespace: &str, dirty: bool) {
        let mut set = self.dirty.lock().unwrap_or_else(|e| e.into_inner());
        if dirty {
            set.insert(namespace.to_string());
        } else {
            set.remove(namespace);
        }
    }

    fn is_dirty(&self, namespace: &str) -> bool {
        self.dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(namespace)
    }

    async fn apply(&self, path: &Path, request: &UpdateRequest) -> StorageResult<()> {
        let mut items = read_items(path).await?;
        request.apply_to(&mut items);
        write_items(path, &items).await
    }
}

async fn read_items(path: &Path) -> StorageResult<HashMap<String, String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(StorageError::Io(e)),
    }
}

/// Write atomically (write to temp file, then rename).
async fn write_items(path: &Path, items: &HashMap<String, String>) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_string_pretty(items)?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &content).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

#[async_trait]
impl StorageServer for JsonFileServer {
    async fn init(&self, target: &ServerTarget) -> StorageResult<()> {
        let root = scoped_dir(&target.directory, target.workspace.as_deref());
        fs::create_dir_all(&root).await?;
        debug!(path = %root.display(), "Opened JSON storage");
        *self.root.write().unwrap_or_else(|e| e.into_inner()) = Some(root);
        Ok(())
    }

    async fn get_items(&self, namespace: &str) -> StorageResult<HashMap<String, String>> {
        let path = self.namespace_path(namespace)?;
        debug!(path = %path.display(), "Reading namespace");
        read_items(&path).await
    }

    async fn update_items(&self, namespace: &str, request: UpdateRequest) -> StorageResult<()> {
        let path = self.namespace_path(namespace)?;
        debug!(
            path = %path.display(),
            inserts = request.insert.len(),
            deletes = request.delete.len(),
            "Updating namespace"
        );

        let _guard = self.write_lock.lock().await;
        let result = self.apply(&path, &request).await;
        if result.is_err() {
            self.mark_dirty(namespace, true);
        }
        result
    }

    async fn close(&self, snapshot: SnapshotProvider) -> StorageResult<()> {
        let snapshot = snapshot();
        if !self.is_dirty(&snapshot.namespace) {
            return Ok(());
        }

        let path = self.namespace_path(&snapshot.namespace)?;
        warn!(
            namespace = %snapshot.namespace,
            count = snapshot.items.len(),
            "Writing recovery snapshot after failed update"
        );
        let _guard = self.write_lock.lock().await;
        write_items(&path, &snapshot.items).await?;
        self.mark_dirty(&snapshot.namespace, false);
        info!(path = %path.display(), "Recovery snapshot written");
        Ok(())
    }
}
