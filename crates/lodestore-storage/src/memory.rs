//! In-memory durable store and mirror.
//!
//! Neither is persistent. [`MemoryServer`] also records every call it
//! receives and can be told to fail, which makes it the test double for
//! the storage engine.

use crate::mirror::LocalMirror;
use crate::pending::UpdateRequest;
use crate::server::{ServerTarget, SnapshotProvider, StorageServer, StorageSnapshot};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

type Namespaces = HashMap<String, HashMap<String, String>>;

fn poisoned(e: impl std::fmt::Display) -> StorageError {
    StorageError::backend(format!("lock poisoned: {e}"))
}

/// In-memory durable store.
#[derive(Default)]
pub struct MemoryServer {
    data: RwLock<Namespaces>,
    init_calls: Mutex<Vec<ServerTarget>>,
    update_calls: Mutex<Vec<(String, UpdateRequest)>>,
    close_snapshots: Mutex<Vec<StorageSnapshot>>,
    fail_updates: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `update_items` fail (or succeed again).
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Make every following `get_items` fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Targets passed to `init`, in call order.
    pub fn init_calls(&self) -> Vec<ServerTarget> {
        self.init_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Batches passed to `update_items`, in call order, including failed ones.
    pub fn update_calls(&self) -> Vec<(String, UpdateRequest)> {
        self.update_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Snapshots captured by `close`.
    pub fn close_snapshots(&self) -> Vec<StorageSnapshot> {
        self.close_snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Durable items of a namespace.
    pub fn items(&self, namespace: &str) -> HashMap<String, String> {
        self.data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageServer for MemoryServer {
    async fn init(&self, target: &ServerTarget) -> StorageResult<()> {
        self.init_calls.lock().map_err(poisoned)?.push(target.clone());
        Ok(())
    }

    async fn get_items(&self, namespace: &str) -> StorageResult<HashMap<String, String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::backend("injected read failure"));
        }
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(namespace).cloned().unwrap_or_default())
    }

    async fn update_items(&self, namespace: &str, request: UpdateRequest) -> StorageResult<()> {
        self.update_calls
            .lock()
            .map_err(poisoned)?
            .push((namespace.to_string(), request.clone()));

        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StorageError::backend("injected update failure"));
        }

        let mut data = self.data.write().map_err(poisoned)?;
        request.apply_to(data.entry(namespace.to_string()).or_default());
        Ok(())
    }

    async fn close(&self, snapshot: SnapshotProvider) -> StorageResult<()> {
        let snapshot = snapshot();
        self.close_snapshots.lock().map_err(poisoned)?.push(snapshot);
        Ok(())
    }
}

/// In-process fast mirror.
#[derive(Default)]
pub struct MemoryMirror {
    data: RwLock<Namespaces>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalMirror for MemoryMirror {
    async fn get_data(&self, namespace: &str) -> StorageResult<Option<HashMap<String, String>>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(namespace).cloned())
    }

    async fn set_data(&self, namespace: &str, items: HashMap<String, String>) -> StorageResult<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.insert(namespace.to_string(), items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn batch(insert: &[(&str, &str)], delete: &[&str]) -> UpdateRequest {
        UpdateRequest {
            insert: insert
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            delete: delete.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_update_and_get_items() {
        let server = MemoryServer::new();
        server
            .update_items("prefs", batch(&[("a", "1"), ("b", "2")], &[]))
            .await
            .unwrap();
        server
            .update_items("prefs", batch(&[("c", "3")], &["a"]))
            .await
            .unwrap();

        let items = server.get_items("prefs").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items["b"], "2");
        assert_eq!(items["c"], "3");
        assert!(server.get_items("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_is_recorded_but_not_applied() {
        let server = MemoryServer::new();
        server.fail_updates(true);

        let result = server.update_items("prefs", batch(&[("a", "1")], &[])).await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
        assert_eq!(server.update_calls().len(), 1);
        assert!(server.items("prefs").is_empty());
    }

    #[tokio::test]
    async fn test_close_captures_snapshot() {
        let server = MemoryServer::new();
        let snapshot: SnapshotProvider = Arc::new(|| StorageSnapshot {
            namespace: "prefs".to_string(),
            items: HashMap::from([("k".to_string(), "true".to_string())]),
        });

        server.close(snapshot).await.unwrap();

        let snapshots = server.close_snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].items["k"], "true");
    }

    #[tokio::test]
    async fn test_mirror_round_trip() {
        let mirror = MemoryMirror::new();
        assert!(mirror.get_data("prefs").await.unwrap().is_none());

        mirror
            .set_data("prefs", HashMap::from([("k".to_string(), "1".to_string())]))
            .await
            .unwrap();
        let data = mirror.get_data("prefs").await.unwrap().unwrap();
        assert_eq!(data["k"], "1");
    }
}
