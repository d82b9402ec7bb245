//! The cached key-value storage.
//!
//! A [`Storage`] is bound to one namespace. Reads are served from an
//! in-memory cache and never block. Writes update the cache immediately,
//! announce the change, and are written back to the durable store in
//! debounced batches.
//!
//! # Example
//!
//! ```ignore
//! let storage = Storage::builder("prefs", server).build()?;
//! storage.init().await?;
//!
//! storage.set("theme", "dark").await?;
//! assert_eq!(storage.get_or("theme", json!("light")), json!("dark"));
//!
//! storage.close().await;
//! ```

use crate::config::StorageConfig;
use crate::event::{ChangeEmitter, Disposables, StorageChange};
use crate::load::Loader;
use crate::mirror::LocalMirror;
use crate::pending::{PendingChanges, UpdateRequest};
use crate::ready::ReadySignal;
use crate::scheduler::{FlushHandle, FlushScheduler, FlushTicket};
use crate::server::{ServerTarget, SnapshotProvider, StorageServer, StorageSnapshot};
use crate::StorageResult;
use lodestore_util::TimingGuard;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Lifecycle of a storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageState {
    /// Constructed, cache not loaded yet.
    #[default]
    None,
    /// Cache loaded and live.
    Initialized,
    /// Terminal. Mutations are ignored.
    Closed,
}

/// Builder for [`Storage`].
pub struct StorageBuilder {
    namespace: String,
    server: Arc<dyn StorageServer>,
    mirror: Option<Arc<dyn LocalMirror>>,
    workspace: Option<String>,
    config: StorageConfig,
}

impl StorageBuilder {
    /// Use a fast local mirror ahead of the durable store.
    pub fn mirror(mut self, mirror: Arc<dyn LocalMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Scope the storage to a workspace.
    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn config(mut self, config: StorageConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> StorageResult<Storage> {
        let directory = self.config.storage_dir()?;
        let changes = Arc::new(ChangeEmitter::new());
        let disposables = Disposables::new();
        {
            let changes = changes.clone();
            disposables.push(move || changes.dispose());
        }

        Ok(Storage {
            inner: Arc::new(StorageInner {
                loader: Loader::standard(self.server.clone(), self.mirror.clone()),
                namespace: self.namespace,
                directory,
                workspace: RwLock::new(self.workspace),
                server: self.server,
                mirror: self.mirror,
                data: Mutex::new(StorageData::default()),
                ready: ReadySignal::new(),
                scheduler: FlushScheduler::new(self.config.flush_delay()),
                write_lock: tokio::sync::Mutex::new(()),
                init_lock: tokio::sync::Mutex::new(()),
                changes,
                disposables,
            }),
        })
    }
}

#[derive(Default)]
struct StorageData {
    state: StorageState,
    cache: HashMap<String, String>,
    pending: PendingChanges,
}

struct StorageInner {
    namespace: String,
    directory: PathBuf,
    workspace: RwLock<Option<String>>,
    server: Arc<dyn StorageServer>,
    mirror: Option<Arc<dyn LocalMirror>>,
    loader: Loader,
    /// Cache, ledger and state. Never held across an `.await`.
    data: Mutex<StorageData>,
    ready: ReadySignal,
    scheduler: FlushScheduler,
    /// Serializes flushes so batches reach the store in the order they were cut.
    write_lock: tokio::sync::Mutex<()>,
    init_lock: tokio::sync::Mutex<()>,
    changes: Arc<ChangeEmitter>,
    disposables: Disposables,
}

impl StorageInner {
    fn data(&self) -> MutexGuard<'_, StorageData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn target(&self) -> ServerTarget {
        ServerTarget::new(
            self.directory.clone(),
            self.workspace
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        )
    }

    fn snapshot(&self) -> StorageSnapshot {
        StorageSnapshot {
            namespace: self.namespace.clone(),
            items: self.data().cache.clone(),
        }
    }

    fn emit(&self, key: &str) {
        self.changes.emit(StorageChange {
            namespace: self.namespace.clone(),
            key: key.to_string(),
        });
    }

    async fn flush_pending(&self, ticket: FlushTicket) -> StorageResult<()> {
        self.ready.wait().await;
        let _guard = self.write_lock.lock().await;

        let request = {
            let mut data = self.data();
            // Mutations from here on belong to the next flush.
            ticket.disarm();
            if data.pending.is_empty() {
                return Ok(());
            }
            data.pending.take()
        };

        let _timing = TimingGuard::flush(&self.namespace);
        debug!(
            namespace = %self.namespace,
            inserts = request.insert.len(),
            deletes = request.delete.len(),
            "Flushing pending changes"
        );

        if let Some(mirror) = &self.mirror {
            self.update_mirror(mirror.as_ref(), &request).await;
        }

        self.server.update_items(&self.namespace, request).await
    }

    async fn update_mirror(&self, mirror: &dyn LocalMirror, request: &UpdateRequest) {
        let items = match mirror.get_data(&self.namespace).await {
            Ok(Some(mut items)) => {
                request.apply_to(&mut items);
                items
            }
            // Nothing mirrored yet; a partial batch would shadow the store on the next load.
            Ok(None) => {
                let data = self.data();
                data.cache.clone()
            }
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "Failed to read mirror");
                return;
            }
        };

        if let Err(e) = mirror.set_data(&self.namespace, items).await {
            warn!(namespace = %self.namespace, error = %e, "Failed to update mirror");
        }
    }
}

/// A namespaced key-value store with a write-back cache.
///
/// Cloning is cheap and every clone shares the same cache.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Storage {
    /// Start building a storage for `namespace` backed by `server`.
    pub fn builder(namespace: impl Into<String>, server: Arc<dyn StorageServer>) -> StorageBuilder {
        StorageBuilder {
            namespace: namespace.into(),
            server,
            mirror: None,
            workspace: None,
            config: StorageConfig::default(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn workspace(&self) -> Option<String> {
        self.inner
            .workspace
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn state(&self) -> StorageState {
        self.inner.data().state
    }

    /// Open the durable store, load the cache and resolve readiness.
    ///
    /// The loaded items replace the cache wholesale; changes not yet flushed
    /// are replayed on top. Concurrent calls run one after another. Does
    /// nothing once the storage is closed.
    pub async fn init(&self) -> StorageResult<()> {
        let _guard = self.inner.init_lock.lock().await;
        if self.state() == StorageState::Closed {
            return Ok(());
        }

        let target = self.inner.target();
        self.inner.server.init(&target).await?;
        let mut items = self.inner.loader.load(&self.inner.namespace).await?;

        let count = {
            let mut data = self.inner.data();
            // Closed while loading: the cache is what `close` handed over.
            if data.state == StorageState::Closed {
                return Ok(());
            }
            data.pending.overlay(&mut items);
            data.cache = items;
            data.state = StorageState::Initialized;
            data.cache.len()
        };
        self.inner.ready.resolve();

        info!(
            namespace = %self.inner.namespace,
            workspace = ?target.workspace,
            count,
            "Storage initialized"
        );
        Ok(())
    }

    /// Re-arm readiness, then load again.
    ///
    /// Flushes and [`Storage::ready`] callers wait for the new cycle.
    pub async fn reconnect_init(&self) -> StorageResult<()> {
        if self.state() == StorageState::Closed {
            return Ok(());
        }
        debug!(namespace = %self.inner.namespace, "Reconnecting storage");
        self.inner.ready.rearm();
        self.init().await
    }

    /// Wait until the cache of the current load cycle is populated.
    pub async fn ready(&self) {
        self.inner.ready.wait().await
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.is_ready()
    }

    /// Move to another workspace and reload.
    ///
    /// Pending changes are flushed to the old workspace first.
    pub async fn set_workspace(&self, workspace: Option<String>) -> StorageResult<()> {
        if self.state() == StorageState::Closed {
            return Ok(());
        }
        if self.state() == StorageState::Initialized {
            if let Err(e) = self.flush().await {
                warn!(namespace = %self.inner.namespace, error = %e, "Flush before workspace change failed");
            }
        }

        *self
            .inner
            .workspace
            .write()
            .unwrap_or_else(|e| e.into_inner()) = workspace;
        self.init().await
    }

    /// Reload whenever `workspace` changes.
    ///
    /// Must be called from within a tokio runtime. The listener is released
    /// on [`Storage::close`] or [`Storage::dispose`].
    pub fn watch_workspace(&self, mut workspace: watch::Receiver<Option<String>>) {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            while workspace.changed().await.is_ok() {
                let next = workspace.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let storage = Storage { inner };
                if let Err(e) = storage.set_workspace(next).await {
                    warn!(namespace = %storage.inner.namespace, error = %e, "Workspace reload failed");
                }
            }
        });
        self.inner.disposables.push(move || task.abort());
    }

    /// Persist what is pending and shut down. Idempotent.
    ///
    /// A failed final flush is logged and swallowed; the durable store still
    /// receives a snapshot provider over the full cache.
    pub async fn close(&self) {
        let (previous, discarded) = {
            let mut data = self.inner.data();
            if data.state == StorageState::Closed {
                return;
            }
            let previous = std::mem::replace(&mut data.state, StorageState::Closed);
            // Never loaded: the store was never opened, so nothing can be written.
            let discarded = match previous {
                StorageState::Initialized => 0,
                _ => {
                    let batch = data.pending.take();
                    batch.insert.len() + batch.delete.len()
                }
            };
            (previous, discarded)
        };
        info!(namespace = %self.inner.namespace, "Closing storage");

        // Flushes parked on readiness (a failed reload, or writes before the
        // first load) must finish for close to complete.
        if !self.inner.ready.is_ready() {
            debug!(namespace = %self.inner.namespace, discarded, "Closing before the cache is ready");
            self.inner.ready.resolve();
        }

        if previous == StorageState::Initialized {
            if let Err(e) = self.schedule_flush(Some(Duration::ZERO)).await {
                warn!(namespace = %self.inner.namespace, error = %e, "Final flush failed");
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let namespace = self.inner.namespace.clone();
        let provider: SnapshotProvider = Arc::new(move || match weak.upgrade() {
            Some(inner) => inner.snapshot(),
            None => StorageSnapshot {
                namespace: namespace.clone(),
                items: HashMap::new(),
            },
        });
        if let Err(e) = self.inner.server.close(provider).await {
            warn!(namespace = %self.inner.namespace, error = %e, "Storage server close failed");
        }

        self.dispose();
    }

    /// Release listeners without closing the durable store.
    pub fn dispose(&self) {
        self.inner.disposables.dispose();
    }

    /// Get the value of `key`.
    ///
    /// Text that is not valid JSON is returned as a string.
    pub fn get(&self, key: &str) -> Option<Value> {
        let raw = self.inner.data().cache.get(key).cloned()?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                warn!(namespace = %self.inner.namespace, key, error = %e, "Stored value is not valid JSON");
                Some(Value::String(raw))
            }
        }
    }

    pub fn get_or(&self, key: &str, fallback: Value) -> Value {
        self.get(key).unwrap_or(fallback)
    }

    /// Get the value of `key` deserialized as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(namespace = %self.inner.namespace, key, error = %e, "Stored value has unexpected shape");
                None
            }
        }
    }

    /// `true` only when the value reads as the text `true`.
    pub fn get_boolean(&self, key: &str, fallback: bool) -> bool {
        match self.get(key) {
            Some(value) => value_text(&value) == "true",
            None => fallback,
        }
    }

    /// Base-10 integer read of the value's text.
    ///
    /// Text without leading digits yields `NaN`, not `fallback`.
    pub fn get_number(&self, key: &str, fallback: f64) -> f64 {
        match self.get(key) {
            Some(value) => parse_int(&value_text(&value)),
            None => fallback,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.data().cache.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.data().cache.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of every cached key and its JSON text.
    pub fn items(&self) -> HashMap<String, String> {
        self.inner.data().cache.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.data().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data().cache.is_empty()
    }

    /// Number of keys waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.inner.data().pending.len()
    }

    /// Store `value` under `key`.
    ///
    /// The cache and change event are updated before this returns; the
    /// handle completes when the batch carrying the write is flushed. A
    /// value serializing to `null` deletes the key.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> FlushHandle {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => return FlushHandle::failed(e.into()),
        };
        if serialized == "null" {
            return self.delete(key);
        }

        {
            let mut data = self.inner.data();
            if data.state == StorageState::Closed {
                return FlushHandle::ready();
            }
            if data.cache.get(key) == Some(&serialized) {
                return FlushHandle::ready();
            }
            data.pending.record_insert(key, &serialized);
            data.cache.insert(key.to_string(), serialized);
        }

        self.inner.emit(key);
        self.schedule_flush(None)
    }

    /// Remove `key`. Removing an absent key does nothing.
    pub fn delete(&self, key: &str) -> FlushHandle {
        {
            let mut data = self.inner.data();
            if data.state == StorageState::Closed {
                return FlushHandle::ready();
            }
            if data.cache.remove(key).is_none() {
                return FlushHandle::ready();
            }
            data.pending.record_delete(key);
        }

        self.inner.emit(key);
        self.schedule_flush(None)
    }

    /// Flush pending changes now instead of after the debounce delay.
    pub fn flush(&self) -> FlushHandle {
        self.schedule_flush(Some(Duration::ZERO))
    }

    fn schedule_flush(&self, delay: Option<Duration>) -> FlushHandle {
        let inner = self.inner.clone();
        let task = move |ticket: FlushTicket| async move { inner.flush_pending(ticket).await };
        match delay {
            Some(delay) => self.inner.scheduler.trigger(delay, task),
            None => self.inner.scheduler.schedule(task),
        }
    }

    /// Subscribe to cache changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.changes.subscribe()
    }
}

/// The text a value reads as: strings unquoted, everything else as JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse the leading base-10 integer of `text`.
///
/// Leading whitespace and one sign are accepted; parsing stops at the first
/// non-digit. Returns `NaN` when no digit is found.
pub fn parse_int(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut seen = false;
    let mut value = 0f64;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        seen = true;
        value = value * 10.0 + f64::from(b - b'0');
    }

    match (seen, negative) {
        (false, _) => f64::NAN,
        (true, true) => -value,
        (true, false) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryMirror, MemoryServer};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn config(delay_ms: u64) -> StorageConfig {
        StorageConfig {
            flush_delay_ms: delay_ms,
            directory: Some(PathBuf::from("/tmp/lodestore-unit")),
            use_mirror: false,
        }
    }

    async fn open(server: &Arc<MemoryServer>) -> Storage {
        let storage = Storage::builder("prefs", server.clone())
            .config(config(20))
            .build()
            .unwrap();
        storage.init().await.unwrap();
        storage
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42"), 42.0);
        assert_eq!(parse_int("  -7px"), -7.0);
        assert_eq!(parse_int("+3"), 3.0);
        assert_eq!(parse_int("12.9"), 12.0);
        assert!(parse_int("abc").is_nan());
        assert!(parse_int("").is_nan());
        assert!(parse_int("-").is_nan());
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("true")), "true");
        assert_eq!(value_text(&json!(true)), "true");
        assert_eq!(value_text(&json!(12)), "12");
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let server = Arc::new(MemoryServer::new());
        let storage = Storage::builder("prefs", server.clone())
            .config(config(20))
            .build()
            .unwrap();
        assert_eq!(storage.state(), StorageState::None);
        assert!(!storage.is_ready());

        storage.init().await.unwrap();
        assert_eq!(storage.state(), StorageState::Initialized);
        assert!(storage.is_ready());
        let _ = storage.set("k", &1);

        storage.close().await;
        assert_eq!(storage.state(), StorageState::Closed);

        server
            .update_items(
                "prefs",
                UpdateRequest {
                    insert: BTreeMap::from([("other".to_string(), "2".to_string())]),
                    delete: vec![],
                },
            )
            .await
            .unwrap();
        storage.init().await.unwrap();
        assert_eq!(storage.state(), StorageState::Closed);
        assert_eq!(storage.keys(), vec!["k"]);
        assert_eq!(server.init_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_after_close_keeps_cache() {
        let server = Arc::new(MemoryServer::new());
        let storage = open(&server).await;
        server.fail_updates(true);

        let _ = storage.set("k", &true);
        storage.close().await;
        storage.reconnect_init().await.unwrap();

        assert_eq!(storage.keys(), vec!["k"]);
        assert_eq!(server.init_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_close_after_failed_reconnect_completes() {
        let server = Arc::new(MemoryServer::new());
        let storage = open(&server).await;
        server.fail_reads(true);
        assert!(storage.reconnect_init().await.is_err());

        let _ = storage.set("k", &1);
        tokio::time::timeout(Duration::from_secs(3), storage.close())
            .await
            .expect("close should not wait for a reload that failed");

        assert_eq!(storage.state(), StorageState::Closed);
        assert_eq!(server.items("prefs")["k"], "1");
        assert_eq!(server.close_snapshots()[0].items["k"], "1");
    }

    #[tokio::test]
    async fn test_close_without_init_releases_parked_flush() {
        let server = Arc::new(MemoryServer::new());
        let storage = Storage::builder("prefs", server.clone())
            .config(config(5))
            .build()
            .unwrap();

        let handle = storage.set("k", &true);
        let weak = Arc::downgrade(&storage.inner);
        storage.close().await;
        drop(storage);

        tokio::time::timeout(Duration::from_secs(3), handle.wait())
            .await
            .expect("parked flush should finish after close")
            .unwrap();
        for _ in 0..100 {
            if weak.upgrade().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(weak.upgrade().is_none());
        assert!(server.update_calls().is_empty());
    }

    #[tokio::test]
    async fn test_init_loads_durable_items() {
        let server = Arc::new(MemoryServer::new());
        server
            .update_items(
                "prefs",
                UpdateRequest {
                    insert: BTreeMap::from([
                        ("theme".to_string(), "\"dark\"".to_string()),
                        ("broken".to_string(), "{not json".to_string()),
                    ]),
                    delete: vec![],
                },
            )
            .await
            .unwrap();

        let storage = open(&server).await;
        assert_eq!(storage.get("theme"), Some(json!("dark")));
        assert_eq!(storage.get("broken"), Some(json!("{not json")));
        assert_eq!(storage.keys(), vec!["broken", "theme"]);

        let target = &server.init_calls()[0];
        assert_eq!(target.directory, PathBuf::from("/tmp/lodestore-unit"));
        assert_eq!(target.workspace, None);
    }

    #[tokio::test]
    async fn test_set_fires_event_before_flush() {
        let server = Arc::new(MemoryServer::new());
        let storage = open(&server).await;
        let mut rx = storage.subscribe();

        let handle = storage.set("theme", "dark");
        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, "theme");
        assert_eq!(change.namespace, "prefs");
        assert!(server.update_calls().is_empty());
        assert_eq!(storage.pending_len(), 1);

        handle.await.unwrap();
        assert_eq!(server.items("prefs")["theme"], "\"dark\"");
        assert_eq!(storage.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_set_null_deletes() {
        let server = Arc::new(MemoryServer::new());
        let storage = open(&server).await;

        storage.set("k", &1).await.unwrap();
        storage.set("k", &Option::<i32>::None).await.unwrap();

        assert!(!storage.contains_key("k"));
        assert!(server.items("prefs").is_empty());
    }

    #[tokio::test]
    async fn test_get_as_and_typed_values() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Layout {
            width: u32,
            visible: bool,
        }

        let server = Arc::new(MemoryServer::new());
        let storage = open(&server).await;
        let layout = Layout {
            width: 300,
            visible: true,
        };

        let _ = storage.set("layout", &layout);
        assert_eq!(storage.get_as::<Layout>("layout"), Some(layout));
        assert_eq!(storage.get_as::<String>("layout"), None);
    }

    #[tokio::test]
    async fn test_flush_updates_mirror() {
        let server = Arc::new(MemoryServer::new());
        let mirror = Arc::new(MemoryMirror::new());
        let storage = Storage::builder("prefs", server.clone())
            .mirror(mirror.clone())
            .config(config(10))
            .build()
            .unwrap();
        storage.init().await.unwrap();

        storage.set("a", &1).await.unwrap();
        storage.delete("a").await.unwrap();
        storage.set("b", &2).await.unwrap();

        let mirrored = mirror.get_data("prefs").await.unwrap().unwrap();
        assert_eq!(mirrored, server.items("prefs"));
        assert_eq!(mirrored["b"], "2");
    }

    #[tokio::test]
    async fn test_flush_failure_reaches_caller_and_is_not_retried() {
        let server = Arc::new(MemoryServer::new());
        let storage = open(&server).await;
        server.fail_updates(true);

        let result = storage.set("theme", "dark").await;
        assert!(matches!(result, Err(crate::StorageError::Flush(_))));
        assert_eq!(storage.get("theme"), Some(json!("dark")));
        assert_eq!(storage.pending_len(), 0);

        server.fail_updates(false);
        storage.flush().await.unwrap();
        assert_eq!(server.update_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_write_during_parked_flush_shares_its_outcome() {
        let server = Arc::new(MemoryServer::new());
        let storage = Storage::builder("prefs", server.clone())
            .config(config(5))
            .build()
            .unwrap();
        storage.init().await.unwrap();
        server.fail_updates(true);
        storage.inner.ready.rearm();

        let first = storage.set("a", &1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = storage.set("b", &2);
        storage.inner.ready.resolve();

        assert!(matches!(first.await, Err(crate::StorageError::Flush(_))));
        assert!(matches!(second.await, Err(crate::StorageError::Flush(_))));
        let calls = server.update_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.insert.len(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_rearms_readiness() {
        let server = Arc::new(MemoryServer::new());
        let storage = open(&server).await;
        server.fail_reads(true);

        assert!(storage.reconnect_init().await.is_err());
        assert!(!storage.is_ready());

        server.fail_reads(false);
        storage.reconnect_init().await.unwrap();
        assert!(storage.is_ready());
        assert_eq!(server.init_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_reload_keeps_unflushed_writes() {
        let server = Arc::new(MemoryServer::new());
        let storage = Storage::builder("prefs", server.clone())
            .config(config(60_000))
            .build()
            .unwrap();
        storage.init().await.unwrap();

        let _ = storage.set("theme", "dark");
        storage.init().await.unwrap();
        assert_eq!(storage.get("theme"), Some(json!("dark")));
    }

    #[tokio::test]
    async fn test_set_workspace_flushes_then_reloads() {
        let server = Arc::new(MemoryServer::new());
        let storage = Storage::builder("prefs", server.clone())
            .workspace("file:///a")
            .config(config(60_000))
            .build()
            .unwrap();
        storage.init().await.unwrap();

        let _ = storage.set("theme", "dark");
        storage
            .set_workspace(Some("file:///b".to_string()))
            .await
            .unwrap();

        assert_eq!(server.update_calls().len(), 1);
        assert_eq!(storage.workspace().as_deref(), Some("file:///b"));
        let targets = server.init_calls();
        assert_eq!(targets.last().unwrap().workspace.as_deref(), Some("file:///b"));
    }

    #[tokio::test]
    async fn test_watch_workspace_reloads_on_change() {
        let server = Arc::new(MemoryServer::new());
        let storage = open(&server).await;
        let (tx, rx) = watch::channel(None);
        storage.watch_workspace(rx);

        tx.send(Some("file:///ws".to_string())).unwrap();
        for _ in 0..100 {
            if server.init_calls().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(server.init_calls().len(), 2);
        assert_eq!(storage.workspace().as_deref(), Some("file:///ws"));

        storage.close().await;
        for _ in 0..100 {
            if tx.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_close_without_init_skips_flush() {
        let server = Arc::new(MemoryServer::new());
        let storage = Storage::builder("prefs", server.clone())
            .config(config(20))
            .build()
            .unwrap();

        let _ = storage.set("k", &true);
        storage.close().await;

        assert!(server.update_calls().is_empty());
        let snapshots = server.close_snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].items["k"], "true");
    }

    #[tokio::test]
    async fn test_close_twice_closes_server_once() {
        let server = Arc::new(MemoryServer::new());
        let storage = open(&server).await;

        storage.close().await;
        storage.close().await;
        assert_eq!(server.close_snapshots().len(), 1);
    }

    #[tokio::test]
    async fn test_close_disposes_change_stream() {
        let server = Arc::new(MemoryServer::new());
        let storage = open(&server).await;
        let mut rx = storage.subscribe();

        storage.close().await;
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
