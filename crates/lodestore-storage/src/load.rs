//! Cache load strategies.
//!
//! A storage loads its cache by asking each [`LoadStrategy`] in priority
//! order. The first one that has data wins; the strategies ranked above it
//! are then handed the result so the next load can be served faster.
//!
//! Strategies only read. Opening the durable store for the current target
//! is the storage's job, so a mirror hit never leaves the store closed.

use crate::mirror::LocalMirror;
use crate::server::StorageServer;
use crate::StorageResult;
use async_trait::async_trait;
use lodestore_util::TimingGuard;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait LoadStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Load every item of `namespace`, or `None` if this strategy has nothing.
    async fn load(&self, namespace: &str) -> StorageResult<Option<HashMap<String, String>>>;

    /// Remember items loaded by a lower-priority strategy.
    async fn remember(&self, _namespace: &str, _items: &HashMap<String, String>) -> StorageResult<()> {
        Ok(())
    }
}

/// Loads from the fast local mirror.
pub struct MirrorLoad {
    mirror: Arc<dyn LocalMirror>,
}

impl MirrorLoad {
    pub fn new(mirror: Arc<dyn LocalMirror>) -> Self {
        Self { mirror }
    }
}

#[async_trait]
impl LoadStrategy for MirrorLoad {
    fn name(&self) -> &'static str {
        "mirror"
    }

    async fn load(&self, namespace: &str) -> StorageResult<Option<HashMap<String, String>>> {
        self.mirror.get_data(namespace).await
    }

    async fn remember(&self, namespace: &str, items: &HashMap<String, String>) -> StorageResult<()> {
        self.mirror.set_data(namespace, items.clone()).await
    }
}

/// Loads from the durable store, which must already be open.
pub struct ServerLoad {
    server: Arc<dyn StorageServer>,
}

impl ServerLoad {
    pub fn new(server: Arc<dyn StorageServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl LoadStrategy for ServerLoad {
    fn name(&self) -> &'static str {
        "server"
    }

    async fn load(&self, namespace: &str) -> StorageResult<Option<HashMap<String, String>>> {
        self.server.get_items(namespace).await.map(Some)
    }
}

/// Strategies tried in order.
pub struct Loader {
    strategies: Vec<Box<dyn LoadStrategy>>,
}

impl Loader {
    pub fn new(strategies: Vec<Box<dyn LoadStrategy>>) -> Self {
        Self { strategies }
    }

    /// Standard ordering: the mirror (if any) ahead of the durable store.
    pub fn standard(server: Arc<dyn StorageServer>, mirror: Option<Arc<dyn LocalMirror>>) -> Self {
        let mut strategies: Vec<Box<dyn LoadStrategy>> = Vec::new();
        if let Some(mirror) = mirror {
            strategies.push(Box::new(MirrorLoad::new(mirror)));
        }
        strategies.push(Box::new(ServerLoad::new(server)));
        Self::new(strategies)
    }

    /// Load `namespace`, returning an empty map if no strategy had data.
    ///
    /// A failing strategy aborts the load unless a later strategy can still
    /// answer; failures to remember are only logged.
    pub async fn load(&self, namespace: &str) -> StorageResult<HashMap<String, String>> {
        let _timing = TimingGuard::load(namespace);
        let mut last_error = None;

        for (rank, strategy) in self.strategies.iter().enumerate() {
            let items = match strategy.load(namespace).await {
                Ok(Some(items)) => items,
                Ok(None) => continue,
                Err(e) => {
                    warn!(namespace, strategy = strategy.name(), error = %e, "Load strategy failed");
                    last_error = Some(e);
                    continue;
                }
            };

            debug!(
                namespace,
                strategy = strategy.name(),
                count = items.len(),
                "Loaded storage items"
            );
            for higher in &self.strategies[..rank] {
                if let Err(e) = higher.remember(namespace, &items).await {
                    warn!(namespace, strategy = higher.name(), error = %e, "Failed to remember items");
                }
            }
            return Ok(items);
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(HashMap::new()),
        }
    }
}
