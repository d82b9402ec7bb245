//! Change notification and teardown.
//!
//! Every committed cache mutation is announced on a broadcast channel the
//! moment it happens, before the durable write. Listeners the storage owns
//! (the emitter itself, workspace watchers) register in a [`Disposables`]
//! list so they are released together.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// A key changed in the cache of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChange {
    pub namespace: String,
    pub key: String,
}

/// Broadcasts [`StorageChange`] events to subscribers.
pub struct ChangeEmitter {
    sender: Mutex<Option<broadcast::Sender<StorageChange>>>,
}

impl ChangeEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            sender: Mutex::new(Some(tx)),
        }
    }

    /// Subscribe to changes.
    ///
    /// After disposal the returned receiver is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        match sender.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        }
    }

    /// Announce a change. Silently dropped when nobody listens.
    pub fn emit(&self, change: StorageChange) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = sender.as_ref() {
            trace!(namespace = %change.namespace, key = %change.key, "Storage changed");
            let _ = tx.send(change);
        }
    }

    /// Drop the sender; receivers observe `Closed` once drained.
    pub fn dispose(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

impl Default for ChangeEmitter {
    fn default() -> Self {
        Self::new()
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

/// Teardown callbacks released together.
pub struct Disposables {
    /// `None` once disposed.
    items: Mutex<Option<Vec<Teardown>>>,
}

impl Disposables {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Some(Vec::new())),
        }
    }

    /// Register a teardown. Runs immediately if the list is already disposed.
    pub fn push(&self, teardown: impl FnOnce() + Send + 'static) {
        let mut guard = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(items) = guard.as_mut() {
            items.push(Box::new(teardown));
            return;
        }
        drop(guard);
        teardown();
    }

    /// Run every registered teardown, most recent first.
    pub fn dispose(&self) {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner()).take();
        for teardown in items.into_iter().flatten().rev() {
            teardown();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

impl Default for Disposables {
    fn default() -> Self {
        Self::new()
    }
}
