//! Pending-change ledger.
//!
//! Tracks the keys written or removed since the last flush so each flush
//! sends the smallest batch that reproduces the cache's net effect.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A batch of changes applied to the durable store in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Keys to write, with their JSON text.
    #[serde(default)]
    pub insert: BTreeMap<String, String>,
    /// Keys to remove.
    #[serde(default)]
    pub delete: Vec<String>,
}

impl UpdateRequest {
    /// True if the batch carries no changes.
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.delete.is_empty()
    }

    /// Apply the batch to a map: deletes first, then inserts.
    pub fn apply_to(&self, items: &mut HashMap<String, String>) {
        for key in &self.delete {
            items.remove(key);
        }
        for (key, value) in &self.insert {
            items.insert(key.clone(), value.clone());
        }
    }
}

/// Changes accumulated since the last flush.
///
/// A key is never tracked as both inserted and deleted; the later
/// mutation wins.
#[derive(Debug, Default)]
pub struct PendingChanges {
    inserts: BTreeMap<String, String>,
    deletes: BTreeSet<String>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write of `value` to `key`.
    pub fn record_insert(&mut self, key: &str, value: &str) {
        self.deletes.remove(key);
        self.inserts.insert(key.to_string(), value.to_string());
    }

    /// Record the removal of `key`.
    pub fn record_delete(&mut self, key: &str) {
        self.inserts.remove(key);
        self.deletes.insert(key.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.deletes.len()
    }

    /// Replay the ledger onto freshly loaded items.
    pub fn overlay(&self, items: &mut HashMap<String, String>) {
        for key in &self.deletes {
            items.remove(key);
        }
        for (key, value) in &self.inserts {
            items.insert(key.clone(), value.clone());
        }
    }

    /// Cut a batch from the ledger, leaving it empty.
    pub fn take(&mut self) -> UpdateRequest {
        UpdateRequest {
            insert: std::mem::take(&mut self.inserts),
            delete: std::mem::take(&mut self.deletes).into_iter().collect(),
        }
    }
}
