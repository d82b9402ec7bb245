//! Fast local mirror contract.
//!
//! A mirror is an optional secondary cache consulted before the durable
//! store on load, and kept in step with it on every flush.

use crate::StorageResult;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait LocalMirror: Send + Sync {
    /// Get the mirrored items of `namespace`, or `None` if nothing is mirrored.
    async fn get_data(&self, namespace: &str) -> StorageResult<Option<HashMap<String, String>>>;

    /// Replace the mirrored items of `namespace`.
    async fn set_data(&self, namespace: &str, data: HashMap<String, String>) -> StorageResult<()>;
}
