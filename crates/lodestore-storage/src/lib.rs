//! Storage layer for lodestore.
//!
//! This crate provides a namespaced key-value [`Storage`] with:
//! - an in-memory cache serving every read synchronously
//! - debounced, batched write-back to a durable [`StorageServer`]
//! - an optional fast [`LocalMirror`] consulted before the durable store
//! - change notification on every committed mutation
//!
//! Durable store backends:
//! - JSON files (default)
//! - In-memory (for testing)

pub mod config;
pub mod error;
pub mod event;
pub mod json;
pub mod load;
pub mod memory;
pub mod mirror;
pub mod pending;
pub mod provider;
pub mod ready;
pub mod scheduler;
pub mod server;
pub mod storage;

pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use event::StorageChange;
pub use mirror::LocalMirror;
pub use pending::UpdateRequest;
pub use provider::{StorageProvider, StorageScope};
pub use scheduler::FlushHandle;
pub use server::{ServerTarget, SnapshotProvider, StorageServer, StorageSnapshot};
pub use storage::{Storage, StorageState};
