//! Storage error types.

use std::sync::Arc;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Failures of the storage engine and its durable stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A namespace file or config file is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Namespace cannot be mapped onto the backing store.
    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    /// The durable store was used before `init`.
    #[error("Storage server not initialized")]
    NotInitialized,

    /// Failure reported by a durable store implementation.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A scheduled flush failed. Every caller waiting on the batch gets the
    /// same cause.
    #[error("Flush failed: {0}")]
    Flush(Arc<StorageError>),
}

impl StorageError {
    pub fn invalid_namespace(namespace: impl Into<String>) -> Self {
        Self::InvalidNamespace(namespace.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_namespace_names_the_namespace() {
        let err = StorageError::invalid_namespace("../prefs");
        assert_eq!(err.to_string(), "Invalid namespace: ../prefs");
    }

    #[test]
    fn io_and_json_errors_convert() {
        let err: StorageError = std::io::Error::other("disk gone").into();
        assert!(matches!(err, StorageError::Io(_)));

        let err: StorageError = serde_json::from_str::<u32>("{").unwrap_err().into();
        assert!(err.to_string().starts_with("JSON error"));
    }

    #[test]
    fn flush_error_shows_cause() {
        let err = StorageError::Flush(Arc::new(StorageError::backend("disk full")));
        assert_eq!(err.to_string(), "Flush failed: Backend error: disk full");
    }

    #[test]
    fn not_initialized_displays() {
        assert_eq!(
            StorageError::NotInitialized.to_string(),
            "Storage server not initialized"
        );
    }
}
