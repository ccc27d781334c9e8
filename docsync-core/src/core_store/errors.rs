/*
    errors.rs - Error types for the store subsystem

    Defines all error types that can occur in:
    - Operation persistence (write races, missing documents)
    - Collection index queries
    - The durable cursor log
*/

use crate::abort::AbortedError;
use std::sync::PoisonError;
use thiserror::Error;

/// Errors that can occur in the store subsystem
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another operation already occupies this position
    #[error(
        "Duplicate operation at {document_id}/{scope}/{branch} index {index} skip {skip}"
    )]
    DuplicatePosition {
        document_id: String,
        scope: String,
        branch: String,
        index: u64,
        skip: u64,
    },

    /// The read was cancelled
    #[error(transparent)]
    Aborted(#[from] AbortedError),

    /// Storage I/O error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Corrupted data detected
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Rejected input
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Helper to convert poison errors into StoreError
pub(crate) fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Storage("Lock poisoned: a thread panicked while holding the lock".to_string())
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotFound("document doc-1".to_string());
        assert_eq!(err.to_string(), "Not found: document doc-1");
    }

    #[test]
    fn test_duplicate_position_names_slot() {
        let err = StoreError::DuplicatePosition {
            document_id: "doc-1".to_string(),
            scope: "global".to_string(),
            branch: "main".to_string(),
            index: 4,
            skip: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("doc-1/global/main"));
        assert!(msg.contains("index 4 skip 1"));
    }

    #[test]
    fn test_aborted_conversion() {
        let err: StoreError = AbortedError { reason: "stop".to_string() }.into();
        assert!(matches!(err, StoreError::Aborted(_)));
        assert!(err.to_string().contains("stop"));
    }

    #[test]
    fn test_poison_maps_to_storage() {
        let lock = std::sync::Mutex::new(());
        let err = handle_poison(PoisonError::new(lock.lock().unwrap()));
        assert!(matches!(err, StoreError::Storage(_)));
    }
}
