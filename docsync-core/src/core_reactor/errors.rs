/*
    errors.rs - Error types for the reactor

    Everything raised while executing a job ends up here. The reactor
    converts these into job failures; nothing below the execution
    boundary is allowed to take the process down.
*/

use crate::abort::AbortedError;
use crate::core_oplog::{IntegrityIssueKind, OpLogError};
use crate::core_queue::QueueError;
use crate::core_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the reactor
#[derive(Debug, Error)]
pub enum ReactorError {
    /// No model is registered for this document type
    #[error("Unknown document type: {0}")]
    UnknownDocumentType(String),

    /// A model with this document type is already registered
    #[error("Document type already registered: {0}")]
    DuplicateDocumentType(String),

    /// The action did not decode for the document model
    #[error("Invalid action {action_type}: {reason}")]
    InvalidAction { action_type: String, reason: String },

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Document already exists: {0}")]
    DocumentExists(String),

    /// Loaded operations must carry a timestamp
    #[error("Operation {operation_id} has no timestamp")]
    MissingTimestamp { operation_id: String },

    #[error(transparent)]
    OpLog(#[from] OpLogError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Aborted(#[from] AbortedError),

    /// Rejected request
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ReactorError {
    /// Loaded operations start past the end of the local history. Waiting
    /// for the missing operations can fix this, retrying alone cannot.
    pub fn is_out_of_order(&self) -> bool {
        match self {
            ReactorError::OpLog(OpLogError::Integrity(issues)) => {
                issues.iter().any(|issue| issue.kind == IntegrityIssueKind::MissingIndex)
            }
            _ => false,
        }
    }
}

/// Result type for reactor operations
pub type ReactorResult<T> = Result<T, ReactorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_oplog::IntegrityIssue;

    #[test]
    fn test_reactor_error_display() {
        let err = ReactorError::InvalidAction {
            action_type: "INCREMENT".to_string(),
            reason: "missing field `by`".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid action INCREMENT: missing field `by`");
    }

    #[test]
    fn test_only_missing_index_is_out_of_order() {
        let gap = IntegrityIssue::new(3, 0, IntegrityIssueKind::MissingIndex);
        assert!(ReactorError::OpLog(OpLogError::Integrity(vec![gap])).is_out_of_order());

        let clash = IntegrityIssue::new(1, 0, IntegrityIssueKind::DuplicatedIndex);
        assert!(!ReactorError::OpLog(OpLogError::Integrity(vec![clash])).is_out_of_order());
        assert!(!ReactorError::DocumentNotFound("doc".to_string()).is_out_of_order());
    }

    #[test]
    fn test_queue_error_passes_through() {
        let err: ReactorError = QueueError::QueueBlocked.into();
        assert_eq!(err.to_string(), "Queue is blocked");
    }
}
