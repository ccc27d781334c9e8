/*
    errors.rs - Error types for the operation log engine

    Algorithmic failures are raised synchronously from the pure functions
    in this module and converted into job failures at the execution
    boundary.
*/

use super::integrity::IntegrityIssue;
use thiserror::Error;

/// A replayed operation produced a state whose hash differs from the one
/// recorded on the operation. Fatal for the replay that detected it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Hash mismatch in scope '{scope}' at index {index} (operation {operation_id}): expected {expected}, got {actual}"
)]
pub struct HashMismatchError {
    pub scope: String,
    pub index: u64,
    pub operation_id: String,
    pub expected: String,
    pub actual: String,
}

/// Errors raised by the operation log engine
#[derive(Debug, Error)]
pub enum OpLogError {
    /// Replay detected divergent state
    #[error(transparent)]
    HashMismatch(#[from] HashMismatchError),

    /// Incoming operations violate index continuity
    #[error("Integrity violation: {}", format_issues(.0))]
    Integrity(Vec<IntegrityIssue>),

    /// The domain reducer rejected an action
    #[error("Reducer error for action {action_type}: {reason}")]
    Reducer { action_type: String, reason: String },

    /// An undo was requested with nothing left to cancel
    #[error("Nothing to undo in scope '{0}'")]
    NothingToUndo(String),

    /// State could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for operation log functions
pub type OpLogResult<T> = Result<T, OpLogError>;

fn format_issues(issues: &[IntegrityIssue]) -> String {
    issues.iter().map(|issue| issue.message.as_str()).collect::<Vec<_>>().join("; ")
}

impl From<serde_json::Error> for OpLogError {
    fn from(err: serde_json::Error) -> Self {
        OpLogError::Serialization(err.to_string())
    }
}
