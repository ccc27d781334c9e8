//! Error types for the job queue and tracker

use std::sync::PoisonError;
use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur in the job queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue is draining and rejects new jobs
    #[error("Queue is blocked")]
    QueueBlocked,

    /// The keyed queue reached its configured bound
    #[error("Queue {key} is full ({limit} pending jobs)")]
    QueueFull { key: String, limit: usize },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// A job with this id is already queued or running
    #[error("Duplicate job: {0}")]
    DuplicateJob(String),

    /// Waiting for a job's terminal state timed out
    #[error("Timed out waiting for job {0}")]
    Timeout(String),

    #[error("Internal queue error: {0}")]
    Internal(String),
}

pub(crate) fn handle_poison<T>(_err: PoisonError<T>) -> QueueError {
    QueueError::Internal("Lock poisoned: a thread panicked while holding the lock".to_string())
}
