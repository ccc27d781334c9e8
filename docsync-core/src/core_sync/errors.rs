//! Error types for the sync manager

use crate::core_reactor::ReactorError;
use crate::core_store::StoreError;
use std::sync::PoisonError;
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing with remotes
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Remote already registered: {0}")]
    RemoteExists(String),

    #[error("Remote not found: {0}")]
    RemoteNotFound(String),

    /// Transport failure; isolated to one remote
    #[error("Channel error: {0}")]
    Channel(String),

    /// Inbound operations could not be applied locally
    #[error("Apply error: {0}")]
    Apply(String),

    /// The envelope continues operations this replica has not seen yet
    #[error("Envelope arrived out of order: {0}")]
    OutOfOrder(String),

    #[error(transparent)]
    Reactor(#[from] ReactorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal sync error: {0}")]
    Internal(String),
}

pub(crate) fn handle_poison<T>(_err: PoisonError<T>) -> SyncError {
    SyncError::Internal("Lock poisoned: a thread panicked while holding the lock".to_string())
}
