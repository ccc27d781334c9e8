/*
    core_store - Operation persistence and collection membership

    The authoritative state layer underneath the reactor.
    Handles:
    - Append-only operation storage with a store-wide commit ordinal
    - Time-scoped collection membership used for sync routing
    - Durable, monotonic sync cursors on a checksummed commit log
*/

pub mod collection_index;
pub mod commit_log;
pub mod cursor_store;
pub mod errors;
pub mod memory;
pub mod operation_store;

#[cfg(test)]
pub mod tests;

pub use collection_index::{collection_id, CollectionIndex, Membership};
pub use commit_log::{CommitLog, LogEntry};
pub use cursor_store::{CursorStore, CursorType, FileCursorStore, InMemoryCursorStore, SyncCursor};
pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use operation_store::{
    CollectionChange, CommitResult, DocumentHeader, DocumentStore, OperationStore, ScopeKey, WriteBatch,
};
