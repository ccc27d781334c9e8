/*
    operation_store.rs - Operation persistence interface

    Committed operations are immutable. The only write is `apply`, which
    appends one job's operations together with the collection membership
    changes they imply, as a single atomic commit.
*/

use super::errors::StoreResult;
use crate::abort::AbortSignal;
use crate::core_oplog::{Operation, OperationWithContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Identity of one operation sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey {
    pub document_id: String,
    pub scope: String,
    pub branch: String,
}

impl ScopeKey {
    pub fn new(document_id: impl Into<String>, scope: impl Into<String>, branch: impl Into<String>) -> Self {
        ScopeKey { document_id: document_id.into(), scope: scope.into(), branch: branch.into() }
    }
}

/// Per-document metadata, created by the first commit for a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHeader {
    pub id: String,
    pub document_type: String,
    pub parent_id: Option<String>,
    pub created_at_utc_ms: u64,
}

/// Membership change committed together with a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionChange {
    Create { collection_id: String },
    Add { collection_id: String, document_id: String },
    Remove { collection_id: String, document_id: String },

    /// Join every collection `from_document_id` currently belongs to
    Inherit { document_id: String, from_document_id: String },

    /// Leave every collection `from_document_id` belongs to, except the
    /// document's own collection
    Disinherit { document_id: String, from_document_id: String },
}

/// Everything one job commits
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub document_id: String,
    pub document_type: String,
    pub branch: String,

    /// Used only when the batch creates the document header
    pub parent_id: Option<String>,

    /// New operations; the scope of each is taken from its action
    pub operations: Vec<Operation>,

    /// Remote the operations arrived from; empty for local writes
    pub source_remote: String,

    pub collection_changes: Vec<CollectionChange>,
}

/// Outcome of a commit
#[derive(Debug, Clone, Default)]
pub struct CommitResult {
    /// Committed operations with their assigned ordinals
    pub operations: Vec<OperationWithContext>,

    /// Collections of the batch's document right after the commit
    pub collection_memberships: HashMap<String, Vec<String>>,
}

/// Operation persistence
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Commit a batch atomically. Fails with `DuplicatePosition` if any
    /// operation's (document, scope, branch, index, skip) is taken.
    async fn apply(&self, batch: WriteBatch) -> StoreResult<CommitResult>;

    /// Full history of one sequence in (index, skip) order
    async fn get(&self, key: &ScopeKey, abort: &AbortSignal) -> StoreResult<Vec<Operation>>;

    /// Operations with index strictly above `after_index`
    async fn get_since(&self, key: &ScopeKey, after_index: u64, abort: &AbortSignal) -> StoreResult<Vec<Operation>>;

    /// Operations with a timestamp strictly above `after_utc_ms`
    async fn get_since_timestamp(
        &self,
        key: &ScopeKey,
        after_utc_ms: u64,
        abort: &AbortSignal,
    ) -> StoreResult<Vec<Operation>>;

    /// Operations at or above `min_index`: the ones an incoming batch
    /// starting at `min_index` would collide with
    async fn get_conflicting(&self, key: &ScopeKey, min_index: u64, abort: &AbortSignal) -> StoreResult<Vec<Operation>>;

    /// Next index per scope of a document branch
    async fn get_revisions(
        &self,
        document_id: &str,
        branch: &str,
        abort: &AbortSignal,
    ) -> StoreResult<BTreeMap<String, u64>>;

    /// Subset of `ids` already committed anywhere in the store
    async fn existing_ids(&self, ids: &[String], abort: &AbortSignal) -> StoreResult<HashSet<String>>;

    async fn get_header(&self, document_id: &str, abort: &AbortSignal) -> StoreResult<DocumentHeader>;

    async fn has_document(&self, document_id: &str, abort: &AbortSignal) -> StoreResult<bool>;

    /// Total committed operations
    async fn count(&self, abort: &AbortSignal) -> StoreResult<usize>;
}

/// Operation storage with an integrated collection index, so a batch and
/// the membership changes it implies commit together
pub trait DocumentStore: OperationStore + super::collection_index::CollectionIndex {}

impl<T: OperationStore + super::collection_index::CollectionIndex> DocumentStore for T {}
