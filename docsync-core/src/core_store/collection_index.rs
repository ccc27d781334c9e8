/*
    collection_index.rs - Time-scoped collection membership

    A collection groups documents that sync together. Membership is a list
    of half-open ordinal intervals [joined, left): an operation belongs to
    a collection only if it was committed while its document was a member.
*/

use super::errors::StoreResult;
use crate::abort::AbortSignal;
use crate::core_oplog::OperationWithContext;
use async_trait::async_trait;
use std::collections::HashMap;

/// Collection rooted at `root_document_id` on `branch`
pub fn collection_id(branch: &str, root_document_id: &str) -> String {
    format!("{}.{}", branch, root_document_id)
}

/// One membership interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub joined_ordinal: u64,
    pub left_ordinal: Option<u64>,
}

impl Membership {
    pub fn open(joined_ordinal: u64) -> Self {
        Membership { joined_ordinal, left_ordinal: None }
    }

    pub fn is_open(&self) -> bool {
        self.left_ordinal.is_none()
    }

    pub fn covers(&self, ordinal: u64) -> bool {
        ordinal >= self.joined_ordinal && self.left_ordinal.map_or(true, |left| ordinal < left)
    }
}

/// Collection membership index
#[async_trait]
pub trait CollectionIndex: Send + Sync {
    async fn create_collection(&self, collection_id: &str) -> StoreResult<()>;

    /// Open a membership interval at the next ordinal; no-op if already a member
    async fn add_to_collection(&self, collection_id: &str, document_id: &str) -> StoreResult<()>;

    /// Close the open membership interval at the next ordinal
    async fn remove_from_collection(&self, collection_id: &str, document_id: &str) -> StoreResult<()>;

    /// Operations of the collection's members committed while they were
    /// members, with ordinal above `after_ordinal`, in ordinal order
    async fn find(
        &self,
        collection_id: &str,
        after_ordinal: u64,
        abort: &AbortSignal,
    ) -> StoreResult<Vec<OperationWithContext>>;

    async fn get_latest_timestamp_for_collection(
        &self,
        collection_id: &str,
        abort: &AbortSignal,
    ) -> StoreResult<Option<u64>>;

    /// Current collections of each document. Documents without any
    /// membership are absent from the result.
    async fn get_collections_for_documents(
        &self,
        document_ids: &[String],
        abort: &AbortSignal,
    ) -> StoreResult<HashMap<String, Vec<String>>>;
}
