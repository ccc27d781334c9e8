/*
    memory.rs - In-memory operation store and collection index

    Operations, headers and collection memberships live behind a single
    lock so that one batch and the membership changes it implies become
    visible together. Every committed operation gets the next value of a
    store-wide ordinal.
*/

use super::collection_index::{collection_id, CollectionIndex, Membership};
use super::errors::{handle_poison, StoreError, StoreResult};
use super::operation_store::{
    CollectionChange, CommitResult, DocumentHeader, OperationStore, ScopeKey, WriteBatch,
};
use crate::abort::AbortSignal;
use crate::core_oplog::{now_millis, Operation, OperationContext, OperationWithContext};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::RwLock;

#[derive(Debug, Default)]
struct Collection {
    /// Branch the collection was created for; `None` matches every branch
    branch: Option<String>,
    members: HashMap<String, Vec<Membership>>,
}

#[derive(Debug)]
struct StoreState {
    next_ordinal: u64,
    headers: HashMap<String, DocumentHeader>,
    sequences: HashMap<ScopeKey, Vec<Operation>>,
    log: BTreeMap<u64, OperationWithContext>,
    ids: HashSet<String>,
    collections: HashMap<String, Collection>,
}

impl Default for StoreState {
    fn default() -> Self {
        StoreState {
            next_ordinal: 1,
            headers: HashMap::new(),
            sequences: HashMap::new(),
            log: BTreeMap::new(),
            ids: HashSet::new(),
            collections: HashMap::new(),
        }
    }
}

impl StoreState {
    fn open_collections(&self, document_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .collections
            .iter()
            .filter(|(_, collection)| {
                collection
                    .members
                    .get(document_id)
                    .is_some_and(|intervals| intervals.iter().any(Membership::is_open))
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn create(&mut self, collection_id: &str, branch: Option<&str>) {
        let collection = self.collections.entry(collection_id.to_string()).or_default();
        if collection.branch.is_none() {
            collection.branch = branch.map(str::to_string);
        }
    }

    fn join(&mut self, collection_id: &str, document_id: &str, ordinal: u64) {
        let intervals = self
            .collections
            .entry(collection_id.to_string())
            .or_default()
            .members
            .entry(document_id.to_string())
            .or_default();

        if !intervals.iter().any(Membership::is_open) {
            intervals.push(Membership::open(ordinal));
        }
    }

    fn leave(&mut self, collection_id: &str, document_id: &str, ordinal: u64) {
        let open = self
            .collections
            .get_mut(collection_id)
            .and_then(|collection| collection.members.get_mut(document_id))
            .and_then(|intervals| intervals.iter_mut().find(|m| m.is_open()));

        if let Some(membership) = open {
            membership.left_ordinal = Some(ordinal);
        }
    }

    fn apply_change(&mut self, change: &CollectionChange, ordinal: u64, branch: &str) {
        match change {
            CollectionChange::Create { collection_id } => self.create(collection_id, Some(branch)),
            CollectionChange::Add { collection_id, document_id } => {
                self.join(collection_id, document_id, ordinal)
            }
            CollectionChange::Remove { collection_id, document_id } => {
                self.leave(collection_id, document_id, ordinal)
            }
            CollectionChange::Inherit { document_id, from_document_id } => {
                for id in self.open_collections(from_document_id) {
                    self.join(&id, document_id, ordinal);
                }
            }
            CollectionChange::Disinherit { document_id, from_document_id } => {
                let own = collection_id(branch, document_id);
                for id in self.open_collections(from_document_id) {
                    if id != own {
                        self.leave(&id, document_id, ordinal);
                    }
                }
            }
        }
    }

    fn find(&self, collection_id: &str, after_ordinal: u64) -> Vec<OperationWithContext> {
        let Some(collection) = self.collections.get(collection_id) else {
            return Vec::new();
        };

        self.log
            .range((Bound::Excluded(after_ordinal), Bound::Unbounded))
            .filter(|(ordinal, entry)| {
                collection.branch.as_ref().map_or(true, |branch| *branch == entry.context.branch)
                    && collection
                        .members
                        .get(&entry.context.document_id)
                        .is_some_and(|intervals| intervals.iter().any(|m| m.covers(**ordinal)))
            })
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    fn sequence(&self, key: &ScopeKey) -> &[Operation] {
        self.sequences.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Volatile operation store with an integrated collection index
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered<F>(&self, key: &ScopeKey, abort: &AbortSignal, keep: F) -> StoreResult<Vec<Operation>>
    where
        F: Fn(&Operation) -> bool,
    {
        abort.check()?;
        let state = self.state.read().map_err(handle_poison)?;
        Ok(state.sequence(key).iter().filter(|op| keep(op)).cloned().collect())
    }
}

#[async_trait]
impl OperationStore for InMemoryStore {
    async fn apply(&self, batch: WriteBatch) -> StoreResult<CommitResult> {
        let mut guard = self.state.write().map_err(handle_poison)?;
        let state = &mut *guard;

        let mut claimed = HashSet::new();
        for op in &batch.operations {
            let key = ScopeKey::new(&batch.document_id, op.scope(), &batch.branch);
            let taken = state.sequence(&key).iter().any(|existing| existing.position() == op.position());
            if taken || !claimed.insert((op.scope().to_string(), op.position())) {
                return Err(StoreError::DuplicatePosition {
                    document_id: batch.document_id.clone(),
                    scope: op.scope().to_string(),
                    branch: batch.branch.clone(),
                    index: op.index,
                    skip: op.skip,
                });
            }
        }

        let commit_ordinal = state.next_ordinal;

        if !state.headers.contains_key(&batch.document_id) {
            let created_at_utc_ms =
                batch.operations.first().map(|op| op.timestamp_utc_ms).unwrap_or_else(now_millis);
            state.headers.insert(
                batch.document_id.clone(),
                DocumentHeader {
                    id: batch.document_id.clone(),
                    document_type: batch.document_type.clone(),
                    parent_id: batch.parent_id.clone(),
                    created_at_utc_ms,
                },
            );
        }

        for change in &batch.collection_changes {
            state.apply_change(change, commit_ordinal, &batch.branch);
        }

        let mut committed = Vec::with_capacity(batch.operations.len());
        for op in batch.operations {
            let ordinal = state.next_ordinal;
            state.next_ordinal += 1;

            let context = OperationContext {
                document_id: batch.document_id.clone(),
                document_type: batch.document_type.clone(),
                scope: op.scope().to_string(),
                branch: batch.branch.clone(),
                ordinal,
                source_remote: batch.source_remote.clone(),
            };

            state.ids.insert(op.id.clone());

            let key = ScopeKey::new(&batch.document_id, op.scope(), &batch.branch);
            let sequence = state.sequences.entry(key).or_default();
            let position = sequence.partition_point(|existing| existing.position() < op.position());
            sequence.insert(position, op.clone());

            let entry = OperationWithContext { operation: op, context };
            state.log.insert(ordinal, entry.clone());
            committed.push(entry);
        }

        let mut collection_memberships = HashMap::new();
        let collections = state.open_collections(&batch.document_id);
        if !collections.is_empty() {
            collection_memberships.insert(batch.document_id.clone(), collections);
        }

        tracing::debug!(
            document_id = %batch.document_id,
            branch = %batch.branch,
            operations = committed.len(),
            commit_ordinal,
            "Committed batch"
        );

        Ok(CommitResult { operations: committed, collection_memberships })
    }

    async fn get(&self, key: &ScopeKey, abort: &AbortSignal) -> StoreResult<Vec<Operation>> {
        self.filtered(key, abort, |_| true)
    }

    async fn get_since(&self, key: &ScopeKey, after_index: u64, abort: &AbortSignal) -> StoreResult<Vec<Operation>> {
        self.filtered(key, abort, |op| op.index > after_index)
    }

    async fn get_since_timestamp(
        &self,
        key: &ScopeKey,
        after_utc_ms: u64,
        abort: &AbortSignal,
    ) -> StoreResult<Vec<Operation>> {
        self.filtered(key, abort, |op| op.timestamp_utc_ms > after_utc_ms)
    }

    async fn get_conflicting(&self, key: &ScopeKey, min_index: u64, abort: &AbortSignal) -> StoreResult<Vec<Operation>> {
        self.filtered(key, abort, |op| op.index >= min_index)
    }

    async fn get_revisions(
        &self,
        document_id: &str,
        branch: &str,
        abort: &AbortSignal,
    ) -> StoreResult<BTreeMap<String, u64>> {
        abort.check()?;
        let state = self.state.read().map_err(handle_poison)?;

        Ok(state
            .sequences
            .iter()
            .filter(|(key, _)| key.document_id == document_id && key.branch == branch)
            .map(|(key, ops)| (key.scope.clone(), ops.last().map(|op| op.index + 1).unwrap_or(0)))
            .collect())
    }

    async fn existing_ids(&self, ids: &[String], abort: &AbortSignal) -> StoreResult<HashSet<String>> {
        abort.check()?;
        let state = self.state.read().map_err(handle_poison)?;
        Ok(ids.iter().filter(|id| state.ids.contains(*id)).cloned().collect())
    }

    async fn get_header(&self, document_id: &str, abort: &AbortSignal) -> StoreResult<DocumentHeader> {
        abort.check()?;
        let state = self.state.read().map_err(handle_poison)?;
        state
            .headers
            .get(document_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("document {}", document_id)))
    }

    async fn has_document(&self, document_id: &str, abort: &AbortSignal) -> StoreResult<bool> {
        abort.check()?;
        Ok(self.state.read().map_err(handle_poison)?.headers.contains_key(document_id))
    }

    async fn count(&self, abort: &AbortSignal) -> StoreResult<usize> {
        abort.check()?;
        Ok(self.state.read().map_err(handle_poison)?.log.len())
    }
}

#[async_trait]
impl CollectionIndex for InMemoryStore {
    async fn create_collection(&self, collection_id: &str) -> StoreResult<()> {
        self.state.write().map_err(handle_poison)?.create(collection_id, None);
        Ok(())
    }

    async fn add_to_collection(&self, collection_id: &str, document_id: &str) -> StoreResult<()> {
        let mut state = self.state.write().map_err(handle_poison)?;
        let ordinal = state.next_ordinal;
        state.join(collection_id, document_id, ordinal);
        Ok(())
    }

    async fn remove_from_collection(&self, collection_id: &str, document_id: &str) -> StoreResult<()> {
        let mut state = self.state.write().map_err(handle_poison)?;
        let ordinal = state.next_ordinal;
        state.leave(collection_id, document_id, ordinal);
        Ok(())
    }

    async fn find(
        &self,
        collection_id: &str,
        after_ordinal: u64,
        abort: &AbortSignal,
    ) -> StoreResult<Vec<OperationWithContext>> {
        abort.check()?;
        Ok(self.state.read().map_err(handle_poison)?.find(collection_id, after_ordinal))
    }

    async fn get_latest_timestamp_for_collection(
        &self,
        collection_id: &str,
        abort: &AbortSignal,
    ) -> StoreResult<Option<u64>> {
        abort.check()?;
        let state = self.state.read().map_err(handle_poison)?;
        Ok(state
            .find(collection_id, 0)
            .iter()
            .map(|entry| entry.operation.timestamp_utc_ms)
            .max())
    }

    async fn get_collections_for_documents(
        &self,
        document_ids: &[String],
        abort: &AbortSignal,
    ) -> StoreResult<HashMap<String, Vec<String>>> {
        abort.check()?;
        let state = self.state.read().map_err(handle_poison)?;

        Ok(document_ids
            .iter()
            .filter_map(|id| {
                let collections = state.open_collections(id);
                (!collections.is_empty()).then(|| (id.clone(), collections))
            })
            .collect())
    }
}
