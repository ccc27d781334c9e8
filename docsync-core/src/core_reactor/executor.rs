/*
    executor.rs - Turn one job into one atomic commit

    Mutation jobs replay the scope, apply each action through the model
    and append the resulting operations. Load jobs import operations from
    another replica: operations already stored at the same position are
    dropped, a clean continuation is appended as is, and anything else is
    merged into a reshuffled suffix placed above both histories.

    Relationship operations in the `document` scope drive collection
    membership, and the membership changes are committed with the batch.
*/

use super::errors::{ReactorError, ReactorResult};
use super::registry::{DocumentModelRegistry, DocumentScopeAction, UNDO};
use crate::abort::AbortSignal;
use crate::config::ReactorConfig;
use crate::core_oplog::{
    apply_action, check_cleaned_operations_integrity, derive_operation_id, garbage_collect, garbage_collect_with,
    hash_state, next_undo_position, now_millis, precedes, replay_scope, sort_operations, Action, IntegrityIssue,
    IntegrityIssueKind, OpLogError, Operation, ReplayOptions, StartIndex, DOCUMENT_SCOPE, NOOP,
};
use crate::core_queue::{Job, JobKind};
use crate::core_store::{collection_id, CollectionChange, CommitResult, DocumentStore, ScopeKey, WriteBatch};
use crate::metrics::{self, Timer, OPLOG_MERGE_DURATION_MS, OPLOG_MERGE_TOTAL};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct JobExecutor {
    config: ReactorConfig,
    registry: Arc<DocumentModelRegistry>,
    store: Arc<dyn DocumentStore>,
}

impl JobExecutor {
    pub fn new(config: ReactorConfig, registry: Arc<DocumentModelRegistry>, store: Arc<dyn DocumentStore>) -> Self {
        JobExecutor { config, registry, store }
    }

    pub async fn execute(&self, job: &Job) -> ReactorResult<CommitResult> {
        match job.kind {
            JobKind::Mutation => self.execute_mutation(job).await,
            JobKind::Load => self.execute_load(job).await,
        }
    }

    fn replay_options(&self) -> ReplayOptions {
        ReplayOptions { variant: self.config.gc_variant, use_checkpoints: true, verify_hashes: false }
    }

    async fn execute_mutation(&self, job: &Job) -> ReactorResult<CommitResult> {
        let key = ScopeKey::new(&job.document_id, &job.scope, &job.branch);
        let abort = AbortSignal::never();
        let history = self.store.get(&key, &abort).await?;
        let model = self.registry.reducer_for(&job.document_type, &job.scope)?;

        let mut state = replay_scope(model.as_reducer(), &job.scope, &history, self.replay_options())?.state;
        let mut working = history.clone();
        let mut appended = Vec::with_capacity(job.actions.len());

        for action in &job.actions {
            if action.scope != job.scope {
                return Err(ReactorError::Validation(format!(
                    "action {} targets scope '{}' in a job for scope '{}'",
                    action.id, action.scope, job.scope
                )));
            }

            let op = if action.action_type == UNDO {
                let position = next_undo_position(&working)
                    .ok_or_else(|| OpLogError::NothingToUndo(job.scope.clone()))?;
                let noop = Action { action_type: NOOP.to_string(), input: Value::Null, ..action.clone() };
                let mut op = self.new_operation(job, noop, position.index, position.skip);

                let mut candidate = working.clone();
                candidate.push(op.clone());
                state = replay_scope(model.as_reducer(), &job.scope, &candidate, self.replay_options())?.state;
                op.hash = hash_state(&state)?;
                op
            } else {
                self.registry.validate_action(&job.document_type, action)?;
                let index = working.last().map_or(0, |tail| tail.index + 1);
                let mut op = self.new_operation(job, action.clone(), index, 0);

                state = apply_action(model.as_reducer(), &job.scope, &state, action)?;
                op.hash = hash_state(&state)?;
                if !op.is_noop() && self.is_checkpoint(index) {
                    op.resulting_state = Some(serde_json::to_string(&state).map_err(OpLogError::from)?);
                }
                op
            };

            working.push(op.clone());
            appended.push(op);
        }

        let collection_changes = if job.scope == DOCUMENT_SCOPE {
            self.membership_changes(&job.document_id, &job.branch, &history, &appended)
        } else {
            Vec::new()
        };

        let batch = WriteBatch {
            document_id: job.document_id.clone(),
            document_type: job.document_type.clone(),
            branch: job.branch.clone(),
            parent_id: created_parent(&appended),
            operations: appended,
            source_remote: String::new(),
            collection_changes,
        };
        Ok(self.store.apply(batch).await?)
    }

    async fn execute_load(&self, job: &Job) -> ReactorResult<CommitResult> {
        if let Some(op) = job.operations.iter().find(|op| op.timestamp_utc_ms == 0) {
            return Err(ReactorError::MissingTimestamp { operation_id: op.id.clone() });
        }
        if let Some(op) = job.operations.iter().find(|op| op.scope() != job.scope) {
            return Err(ReactorError::Validation(format!(
                "operation {} belongs to scope '{}' in a load for scope '{}'",
                op.id,
                op.scope(),
                job.scope
            )));
        }
        for op in &job.operations {
            self.registry.validate_action(&job.document_type, &op.action)?;
        }

        let abort = AbortSignal::never();
        let key = ScopeKey::new(&job.document_id, &job.scope, &job.branch);
        let history = sort_operations(&self.store.get(&key, &abort).await?);

        // An id may come back at a new position after a merge, so only an
        // exact (id, index, skip) match counts as already known
        let known: HashSet<(u64, u64, &str)> = history.iter().map(placement).collect();
        let mut seen = HashSet::new();
        let incoming: Vec<Operation> = sort_operations(&job.operations)
            .into_iter()
            .filter(|op| !known.contains(&placement(op)) && seen.insert((op.index, op.skip, op.id.clone())))
            .collect();

        if incoming.is_empty() {
            debug!(
                job_id = %job.id,
                document_id = %job.document_id,
                received = job.operations.len(),
                "Every loaded operation is already known"
            );
            return Ok(CommitResult::default());
        }

        let (operations, source_remote) = if self.appendable(&history, &incoming)? {
            if self.config.verify_hashes_on_load {
                self.verify(job, &history, &incoming)?;
            }
            (incoming, job.source_remote.clone())
        } else {
            (self.reconcile(job, &history, &incoming)?, String::new())
        };

        if operations.is_empty() {
            return Ok(CommitResult::default());
        }

        let collection_changes = if job.scope == DOCUMENT_SCOPE {
            self.membership_changes(&job.document_id, &job.branch, &history, &operations)
        } else {
            Vec::new()
        };

        let batch = WriteBatch {
            document_id: job.document_id.clone(),
            document_type: job.document_type.clone(),
            branch: job.branch.clone(),
            parent_id: created_parent(&operations),
            operations,
            source_remote,
            collection_changes,
        };
        Ok(self.store.apply(batch).await?)
    }

    /// True when `incoming` can be stored exactly as the sender wrote it:
    /// it sorts after the whole local history and keeps every active local
    /// operation alive, unless it carries an undo. A load that starts past
    /// the end of local history is an integrity error.
    fn appendable(&self, history: &[Operation], incoming: &[Operation]) -> ReactorResult<bool> {
        let Some(first) = incoming.first() else {
            return Ok(false);
        };
        let expected = history.last().map_or(0, |tail| tail.index + 1);
        if first.index.saturating_sub(first.skip) > expected {
            let issue = IntegrityIssue::new(first.index, first.skip, IntegrityIssueKind::MissingIndex);
            return Err(OpLogError::Integrity(vec![issue]).into());
        }
        if history.last().is_some_and(|tail| !precedes(tail, first)) {
            return Ok(false);
        }

        let mut combined = history.to_vec();
        combined.extend(incoming.iter().cloned());
        let combined = sort_operations(&combined);

        let positions: HashSet<(u64, u64)> = incoming.iter().map(Operation::position).collect();
        let consistent = check_cleaned_operations_integrity(&garbage_collect(&combined))
            .iter()
            .all(|issue| !positions.contains(&(issue.index, issue.skip)));
        if !consistent {
            return Ok(false);
        }

        let variant = self.config.gc_variant;
        let after = garbage_collect_with(&combined, variant);
        let mut surviving = HashSet::with_capacity(after.len());
        if !after.iter().all(|op| surviving.insert(op.id.as_str())) {
            return Ok(false);
        }
        if incoming.iter().any(Operation::is_noop) {
            return Ok(true);
        }

        Ok(garbage_collect_with(history, variant)
            .iter()
            .filter(|op| !op.is_noop())
            .all(|op| surviving.contains(op.id.as_str())))
    }

    /// Merge a divergent load into local history and return the operations
    /// to append: the reshuffled suffix above everything either side has
    /// written, rehashed, with its origin cleared.
    ///
    /// The suffix starts below the lowest position the load touches and
    /// below every local operation the load also carries. When the load
    /// adds nothing new, the arrangement with the greater (index, skip, id)
    /// sequence wins and a losing load appends nothing. Appending and
    /// merging both raise that sequence, so replicas settle on the highest.
    fn reconcile(&self, job: &Job, history: &[Operation], incoming: &[Operation]) -> ReactorResult<Vec<Operation>> {
        let timer = Timer::new(OPLOG_MERGE_DURATION_MS);
        let trace = crate::tracing::oplog::trace_merge(&job.scope, history.len(), incoming.len());

        let variant = self.config.gc_variant;
        let active = garbage_collect_with(history, variant);
        let remote = garbage_collect_with(incoming, variant);

        let incoming_ids: HashSet<&str> = incoming.iter().map(|op| op.id.as_str()).collect();
        let floor = incoming.iter().map(|op| op.index.saturating_sub(op.skip)).min().unwrap_or(0);
        let split_at = active
            .iter()
            .filter(|op| incoming_ids.contains(op.id.as_str()))
            .map(|op| op.index)
            .fold(floor, u64::min);

        let common: Vec<Operation> = active.iter().filter(|op| op.index < split_at).cloned().collect();
        let local: Vec<Operation> =
            active.iter().filter(|op| op.index >= split_at && !op.is_noop()).cloned().collect();
        let local_ids: HashSet<&str> = local.iter().map(|op| op.id.as_str()).collect();
        let added: Vec<Operation> =
            remote.iter().filter(|op| !op.is_noop() && !local_ids.contains(op.id.as_str())).cloned().collect();

        let remote_wins =
            common.iter().chain(&remote).map(placement).cmp(active.iter().map(placement)) == Ordering::Greater;

        if added.is_empty() && !remote_wins {
            debug!(
                job_id = %job.id,
                document_id = %job.document_id,
                scope = %job.scope,
                "Loaded arrangement loses against local history"
            );
            trace.complete();
            return Ok(Vec::new());
        }

        let tail = history.last().map_or(0, |op| op.index);
        let remote_tail = incoming.iter().map(|op| op.index).max().unwrap_or(0);
        let index = tail.max(remote_tail) + 1;
        let base = common.last().map_or(0, |op| op.index + 1);
        let start = StartIndex { index, skip: index - base };
        let suffix = self.config.reshuffle.reshuffle(start, &local, &added);

        let model = self.registry.reducer_for(&job.document_type, &job.scope)?;
        let mut state = replay_scope(model.as_reducer(), &job.scope, &common, self.replay_options())?.state;

        let mut reshuffled = Vec::with_capacity(suffix.len());
        for mut op in suffix {
            state = apply_action(model.as_reducer(), &job.scope, &state, &op.action)?;
            op.hash = hash_state(&state)?;
            reshuffled.push(op);
        }

        info!(
            job_id = %job.id,
            document_id = %job.document_id,
            scope = %job.scope,
            common = common.len(),
            added = added.len(),
            reshuffled = reshuffled.len(),
            "Merged divergent history"
        );
        metrics::record_counter(OPLOG_MERGE_TOTAL, 1);
        trace.complete();
        timer.stop();
        Ok(reshuffled)
    }

    fn verify(&self, job: &Job, history: &[Operation], valid: &[Operation]) -> ReactorResult<()> {
        let model = self.registry.reducer_for(&job.document_type, &job.scope)?;
        let mut candidate = history.to_vec();
        candidate.extend(valid.iter().cloned());
        let options = ReplayOptions { variant: self.config.gc_variant, ..ReplayOptions::verifying() };
        replay_scope(model.as_reducer(), &job.scope, &sort_operations(&candidate), options)?;
        Ok(())
    }

    fn new_operation(&self, job: &Job, mut action: Action, index: u64, skip: u64) -> Operation {
        if action.timestamp_utc_ms == 0 {
            action.timestamp_utc_ms = now_millis();
        }
        Operation {
            id: derive_operation_id(&job.document_id, &job.scope, &job.branch, &action.id),
            index,
            skip,
            hash: String::new(),
            timestamp_utc_ms: action.timestamp_utc_ms,
            action,
            resulting_state: None,
        }
    }

    fn is_checkpoint(&self, index: u64) -> bool {
        let interval = self.config.checkpoint_interval;
        interval > 0 && (index + 1) % interval == 0
    }

    /// Membership changes implied by appending `appended` to `history`:
    /// relationship operations that became active apply, relationship
    /// operations that were cancelled are reverted
    fn membership_changes(
        &self,
        document_id: &str,
        branch: &str,
        history: &[Operation],
        appended: &[Operation],
    ) -> Vec<CollectionChange> {
        let variant = self.config.gc_variant;
        let before = garbage_collect_with(history, variant);
        let mut combined = history.to_vec();
        combined.extend(appended.iter().cloned());
        let after = garbage_collect_with(&sort_operations(&combined), variant);

        let before_ids: HashSet<&str> = before.iter().map(|op| op.id.as_str()).collect();
        let after_ids: HashSet<&str> = after.iter().map(|op| op.id.as_str()).collect();

        let mut changes = Vec::new();
        for op in before.iter().filter(|op| !after_ids.contains(op.id.as_str())) {
            match DocumentScopeAction::decode(&op.action) {
                Ok(DocumentScopeAction::AddRelationship { child_id }) => changes.push(CollectionChange::Disinherit {
                    document_id: child_id,
                    from_document_id: document_id.to_string(),
                }),
                Ok(DocumentScopeAction::RemoveRelationship { child_id }) => changes.push(CollectionChange::Inherit {
                    document_id: child_id,
                    from_document_id: document_id.to_string(),
                }),
                _ => {}
            }
        }

        for op in after.iter().filter(|op| !before_ids.contains(op.id.as_str()) && !op.is_noop()) {
            match DocumentScopeAction::decode(&op.action) {
                Ok(DocumentScopeAction::CreateDocument { parent_id, .. }) => {
                    let own = collection_id(branch, document_id);
                    changes.push(CollectionChange::Create { collection_id: own.clone() });
                    changes.push(CollectionChange::Add { collection_id: own, document_id: document_id.to_string() });
                    if let Some(parent_id) = parent_id {
                        changes.push(CollectionChange::Inherit {
                            document_id: document_id.to_string(),
                            from_document_id: parent_id,
                        });
                    }
                }
                Ok(DocumentScopeAction::AddRelationship { child_id }) => changes.push(CollectionChange::Inherit {
                    document_id: child_id,
                    from_document_id: document_id.to_string(),
                }),
                Ok(DocumentScopeAction::RemoveRelationship { child_id }) => {
                    changes.push(CollectionChange::Disinherit {
                        document_id: child_id,
                        from_document_id: document_id.to_string(),
                    })
                }
                Ok(DocumentScopeAction::DeleteDocument) => {}
                Err(reason) => debug!(operation_id = %op.id, reason = %reason, "Skipping undecodable system operation"),
            }
        }

        changes
    }
}

fn placement(op: &Operation) -> (u64, u64, &str) {
    (op.index, op.skip, op.id.as_str())
}

fn created_parent(operations: &[Operation]) -> Option<String> {
    operations.iter().find_map(|op| match DocumentScopeAction::decode(&op.action) {
        Ok(DocumentScopeAction::CreateDocument { parent_id, .. }) if op.scope() == DOCUMENT_SCOPE => parent_id,
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_oplog::GLOBAL_SCOPE;
    use crate::core_reactor::registry::{add_relationship_action, create_document_action};
    use crate::core_store::{CollectionIndex, InMemoryStore, OperationStore};
    use crate::test_utils::fixtures::{increment, CounterModel, OperationBuilder, COUNTER_DOCUMENT_TYPE};
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryStore>,
        executor: JobExecutor,
    }

    fn fixture(config: ReactorConfig) -> Fixture {
        let registry = Arc::new(DocumentModelRegistry::new().with_model(CounterModel).unwrap());
        let store = Arc::new(InMemoryStore::new());
        let executor = JobExecutor::new(config, registry, store.clone());
        Fixture { store, executor }
    }

    fn mutation(doc: &str, scope: &str, actions: Vec<Action>) -> Job {
        Job::mutation(doc, COUNTER_DOCUMENT_TYPE, scope, "main", actions)
    }

    async fn create(f: &Fixture, doc: &str, parent: Option<&str>) {
        let job = mutation(doc, DOCUMENT_SCOPE, vec![create_document_action(COUNTER_DOCUMENT_TYPE, parent)]);
        f.executor.execute(&job).await.unwrap();
    }

    async fn global_history(f: &Fixture, doc: &str) -> Vec<Operation> {
        f.store.get(&ScopeKey::new(doc, GLOBAL_SCOPE, "main"), &AbortSignal::never()).await.unwrap()
    }

    fn count_after(ops: &[Operation]) -> Value {
        replay_scope(&CounterModel, GLOBAL_SCOPE, ops, ReplayOptions::default()).unwrap().state
    }

    #[tokio::test]
    async fn test_mutation_appends_hashed_operations() {
        let f = fixture(ReactorConfig::default());
        create(&f, "doc", None).await;

        let job = mutation("doc", GLOBAL_SCOPE, vec![increment(2), increment(3)]);
        let result = f.executor.execute(&job).await.unwrap();

        assert_eq!(result.operations.len(), 2);
        let ops = global_history(&f, "doc").await;
        assert_eq!(ops.iter().map(Operation::position).collect::<Vec<_>>(), vec![(0, 0), (1, 0)]);
        assert_eq!(ops[1].hash, hash_state(&json!({"count": 5})).unwrap());
        assert_eq!(ops[0].id, derive_operation_id("doc", GLOBAL_SCOPE, "main", &job.actions[0].id));
    }

    #[tokio::test]
    async fn test_undo_extends_noop_chain() {
        let f = fixture(ReactorConfig::default());
        create(&f, "doc", None).await;
        f.executor.execute(&mutation("doc", GLOBAL_SCOPE, vec![increment(1), increment(10)])).await.unwrap();

        let undo = || Action::new(UNDO, Value::Null, GLOBAL_SCOPE);
        f.executor.execute(&mutation("doc", GLOBAL_SCOPE, vec![undo()])).await.unwrap();
        let ops = global_history(&f, "doc").await;
        assert_eq!(ops.last().unwrap().position(), (2, 1));
        assert!(ops.last().unwrap().is_noop());
        assert_eq!(count_after(&ops), json!({"count": 1}));

        f.executor.execute(&mutation("doc", GLOBAL_SCOPE, vec![undo()])).await.unwrap();
        let ops = global_history(&f, "doc").await;
        assert_eq!(ops.last().unwrap().position(), (2, 2));
        assert_eq!(count_after(&ops), json!({"count": 0}));
        assert_eq!(ops.last().unwrap().hash, hash_state(&json!({"count": 0})).unwrap());

        let err = f.executor.execute(&mutation("doc", GLOBAL_SCOPE, vec![undo()])).await.unwrap_err();
        assert!(matches!(err, ReactorError::OpLog(OpLogError::NothingToUndo(_))));
    }

    #[tokio::test]
    async fn test_checkpoint_interval() {
        let config = ReactorConfig { checkpoint_interval: 2, ..Default::default() };
        let f = fixture(config);
        create(&f, "doc", None).await;
        f.executor
            .execute(&mutation("doc", GLOBAL_SCOPE, vec![increment(1), increment(1), increment(1)]))
            .await
            .unwrap();

        let ops = global_history(&f, "doc").await;
        assert!(ops[0].resulting_state.is_none());
        assert_eq!(ops[1].resulting_state.as_deref(), Some(r#"{"count":2}"#));
        assert!(ops[2].resulting_state.is_none());
    }

    #[tokio::test]
    async fn test_invalid_action_rejected_before_commit() {
        let f = fixture(ReactorConfig::default());
        create(&f, "doc", None).await;
        let bad = Action::new("INCREMENT", json!({"by": "lots"}), GLOBAL_SCOPE);
        let err = f.executor.execute(&mutation("doc", GLOBAL_SCOPE, vec![increment(1), bad])).await.unwrap_err();
        assert!(matches!(err, ReactorError::InvalidAction { .. }));
        assert!(global_history(&f, "doc").await.is_empty());
    }

    #[tokio::test]
    async fn test_create_and_relationship_drive_collections() {
        let f = fixture(ReactorConfig::default());
        create(&f, "root", None).await;
        create(&f, "orphan", None).await;
        let job = mutation("root", DOCUMENT_SCOPE, vec![add_relationship_action("orphan")]);
        f.executor.execute(&job).await.unwrap();

        let collections = f
            .store
            .get_collections_for_documents(&["orphan".to_string()], &AbortSignal::never())
            .await
            .unwrap();
        let mut joined = collections["orphan"].clone();
        joined.sort();
        assert_eq!(joined, vec!["main.orphan".to_string(), "main.root".to_string()]);
    }

    #[tokio::test]
    async fn test_load_rejects_missing_timestamp() {
        let f = fixture(ReactorConfig::default());
        let op = OperationBuilder::new(0).timestamp(0).build();
        let job = Job::load("doc", COUNTER_DOCUMENT_TYPE, GLOBAL_SCOPE, "main", vec![op], "peer");
        let err = f.executor.execute(&job).await.unwrap_err();
        assert!(matches!(err, ReactorError::MissingTimestamp { operation_id } if operation_id == "op-0-0"));
    }

    #[tokio::test]
    async fn test_load_of_known_operations_commits_nothing() {
        let f = fixture(ReactorConfig::default());
        create(&f, "doc", None).await;
        f.executor.execute(&mutation("doc", GLOBAL_SCOPE, vec![increment(1)])).await.unwrap();
        let ops = global_history(&f, "doc").await;

        let job = Job::load("doc", COUNTER_DOCUMENT_TYPE, GLOBAL_SCOPE, "main", ops.clone(), "peer");
        let result = f.executor.execute(&job).await.unwrap();
        assert!(result.operations.is_empty());
        assert_eq!(global_history(&f, "doc").await, ops);
    }

    #[tokio::test]
    async fn test_clean_load_keeps_source_remote() {
        let f = fixture(ReactorConfig { verify_hashes_on_load: true, ..Default::default() });
        let source = fixture(ReactorConfig::default());
        create(&source, "doc", None).await;
        source.executor.execute(&mutation("doc", GLOBAL_SCOPE, vec![increment(4)])).await.unwrap();
        let ops = global_history(&source, "doc").await;

        let job = Job::load("doc", COUNTER_DOCUMENT_TYPE, GLOBAL_SCOPE, "main", ops, "peer");
        let result = f.executor.execute(&job).await.unwrap();
        assert_eq!(result.operations.len(), 1);
        assert_eq!(result.operations[0].context.source_remote, "peer");
    }

    #[tokio::test]
    async fn test_load_with_bad_hash_fails_verification() {
        let f = fixture(ReactorConfig { verify_hashes_on_load: true, ..Default::default() });
        let op = OperationBuilder::new(0).action_type("INCREMENT").input(json!({"by": 1})).build();
        let job = Job::load("doc", COUNTER_DOCUMENT_TYPE, GLOBAL_SCOPE, "main", vec![op], "peer");
        let err = f.executor.execute(&job).await.unwrap_err();
        assert!(matches!(err, ReactorError::OpLog(OpLogError::HashMismatch(_))));
    }

    #[tokio::test]
    async fn test_load_after_gap_is_integrity_error() {
        let f = fixture(ReactorConfig::default());
        let op = OperationBuilder::new(3).action_type("INCREMENT").input(json!({"by": 1})).build();
        let job = Job::load("doc", COUNTER_DOCUMENT_TYPE, GLOBAL_SCOPE, "main", vec![op], "peer");
        let err = f.executor.execute(&job).await.unwrap_err();
        assert!(matches!(err, ReactorError::OpLog(OpLogError::Integrity(_))));
        assert!(err.is_out_of_order());
    }

    #[tokio::test]
    async fn test_load_validates_every_action() {
        let f = fixture(ReactorConfig::default());
        let good = OperationBuilder::new(0).action_type("INCREMENT").input(json!({"by": 1})).build();
        let bad = OperationBuilder::new(1).action_type("INCREMENT").input(json!({"by": "lots"})).build();

        let job = Job::load("doc", COUNTER_DOCUMENT_TYPE, GLOBAL_SCOPE, "main", vec![good.clone(), bad], "peer");
        let err = f.executor.execute(&job).await.unwrap_err();
        assert!(matches!(err, ReactorError::InvalidAction { .. }));

        let job = Job::load("doc", "test/unknown", GLOBAL_SCOPE, "main", vec![good], "peer");
        let err = f.executor.execute(&job).await.unwrap_err();
        assert!(matches!(err, ReactorError::UnknownDocumentType(_)));
        assert!(global_history(&f, "doc").await.is_empty());
    }

    #[tokio::test]
    async fn test_losing_arrangement_is_ignored() {
        let f = fixture(ReactorConfig::default());
        create(&f, "doc", None).await;
        f.executor.execute(&mutation("doc", GLOBAL_SCOPE, vec![increment(1).with_timestamp(2_000)])).await.unwrap();
        let remote = OperationBuilder::new(0)
            .id("remote-0")
            .action_type("INCREMENT")
            .input(json!({"by": 10}))
            .timestamp(1_000)
            .build();
        let job = Job::load("doc", COUNTER_DOCUMENT_TYPE, GLOBAL_SCOPE, "main", vec![remote.clone()], "peer");
        f.executor.execute(&job).await.unwrap();
        let merged = global_history(&f, "doc").await;

        // merged content offered again at its old position adds nothing and loses
        let job = Job::load("doc", COUNTER_DOCUMENT_TYPE, GLOBAL_SCOPE, "main", vec![remote], "peer");
        let result = f.executor.execute(&job).await.unwrap();
        assert!(result.operations.is_empty());
        assert_eq!(global_history(&f, "doc").await, merged);
    }

    #[tokio::test]
    async fn test_conflicting_load_reshuffles_and_clears_origin() {
        let f = fixture(ReactorConfig::default());
        create(&f, "doc", None).await;
        let local = increment(1).with_timestamp(2_000);
        f.executor.execute(&mutation("doc", GLOBAL_SCOPE, vec![local])).await.unwrap();

        let remote = OperationBuilder::new(0)
            .id("remote-0")
            .action_type("INCREMENT")
            .input(json!({"by": 10}))
            .timestamp(1_000)
            .build();
        let job = Job::load("doc", COUNTER_DOCUMENT_TYPE, GLOBAL_SCOPE, "main", vec![remote], "peer");
        let result = f.executor.execute(&job).await.unwrap();

        assert_eq!(result.operations.len(), 2);
        assert!(result.operations.iter().all(|op| op.context.source_remote.is_empty()));

        let ops = global_history(&f, "doc").await;
        let active = garbage_collect(&ops);
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].id, "remote-0");
        assert_eq!(active[0].position(), (1, 1));
        assert_eq!(count_after(&ops), json!({"count": 11}));
        assert_eq!(active[1].hash, hash_state(&json!({"count": 11})).unwrap());
    }
}
