/*
    reactor.rs - Orchestrator for document writes

    Entry point for every write: requests are turned into jobs (one per
    scope, chained through queue hints), queued, executed one at a time
    per queue and reported on the event bus. Reads go straight to the
    store.

    Jobs can be driven by hand (`process_next`, `run_until_idle`) or by
    the background loop started with `start`.
*/

use super::errors::{ReactorError, ReactorResult};
use super::executor::JobExecutor;
use super::registry::{
    add_relationship_action, create_document_action, remove_relationship_action, DocumentModelRegistry, UNDO,
};
use crate::abort::{AbortController, AbortSignal};
use crate::config::{QueueConfig, ReactorConfig};
use crate::core_oplog::{replay_scope, Action, Operation, ReplayOptions, DOCUMENT_SCOPE};
use crate::core_queue::{Job, JobInfo, JobQueue, JobTracker, QueueError};
use crate::core_store::{DocumentStore, ScopeKey, StoreError};
use crate::events::{EventBus, EventType, ReactorEvent, Subscription};
use crate::metrics::{self, REACTOR_JOBS_COMPLETED, REACTOR_JOBS_FAILED, REACTOR_JOBS_RETRIED, REACTOR_OPERATIONS_COMMITTED};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Actions to apply to one document
#[derive(Debug, Clone, Default)]
pub struct MutationRequest {
    pub document_id: String,
    pub document_type: String,

    /// Default branch when `None`
    pub branch: Option<String>,

    pub actions: Vec<Action>,

    /// Jobs that must complete before the first job of this request
    pub depends_on: Vec<String>,

    pub meta: Value,
}

/// Operations received from another replica
#[derive(Debug, Clone, Default)]
pub struct LoadRequest {
    pub document_id: String,
    pub document_type: String,
    pub branch: Option<String>,
    pub operations: Vec<Operation>,
    pub source_remote: String,
    pub meta: Value,
}

/// Jobs created for one request, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReceipt {
    pub document_id: String,
    pub job_ids: Vec<String>,
}

impl JobReceipt {
    /// Job whose completion means the whole request is done
    pub fn last_job_id(&self) -> Option<&str> {
        self.job_ids.last().map(String::as_str)
    }
}

/// Materialized state of every scope of a document branch
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub document_id: String,
    pub document_type: String,
    pub branch: String,

    /// Scope name to state
    pub state: Map<String, Value>,

    /// Scope name to next index
    pub revisions: Map<String, Value>,
}

/// A create that is queued but not committed yet
#[derive(Debug, Clone)]
struct PendingCreate {
    job_id: String,
    document_type: String,
}

struct LoopHandle {
    controller: AbortController,
    handle: JoinHandle<()>,
    subscription: Subscription,
}

pub struct Reactor {
    config: ReactorConfig,
    registry: Arc<DocumentModelRegistry>,
    store: Arc<dyn DocumentStore>,
    bus: Arc<EventBus>,
    queue: JobQueue,
    tracker: JobTracker,
    executor: JobExecutor,
    wake: Arc<Notify>,
    runner: Mutex<Option<LoopHandle>>,
    pending_creates: Mutex<HashMap<String, PendingCreate>>,
}

impl Reactor {
    pub fn new(
        config: ReactorConfig,
        registry: Arc<DocumentModelRegistry>,
        store: Arc<dyn DocumentStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self::with_queue_config(config, QueueConfig::default(), registry, store, bus)
    }

    pub fn with_queue_config(
        config: ReactorConfig,
        queue_config: QueueConfig,
        registry: Arc<DocumentModelRegistry>,
        store: Arc<dyn DocumentStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        let executor = JobExecutor::new(config.clone(), registry.clone(), store.clone());
        Reactor {
            queue: JobQueue::new(Some(bus.clone()), queue_config.max_pending_per_queue),
            tracker: JobTracker::new(),
            executor,
            config,
            registry,
            store,
            bus,
            wake: Arc::new(Notify::new()),
            runner: Mutex::new(None),
            pending_creates: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DocumentModelRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    fn branch_or_default(&self, branch: Option<&str>) -> String {
        branch.unwrap_or(&self.config.default_branch).to_string()
    }

    /// Create a document on `branch`
    pub async fn create(&self, document_id: &str, document_type: &str, branch: Option<&str>) -> ReactorResult<JobReceipt> {
        self.create_with_parent(document_id, document_type, None, branch, Vec::new()).await
    }

    /// Create a document inside `parent_id`'s collections and record the
    /// relationship on the parent. The parent may still be queued.
    pub async fn create_child(
        &self,
        parent_id: &str,
        document_id: &str,
        document_type: &str,
        branch: Option<&str>,
    ) -> ReactorResult<JobReceipt> {
        let (parent, parent_create) = self.resolve_document(parent_id).await?;
        let created =
            self.create_with_parent(document_id, document_type, Some(parent_id), branch, parent_create).await?;

        let linked = self
            .submit(MutationRequest {
                document_id: parent_id.to_string(),
                document_type: parent,
                branch: branch.map(str::to_string),
                actions: vec![add_relationship_action(document_id)],
                depends_on: created.job_ids.clone(),
                meta: Value::Null,
            })
            .await?;

        let mut job_ids = created.job_ids;
        job_ids.extend(linked.job_ids);
        Ok(JobReceipt { document_id: document_id.to_string(), job_ids })
    }

    async fn create_with_parent(
        &self,
        document_id: &str,
        document_type: &str,
        parent_id: Option<&str>,
        branch: Option<&str>,
        depends_on: Vec<String>,
    ) -> ReactorResult<JobReceipt> {
        self.registry.get(document_type)?;
        let queued = self.pending_creates.lock().map_err(|_| lock_poisoned())?.contains_key(document_id);
        if queued || self.store.has_document(document_id, &AbortSignal::never()).await? {
            return Err(ReactorError::DocumentExists(document_id.to_string()));
        }

        let receipt = self
            .submit(MutationRequest {
                document_id: document_id.to_string(),
                document_type: document_type.to_string(),
                branch: branch.map(str::to_string),
                actions: vec![create_document_action(document_type, parent_id)],
                depends_on,
                meta: Value::Null,
            })
            .await?;

        if let Some(job_id) = receipt.last_job_id() {
            let pending = PendingCreate { job_id: job_id.to_string(), document_type: document_type.to_string() };
            self.pending_creates.lock().map_err(|_| lock_poisoned())?.insert(document_id.to_string(), pending);
        }
        Ok(receipt)
    }

    /// Apply actions to an existing document
    pub async fn execute(
        &self,
        document_id: &str,
        branch: Option<&str>,
        actions: Vec<Action>,
        meta: Value,
    ) -> ReactorResult<JobReceipt> {
        let (document_type, depends_on) = self.resolve_document(document_id).await?;
        self.submit(MutationRequest {
            document_id: document_id.to_string(),
            document_type,
            branch: branch.map(str::to_string),
            actions,
            depends_on,
            meta,
        })
        .await
    }

    /// Cancel the last active operation of `scope`
    pub async fn undo(&self, document_id: &str, scope: &str, branch: Option<&str>) -> ReactorResult<JobReceipt> {
        self.execute(document_id, branch, vec![Action::new(UNDO, Value::Null, scope)], Value::Null).await
    }

    pub async fn add_relationship(&self, parent_id: &str, child_id: &str, branch: Option<&str>) -> ReactorResult<JobReceipt> {
        self.execute(parent_id, branch, vec![add_relationship_action(child_id)], Value::Null).await
    }

    pub async fn remove_relationship(
        &self,
        parent_id: &str,
        child_id: &str,
        branch: Option<&str>,
    ) -> ReactorResult<JobReceipt> {
        self.execute(parent_id, branch, vec![remove_relationship_action(child_id)], Value::Null).await
    }

    /// Queue a mutation, one job per scope in order of first appearance
    pub async fn submit(&self, request: MutationRequest) -> ReactorResult<JobReceipt> {
        if request.actions.is_empty() {
            return Err(ReactorError::Validation("mutation without actions".to_string()));
        }
        for action in &request.actions {
            if action.scope.is_empty() {
                return Err(ReactorError::Validation(format!("action {} has no scope", action.id)));
            }
            self.registry.validate_action(&request.document_type, action)?;
        }

        let branch = self.branch_or_default(request.branch.as_deref());
        let mut jobs: Vec<Job> = Vec::new();
        for (scope, actions) in group_by_scope(request.actions, |action| action.scope.clone()) {
            let hint = match jobs.last() {
                Some(previous) => vec![previous.id.clone()],
                None => request.depends_on.clone(),
            };
            jobs.push(
                Job::mutation(&request.document_id, &request.document_type, &scope, &branch, actions)
                    .with_queue_hint(hint)
                    .with_max_retries(self.config.max_retries)
                    .with_meta(request.meta.clone()),
            );
        }

        self.enqueue_all(&request.document_id, jobs)
    }

    /// Queue operations received from `source_remote`, one job per scope
    pub async fn load(&self, request: LoadRequest) -> ReactorResult<JobReceipt> {
        if request.operations.is_empty() {
            return Err(ReactorError::Validation("load without operations".to_string()));
        }
        self.registry.get(&request.document_type)?;

        let branch = self.branch_or_default(request.branch.as_deref());
        let mut operations = request.operations;
        // the document scope first so a new document's header carries its parent
        operations.sort_by_key(|op| op.scope() != DOCUMENT_SCOPE);

        let jobs = group_by_scope(operations, |op| op.scope().to_string())
            .into_iter()
            .map(|(scope, operations)| {
                Job::load(
                    &request.document_id,
                    &request.document_type,
                    &scope,
                    &branch,
                    operations,
                    &request.source_remote,
                )
                .with_max_retries(self.config.max_retries)
                .with_meta(request.meta.clone())
            })
            .collect();

        self.enqueue_all(&request.document_id, jobs)
    }

    fn enqueue_all(&self, document_id: &str, jobs: Vec<Job>) -> ReactorResult<JobReceipt> {
        let mut job_ids: Vec<String> = Vec::with_capacity(jobs.len());

        for job in jobs {
            self.tracker.register(&job)?;
            let (job_id, meta) = (job.id.clone(), job.meta.clone());

            if let Err(err) = self.queue.enqueue(job) {
                let reason = err.to_string();
                self.tracker.mark_failed(&job_id, &reason)?;
                for queued in &job_ids {
                    self.queue.remove(queued)?;
                    self.tracker.mark_failed(queued, &reason)?;
                }
                return Err(err.into());
            }

            self.bus.emit(ReactorEvent::JobPending {
                job_id: job_id.clone(),
                document_id: document_id.to_string(),
                job_meta: meta,
            });
            job_ids.push(job_id);
        }

        Ok(JobReceipt { document_id: document_id.to_string(), job_ids })
    }

    pub fn get_job_status(&self, job_id: &str) -> ReactorResult<Option<JobInfo>> {
        Ok(self.tracker.get(job_id)?)
    }

    /// Wait for a terminal state; `None` uses the configured job timeout
    pub async fn wait_for_job(&self, job_id: &str, timeout: Option<Duration>) -> ReactorResult<JobInfo> {
        let timeout = timeout.unwrap_or(self.config.job_timeout);
        Ok(self.tracker.wait(job_id, timeout).await?)
    }

    /// Replay every scope of a document branch
    pub async fn get_document(
        &self,
        document_id: &str,
        branch: Option<&str>,
        abort: &AbortSignal,
    ) -> ReactorResult<DocumentSnapshot> {
        let branch = self.branch_or_default(branch);
        let header = self.store.get_header(document_id, abort).await.map_err(|err| match err {
            StoreError::NotFound(_) => ReactorError::DocumentNotFound(document_id.to_string()),
            other => other.into(),
        })?;

        let revisions = self.store.get_revisions(document_id, &branch, abort).await?;
        let options = ReplayOptions { variant: self.config.gc_variant, ..ReplayOptions::default() };

        let mut snapshot = DocumentSnapshot {
            document_id: document_id.to_string(),
            document_type: header.document_type.clone(),
            branch: branch.clone(),
            state: Map::new(),
            revisions: Map::new(),
        };

        for (scope, next_index) in revisions {
            abort.check()?;
            let operations = self.store.get(&ScopeKey::new(document_id, &scope, &branch), abort).await?;
            let model = self.registry.reducer_for(&header.document_type, &scope)?;
            let replayed = replay_scope(model.as_reducer(), &scope, &operations, options)?;
            snapshot.state.insert(scope.clone(), replayed.state);
            snapshot.revisions.insert(scope, Value::from(next_index));
        }

        Ok(snapshot)
    }

    /// Full history of one scope
    pub async fn get_operations(
        &self,
        document_id: &str,
        scope: &str,
        branch: Option<&str>,
        abort: &AbortSignal,
    ) -> ReactorResult<Vec<Operation>> {
        let key = ScopeKey::new(document_id, scope, self.branch_or_default(branch));
        Ok(self.store.get(&key, abort).await?)
    }

    /// Type of a committed or still-queued document, and the create job
    /// that new work on it has to wait for
    async fn resolve_document(&self, document_id: &str) -> ReactorResult<(String, Vec<String>)> {
        let pending = self.pending_creates.lock().map_err(|_| lock_poisoned())?.get(document_id).cloned();
        match pending {
            Some(pending) => Ok((pending.document_type, vec![pending.job_id])),
            None => Ok((self.header_type(document_id).await?, Vec::new())),
        }
    }

    /// Drop the pending create finished by `job_id`, if any
    fn settle_create(&self, job_id: &str) -> ReactorResult<()> {
        self.pending_creates.lock().map_err(|_| lock_poisoned())?.retain(|_, pending| pending.job_id != job_id);
        Ok(())
    }

    async fn header_type(&self, document_id: &str) -> ReactorResult<String> {
        match self.store.get_header(document_id, &AbortSignal::never()).await {
            Ok(header) => Ok(header.document_type),
            Err(StoreError::NotFound(_)) => Err(ReactorError::DocumentNotFound(document_id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Execute one ready job. Returns `false` when nothing was ready.
    pub async fn process_next(&self) -> ReactorResult<bool> {
        let Some(mut job) = self.queue.dequeue_next()? else {
            return Ok(false);
        };

        self.tracker.mark_running(&job.id)?;
        self.bus.emit(ReactorEvent::JobRunning { job_id: job.id.clone(), document_id: job.document_id.clone() });

        let trace = crate::tracing::reactor::trace_job(&job.id, &job.document_id, &job.scope, job.kind.as_str());

        match self.executor.execute(&job).await {
            Ok(commit) => {
                self.queue.complete_job(&job.id)?;
                self.settle_create(&job.id)?;
                self.tracker.mark_write_ready(&job.id, commit.operations.len())?;

                metrics::record_counter(REACTOR_JOBS_COMPLETED, 1);
                metrics::record_counter(REACTOR_OPERATIONS_COMMITTED, commit.operations.len() as u64);
                debug!(
                    job_id = %job.id,
                    document_id = %job.document_id,
                    scope = %job.scope,
                    operations = commit.operations.len(),
                    "Job committed"
                );
                trace.complete();

                self.bus.emit(ReactorEvent::JobWriteReady {
                    job_id: job.id,
                    document_id: job.document_id,
                    operations: commit.operations,
                    collection_memberships: commit.collection_memberships,
                    job_meta: job.meta,
                });
            }
            Err(err) => {
                let reason = err.to_string();
                trace.record_error(&reason);

                if err.is_out_of_order() {
                    debug!(job_id = %job.id, document_id = %job.document_id, error = %reason, "Load arrived out of order");
                    metrics::record_counter(REACTOR_JOBS_FAILED, 1);
                    self.queue.fail_job(&job.id, &reason)?;
                    self.tracker.mark_out_of_order(&job.id, &reason)?;
                    self.bus.emit(ReactorEvent::JobFailed {
                        job_id: job.id,
                        document_id: job.document_id,
                        error: reason,
                        job_meta: job.meta,
                    });
                } else if job.can_retry() {
                    job.retry_count += 1;
                    job.error_history.push(reason.clone());
                    warn!(
                        job_id = %job.id,
                        attempt = job.retry_count,
                        max_retries = job.max_retries,
                        error = %reason,
                        "Job failed, retrying"
                    );
                    metrics::record_counter(REACTOR_JOBS_RETRIED, 1);
                    self.tracker.record_retry(&job.id, &reason)?;
                    self.queue.retry(job)?;
                } else {
                    error!(job_id = %job.id, document_id = %job.document_id, error = %reason, "Job failed");
                    metrics::record_counter(REACTOR_JOBS_FAILED, 1);
                    self.queue.fail_job(&job.id, &reason)?;
                    self.settle_create(&job.id)?;
                    self.tracker.mark_failed(&job.id, &reason)?;
                    self.bus.emit(ReactorEvent::JobFailed {
                        job_id: job.id,
                        document_id: job.document_id,
                        error: reason,
                        job_meta: job.meta,
                    });
                }
            }
        }

        Ok(true)
    }

    /// Execute ready jobs until none is left; returns how many ran
    pub async fn run_until_idle(&self) -> ReactorResult<usize> {
        let mut executed = 0;
        while self.process_next().await? {
            executed += 1;
        }
        Ok(executed)
    }

    /// Spawn the executor loop; it wakes on every `JOB_AVAILABLE`
    pub fn start(self: &Arc<Self>) -> ReactorResult<()> {
        let mut runner = self.runner.lock().map_err(|_| lock_poisoned())?;
        if runner.is_some() {
            return Ok(());
        }

        let wake = self.wake.clone();
        let subscription = self.bus.subscribe(EventType::JobAvailable, move |_| {
            wake.notify_one();
            Ok(())
        });

        let controller = AbortController::new();
        let signal = controller.signal();
        let reactor = self.clone();
        let handle = tokio::spawn(async move { reactor.run_loop(signal).await });

        *runner = Some(LoopHandle { controller, handle, subscription });
        info!("Reactor started");
        Ok(())
    }

    async fn run_loop(&self, signal: AbortSignal) {
        loop {
            match self.run_until_idle().await {
                Ok(executed) if executed > 0 => debug!(executed, "Reactor drained ready jobs"),
                Ok(_) => {}
                Err(err) => error!(error = %err, "Reactor loop error"),
            }

            tokio::select! {
                _ = signal.aborted() => break,
                _ = self.wake.notified() => {}
            }
        }
        debug!("Reactor loop stopped");
    }

    /// Stop accepting jobs, wait for queued work to drain, then stop the loop.
    ///
    /// Returns `false` if draining did not finish within the job timeout.
    pub async fn kill(&self) -> ReactorResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.queue.block(move || {
            let _ = tx.send(());
        })?;

        let running = self.runner.lock().map_err(|_| lock_poisoned())?.is_some();
        let drained = if running {
            matches!(tokio::time::timeout(self.config.job_timeout, rx).await, Ok(Ok(())))
        } else {
            // nothing executes jobs, so only an already-empty queue drains
            self.queue.is_drained()?
        };

        let runner = self.runner.lock().map_err(|_| lock_poisoned())?.take();
        if let Some(runner) = runner {
            runner.subscription.unsubscribe();
            runner.controller.abort("reactor killed");
            if let Err(err) = runner.handle.await {
                warn!(error = %err, "Reactor loop ended abnormally");
            }
        }

        if drained {
            info!("Reactor stopped");
        } else {
            warn!(pending = self.queue.len()?, "Reactor stopped before the queue drained");
        }
        Ok(drained)
    }

    /// Accept jobs again after `kill`
    pub fn revive(&self) -> ReactorResult<()> {
        Ok(self.queue.unblock()?)
    }
}

fn lock_poisoned() -> ReactorError {
    QueueError::Internal("Reactor lock poisoned".to_string()).into()
}

/// Group items by key preserving first-appearance order of keys and
/// the relative order of items
fn group_by_scope<T, F>(items: Vec<T>, key: F) -> Vec<(String, Vec<T>)>
where
    F: Fn(&T) -> String,
{
    let mut groups: Vec<(String, Vec<T>)> = Vec::new();
    for item in items {
        let scope = key(&item);
        match groups.iter_mut().find(|(existing, _)| *existing == scope) {
            Some((_, group)) => group.push(item),
            None => groups.push((scope, vec![item])),
        }
    }
    groups
}
