/*
    manager.rs - Multi-remote sync manager

    Owns one outbox, one dead-letter lane and two workers per remote:
    - routing: committed operations (JOB_WRITE_READY) are copied into the
      outbox of every remote whose collection held the document at commit
      time
    - outbound worker: sends outbox envelopes with bounded retries, then
      advances the outbound cursor or dead-letters the envelope
    - inbound worker: turns envelopes from the remote's inbox into load
      jobs and advances the inbound cursor once they are write-ready;
      an envelope that lands before its predecessor is held and goes back
      to the inbox after the next envelope for its document applies

    Routing starts at construction; workers run between `start` and
    `shutdown`.
*/

use super::client::ReactorClient;
use super::envelope::{SyncEnvelope, SyncStatus};
use super::errors::{handle_poison, SyncError, SyncResult};
use super::mailbox::{Mailbox, MailboxSubscription};
use super::remote::{Remote, RemoteStatus};
use crate::abort::{AbortController, AbortSignal};
use crate::config::SyncConfig;
use crate::core_oplog::OperationWithContext;
use crate::core_queue::JobStatus;
use crate::core_reactor::LoadRequest;
use crate::core_store::{CursorStore, CursorType, DocumentStore};
use crate::events::{EventBus, EventType, ReactorEvent, Subscription};
use crate::metrics::{
    self, SYNC_OPERATIONS_APPLIED, SYNC_OPERATIONS_DEAD_LETTERED, SYNC_OPERATIONS_DELIVERED, SYNC_OPERATIONS_FAILED,
    SYNC_OPERATIONS_ROUTED,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Job id carried by envelopes produced from a cursor backfill
pub const BACKFILL_JOB_ID: &str = "backfill";

pub struct SyncManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SyncConfig,
    reactor: Arc<dyn ReactorClient>,
    store: Arc<dyn DocumentStore>,
    cursors: Arc<dyn CursorStore>,
    bus: Arc<EventBus>,
    remotes: RwLock<HashMap<String, Arc<RemoteRuntime>>>,
    routing: Mutex<Option<Subscription>>,
    started: AtomicBool,
}

struct RemoteRuntime {
    remote: Remote,
    outbox: Arc<Mailbox>,
    dead_letter: Arc<Mailbox>,
    held: Arc<Mailbox>,
    workers: Mutex<Option<Workers>>,
}

struct Workers {
    controller: AbortController,
    subscriptions: Vec<MailboxSubscription>,
    handles: Vec<JoinHandle<()>>,
}

impl SyncManager {
    pub fn new(
        config: SyncConfig,
        reactor: Arc<dyn ReactorClient>,
        store: Arc<dyn DocumentStore>,
        cursors: Arc<dyn CursorStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let routing = bus.subscribe(EventType::JobWriteReady, move |event| {
                if let (Some(inner), ReactorEvent::JobWriteReady { job_id, operations, collection_memberships, .. }) =
                    (weak.upgrade(), event)
                {
                    inner.route(job_id, operations, collection_memberships);
                }
                Ok(())
            });

            Inner {
                config,
                reactor,
                store,
                cursors,
                bus: bus.clone(),
                remotes: RwLock::new(HashMap::new()),
                routing: Mutex::new(Some(routing)),
                started: AtomicBool::new(false),
            }
        });
        SyncManager { inner }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Register a remote and queue everything its collection holds past
    /// the remote's outbound cursor
    pub async fn add(&self, remote: Remote) -> SyncResult<()> {
        let name = remote.name.clone();
        let collection_id = remote.collection_id.clone();
        let runtime = Arc::new(RemoteRuntime::new(remote));
        {
            let mut remotes = self.inner.remotes.write().map_err(handle_poison)?;
            if remotes.contains_key(&name) {
                return Err(SyncError::RemoteExists(name));
            }
            remotes.insert(name.clone(), runtime.clone());
        }

        let backfilled = match self.inner.backfill(&runtime).await {
            Ok(count) => count,
            Err(err) => {
                self.inner.remotes.write().map_err(handle_poison)?.remove(&name);
                return Err(err);
            }
        };

        if self.inner.started.load(Ordering::SeqCst) {
            Inner::spawn_workers(&self.inner, &runtime)?;
        }

        info!(remote = %name, collection = %collection_id, backfilled, "Remote added");
        Ok(())
    }

    /// Stop a remote's workers and forget it. Its cursors are kept so a
    /// re-added remote resumes where it left off.
    pub async fn remove(&self, name: &str) -> SyncResult<Remote> {
        let runtime = self
            .inner
            .remotes
            .write()
            .map_err(handle_poison)?
            .remove(name)
            .ok_or_else(|| SyncError::RemoteNotFound(name.to_string()))?;

        runtime.stop().await?;
        info!(remote = %name, "Remote removed");
        Ok(runtime.remote.clone())
    }

    pub fn get(&self, name: &str) -> SyncResult<Remote> {
        Ok(self.inner.runtime(name)?.remote.clone())
    }

    /// Status of every remote, sorted by name
    pub fn list(&self) -> SyncResult<Vec<RemoteStatus>> {
        let mut list: Vec<RemoteStatus> =
            self.inner.runtimes()?.iter().map(|runtime| runtime.status()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    /// Envelopes waiting to be sent to a remote
    pub fn outbox(&self, name: &str) -> SyncResult<Vec<SyncEnvelope>> {
        Ok(self.inner.runtime(name)?.outbox.items())
    }

    pub fn dead_letters(&self, name: &str) -> SyncResult<Vec<SyncEnvelope>> {
        Ok(self.inner.runtime(name)?.dead_letter.items())
    }

    /// Inbound envelopes waiting for an earlier envelope to apply
    pub fn held(&self, name: &str) -> SyncResult<Vec<SyncEnvelope>> {
        Ok(self.inner.runtime(name)?.held.items())
    }

    /// Requeue dead-lettered envelopes: undelivered ones go back to the
    /// outbox, unapplied ones back to the inbox
    pub fn retry_dead_letters(&self, name: &str) -> SyncResult<usize> {
        let runtime = self.inner.runtime(name)?;
        let envelopes = runtime.dead_letter.drain();
        let count = envelopes.len();

        for mut envelope in envelopes {
            let lane = envelope.status;
            envelope.status = SyncStatus::Pending;
            envelope.error = None;
            envelope.attempts = 0;
            match lane {
                SyncStatus::Failed => runtime.remote.channel.inbox().add(envelope),
                _ => runtime.outbox.add(envelope),
            }
        }

        if count > 0 {
            info!(remote = %name, count, "Dead letters requeued");
        }
        Ok(count)
    }

    /// Start delivery and inbound workers for every remote, current and future
    pub fn start(&self) -> SyncResult<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for runtime in self.inner.runtimes()? {
            Inner::spawn_workers(&self.inner, &runtime)?;
        }
        info!("Sync manager started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Stop routing, stop every worker and drop all remotes
    pub async fn shutdown(&self) -> SyncResult<()> {
        if let Some(routing) = self.inner.routing.lock().map_err(handle_poison)?.take() {
            routing.unsubscribe();
        }
        self.inner.started.store(false, Ordering::SeqCst);

        let runtimes: Vec<Arc<RemoteRuntime>> =
            self.inner.remotes.write().map_err(handle_poison)?.drain().map(|(_, runtime)| runtime).collect();
        for runtime in runtimes {
            runtime.stop().await?;
        }
        info!("Sync manager stopped");
        Ok(())
    }
}

impl Inner {
    fn runtime(&self, name: &str) -> SyncResult<Arc<RemoteRuntime>> {
        self.remotes
            .read()
            .map_err(handle_poison)?
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::RemoteNotFound(name.to_string()))
    }

    fn runtimes(&self) -> SyncResult<Vec<Arc<RemoteRuntime>>> {
        Ok(self.remotes.read().map_err(handle_poison)?.values().cloned().collect())
    }

    fn route(&self, job_id: &str, operations: &[OperationWithContext], memberships: &HashMap<String, Vec<String>>) {
        if operations.is_empty() {
            return;
        }
        let runtimes = match self.runtimes() {
            Ok(runtimes) => runtimes,
            Err(err) => {
                warn!(job_id, error = %err, "Routing skipped");
                return;
            }
        };

        for runtime in runtimes {
            let accepted: Vec<OperationWithContext> =
                operations.iter().filter(|op| runtime.remote.accepts(op, memberships)).cloned().collect();
            if accepted.is_empty() {
                continue;
            }
            let count = accepted.len();
            self.enqueue_outbound(&runtime, job_id, accepted);
            metrics::record_counter(SYNC_OPERATIONS_ROUTED, count as u64);
            debug!(job_id, remote = %runtime.remote.name, count, "Operations routed");
        }
    }

    async fn backfill(&self, runtime: &RemoteRuntime) -> SyncResult<usize> {
        let remote = &runtime.remote;
        let cursor = self.cursors.get(&remote.name, CursorType::Outbound).await?;
        let operations = self.store.find(&remote.collection_id, cursor, &AbortSignal::never()).await?;

        let wanted: Vec<OperationWithContext> = operations.into_iter().filter(|op| remote.wants(op)).collect();
        let count = wanted.len();
        if count > 0 {
            self.enqueue_outbound(runtime, BACKFILL_JOB_ID, wanted);
            metrics::record_counter(SYNC_OPERATIONS_ROUTED, count as u64);
        }
        Ok(count)
    }

    fn enqueue_outbound(&self, runtime: &RemoteRuntime, job_id: &str, operations: Vec<OperationWithContext>) {
        let name = &runtime.remote.name;
        for envelope in SyncEnvelope::batch(job_id, name, operations, self.config.outbox_batch_size) {
            self.bus.emit(ReactorEvent::SyncPending {
                job_id: job_id.to_string(),
                remote: name.clone(),
                document_id: envelope.document_id.clone(),
                sync_operation_count: envelope.len(),
            });
            runtime.outbox.add(envelope);
        }
    }

    fn spawn_workers(inner: &Arc<Inner>, runtime: &Arc<RemoteRuntime>) -> SyncResult<()> {
        let mut workers = runtime.workers.lock().map_err(handle_poison)?;
        if workers.is_some() {
            return Ok(());
        }

        let inbox = runtime.remote.channel.inbox();
        let outbound_wake = Arc::new(Notify::new());
        let inbound_wake = Arc::new(Notify::new());
        let subscriptions = vec![
            runtime.outbox.on_added({
                let wake = outbound_wake.clone();
                move |_| wake.notify_one()
            }),
            inbox.on_added({
                let wake = inbound_wake.clone();
                move |_| wake.notify_one()
            }),
        ];

        let controller = AbortController::new();
        let handles = vec![
            tokio::spawn(run_outbound(inner.clone(), runtime.clone(), outbound_wake, controller.signal())),
            tokio::spawn(run_inbound(inner.clone(), runtime.clone(), inbox, inbound_wake, controller.signal())),
        ];

        *workers = Some(Workers { controller, subscriptions, handles });
        debug!(remote = %runtime.remote.name, "Remote workers started");
        Ok(())
    }

    async fn deliver(&self, runtime: &RemoteRuntime, mut envelope: SyncEnvelope, signal: &AbortSignal) {
        let remote = &runtime.remote;
        let trace = crate::tracing::sync::trace_delivery(&remote.name, &envelope.document_id, envelope.len());
        let attempts = 1 + self.config.max_delivery_retries;
        let mut errors = Vec::new();
        let mut delivered = false;

        for attempt in 1..=attempts {
            envelope.attempts = attempt;
            match remote.channel.send(envelope.clone()).await {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(err) => {
                    warn!(remote = %remote.name, envelope_id = %envelope.id, attempt, error = %err, "Delivery attempt failed");
                    errors.push(err.to_string());
                }
            }
            if attempt < attempts {
                tokio::select! {
                    _ = signal.aborted() => return,
                    _ = tokio::time::sleep(self.config.retry_backoff) => {}
                }
            }
        }

        runtime.outbox.remove(&envelope.id);
        let count = envelope.len();

        if delivered {
            if let Err(err) = self.cursors.upsert(&remote.name, CursorType::Outbound, envelope.max_ordinal()).await {
                warn!(remote = %remote.name, error = %err, "Outbound cursor not advanced");
            }
            metrics::record_counter(SYNC_OPERATIONS_DELIVERED, count as u64);
            self.bus.emit(ReactorEvent::SyncSucceeded {
                job_id: envelope.job_id.clone(),
                remote: remote.name.clone(),
                document_id: envelope.document_id.clone(),
                success_count: count,
            });
            debug!(remote = %remote.name, envelope_id = %envelope.id, count, "Envelope delivered");
        } else {
            let error = errors.last().cloned().unwrap_or_default();
            trace.record_error(&error);
            warn!(remote = %remote.name, envelope_id = %envelope.id, attempts, error = %error, "Envelope dead-lettered");

            metrics::record_counter(SYNC_OPERATIONS_FAILED, count as u64);
            metrics::record_counter(SYNC_OPERATIONS_DEAD_LETTERED, count as u64);
            self.bus.emit(ReactorEvent::SyncFailed {
                job_id: envelope.job_id.clone(),
                remote: remote.name.clone(),
                document_id: envelope.document_id.clone(),
                success_count: 0,
                failure_count: count,
                errors,
            });

            envelope.status = SyncStatus::DeadLettered;
            envelope.error = Some(error);
            runtime.dead_letter.add(envelope);
        }
        trace.complete();
    }

    async fn receive(&self, runtime: &RemoteRuntime, mut envelope: SyncEnvelope) {
        let name = &runtime.remote.name;
        match self.apply(name, &envelope).await {
            Ok(committed) => {
                if let Err(err) = self.cursors.upsert(name, CursorType::Inbound, envelope.max_ordinal()).await {
                    warn!(remote = %name, error = %err, "Inbound cursor not advanced");
                }
                metrics::record_counter(SYNC_OPERATIONS_APPLIED, committed as u64);
                debug!(
                    remote = %name,
                    document_id = %envelope.document_id,
                    received = envelope.len(),
                    committed,
                    "Envelope applied"
                );
                self.release_held(runtime, &envelope.document_id);
            }
            Err(SyncError::OutOfOrder(reason)) => {
                debug!(
                    remote = %name,
                    document_id = %envelope.document_id,
                    envelope_id = %envelope.id,
                    reason = %reason,
                    "Envelope held"
                );
                runtime.held.add(envelope);
            }
            Err(err) => {
                let error = err.to_string();
                warn!(remote = %name, document_id = %envelope.document_id, error = %error, "Inbound envelope failed");
                metrics::record_counter(SYNC_OPERATIONS_FAILED, envelope.len() as u64);
                self.bus.emit(ReactorEvent::SyncFailed {
                    job_id: envelope.job_id.clone(),
                    remote: name.clone(),
                    document_id: envelope.document_id.clone(),
                    success_count: 0,
                    failure_count: envelope.len(),
                    errors: vec![error.clone()],
                });

                envelope.status = SyncStatus::Failed;
                envelope.error = Some(error);
                runtime.dead_letter.add(envelope);
            }
        }
    }

    /// Move held envelopes of `document_id` back to the inbox, oldest first
    fn release_held(&self, runtime: &RemoteRuntime, document_id: &str) {
        let held = runtime.held.drain();
        if held.is_empty() {
            return;
        }
        let inbox = runtime.remote.channel.inbox();
        let mut released = 0;
        for envelope in held {
            if envelope.document_id == document_id {
                inbox.add(envelope);
                released += 1;
            } else {
                runtime.held.add(envelope);
            }
        }
        if released > 0 {
            debug!(remote = %runtime.remote.name, document_id, released, "Held envelopes released");
        }
    }

    /// Load an envelope through the reactor; returns the number of
    /// operations actually committed
    async fn apply(&self, remote_name: &str, envelope: &SyncEnvelope) -> SyncResult<usize> {
        let Some(first) = envelope.operations.first() else {
            return Ok(0);
        };

        let request = LoadRequest {
            document_id: envelope.document_id.clone(),
            document_type: first.context.document_type.clone(),
            branch: Some(envelope.branch.clone()),
            operations: envelope.operations.iter().map(|op| op.operation.clone()).collect(),
            source_remote: remote_name.to_string(),
            meta: json!({ "remote": remote_name, "envelopeId": envelope.id }),
        };

        let receipt = self.reactor.load(request).await?;
        let mut committed = 0;
        for job_id in &receipt.job_ids {
            let info = self.reactor.wait_for_job(job_id, None).await?;
            if info.out_of_order {
                return Err(SyncError::OutOfOrder(info.error.unwrap_or_default()));
            }
            if info.status == JobStatus::Failed {
                return Err(SyncError::Apply(format!(
                    "job {} failed: {}",
                    job_id,
                    info.error.unwrap_or_default()
                )));
            }
            committed += info.operation_count;
        }
        Ok(committed)
    }
}

impl RemoteRuntime {
    fn new(remote: Remote) -> Self {
        RemoteRuntime {
            remote,
            outbox: Mailbox::new(),
            dead_letter: Mailbox::new(),
            held: Mailbox::new(),
            workers: Mutex::new(None),
        }
    }

    fn status(&self) -> RemoteStatus {
        RemoteStatus {
            name: self.remote.name.clone(),
            collection_id: self.remote.collection_id.clone(),
            filter: self.remote.filter.clone(),
            outbox_len: self.outbox.len(),
            inbox_len: self.remote.channel.inbox().len(),
            dead_letter_len: self.dead_letter.len(),
            held_len: self.held.len(),
            running: self.workers.lock().map(|workers| workers.is_some()).unwrap_or(false),
        }
    }

    async fn stop(&self) -> SyncResult<()> {
        let workers = self.workers.lock().map_err(handle_poison)?.take();
        if let Some(workers) = workers {
            for subscription in &workers.subscriptions {
                subscription.unsubscribe();
            }
            workers.controller.abort("remote stopped");
            for handle in workers.handles {
                if let Err(err) = handle.await {
                    warn!(remote = %self.remote.name, error = %err, "Remote worker ended abnormally");
                }
            }
        }
        Ok(())
    }
}

async fn run_outbound(inner: Arc<Inner>, runtime: Arc<RemoteRuntime>, wake: Arc<Notify>, signal: AbortSignal) {
    loop {
        while let Some(envelope) = runtime.outbox.front() {
            if signal.is_aborted() {
                return;
            }
            inner.deliver(&runtime, envelope, &signal).await;
        }

        tokio::select! {
            _ = signal.aborted() => break,
            _ = wake.notified() => {}
        }
    }
}

async fn run_inbound(
    inner: Arc<Inner>,
    runtime: Arc<RemoteRuntime>,
    inbox: Arc<Mailbox>,
    wake: Arc<Notify>,
    signal: AbortSignal,
) {
    loop {
        while let Some(envelope) = inbox.front() {
            if signal.is_aborted() {
                return;
            }
            let id = envelope.id.clone();
            inner.receive(&runtime, envelope).await;
            inbox.remove(&id);
        }

        tokio::select! {
            _ = signal.aborted() => break,
            _ = wake.notified() => {}
        }
    }
}
