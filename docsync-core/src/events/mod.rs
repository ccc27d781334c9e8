//! Event bus
//!
//! Typed publish/subscribe between the queue, the reactor, the sync
//! manager and read models. Handlers run synchronously inside `emit`; a
//! handler that fails or panics is logged and the remaining handlers still
//! run. Every event is also forwarded to a tokio broadcast channel for
//! consumers that prefer to `await` events.

use crate::core_oplog::OperationWithContext;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;
use tokio::sync::broadcast;

/// Error returned by an event handler. Logged, never propagated to the emitter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("Event handler failed: {0}")]
    Handler(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    JobAvailable,
    JobPending,
    JobRunning,
    JobWriteReady,
    JobFailed,
    SyncPending,
    SyncSucceeded,
    SyncFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::JobAvailable => "JOB_AVAILABLE",
            EventType::JobPending => "JOB_PENDING",
            EventType::JobRunning => "JOB_RUNNING",
            EventType::JobWriteReady => "JOB_WRITE_READY",
            EventType::JobFailed => "JOB_FAILED",
            EventType::SyncPending => "SYNC_PENDING",
            EventType::SyncSucceeded => "SYNC_SUCCEEDED",
            EventType::SyncFailed => "SYNC_FAILED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum ReactorEvent {
    /// A job was added to its queue
    JobAvailable {
        job_id: String,
        document_id: String,
        scope: String,
        branch: String,
    },

    /// A job was accepted by the reactor
    JobPending { job_id: String, document_id: String, job_meta: Value },

    JobRunning { job_id: String, document_id: String },

    /// A job's operations are committed. `operations` may be empty when
    /// every loaded operation was already known.
    JobWriteReady {
        job_id: String,
        document_id: String,
        operations: Vec<OperationWithContext>,
        collection_memberships: HashMap<String, Vec<String>>,
        job_meta: Value,
    },

    /// A job exhausted its retries
    JobFailed {
        job_id: String,
        document_id: String,
        error: String,
        job_meta: Value,
    },

    SyncPending {
        job_id: String,
        remote: String,
        document_id: String,
        sync_operation_count: usize,
    },

    SyncSucceeded {
        job_id: String,
        remote: String,
        document_id: String,
        success_count: usize,
    },

    SyncFailed {
        job_id: String,
        remote: String,
        document_id: String,
        success_count: usize,
        failure_count: usize,
        errors: Vec<String>,
    },
}

impl ReactorEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            ReactorEvent::JobAvailable { .. } => EventType::JobAvailable,
            ReactorEvent::JobPending { .. } => EventType::JobPending,
            ReactorEvent::JobRunning { .. } => EventType::JobRunning,
            ReactorEvent::JobWriteReady { .. } => EventType::JobWriteReady,
            ReactorEvent::JobFailed { .. } => EventType::JobFailed,
            ReactorEvent::SyncPending { .. } => EventType::SyncPending,
            ReactorEvent::SyncSucceeded { .. } => EventType::SyncSucceeded,
            ReactorEvent::SyncFailed { .. } => EventType::SyncFailed,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            ReactorEvent::JobAvailable { job_id, .. }
            | ReactorEvent::JobPending { job_id, .. }
            | ReactorEvent::JobRunning { job_id, .. }
            | ReactorEvent::JobWriteReady { job_id, .. }
            | ReactorEvent::JobFailed { job_id, .. }
            | ReactorEvent::SyncPending { job_id, .. }
            | ReactorEvent::SyncSucceeded { job_id, .. }
            | ReactorEvent::SyncFailed { job_id, .. } => job_id,
        }
    }
}

type Handler = Arc<dyn Fn(&ReactorEvent) -> Result<(), EventError> + Send + Sync>;

/// In-process event bus
pub struct EventBus {
    handlers: RwLock<HashMap<EventType, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<ReactorEvent>,
}

impl EventBus {
    /// Create a bus whose broadcast channel buffers `capacity` events
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Arc::new(EventBus { handlers: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1), tx })
    }

    /// Register a handler for one event type
    pub fn subscribe<F>(self: &Arc<Self>, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&ReactorEvent) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.handlers.write() {
            Ok(mut handlers) => handlers.entry(event_type).or_default().push((id, Arc::new(handler))),
            Err(poisoned) => poisoned.into_inner().entry(event_type).or_default().push((id, Arc::new(handler))),
        }
        Subscription { bus: Arc::downgrade(self), event_type, id }
    }

    /// Deliver an event to every handler of its type, then to broadcast
    /// receivers. Returns the number of handlers that succeeded.
    pub fn emit(&self, event: ReactorEvent) -> usize {
        let event_type = event.event_type();
        let handlers: Vec<Handler> = {
            let guard = match self.handlers.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.get(&event_type).map(|list| list.iter().map(|(_, h)| h.clone()).collect()).unwrap_or_default()
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    tracing::warn!(event = %event_type, job_id = %event.job_id(), error = %err, "Event handler error")
                }
                Err(_) => tracing::warn!(event = %event_type, job_id = %event.job_id(), "Event handler panicked"),
            }
        }

        let _ = self.tx.send(event);
        delivered
    }

    /// Receive every emitted event
    pub fn receiver(&self) -> broadcast::Receiver<ReactorEvent> {
        self.tx.subscribe()
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .map(|handlers| handlers.get(&event_type).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn remove(&self, event_type: EventType, id: u64) {
        let mut guard = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(list) = guard.get_mut(&event_type) {
            list.retain(|(handler_id, _)| *handler_id != id);
        }
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<EventBus>,
    event_type: EventType,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.event_type, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn running(job_id: &str) -> ReactorEvent {
        ReactorEvent::JobRunning { job_id: job_id.to_string(), document_id: "doc".to_string() }
    }

    #[test]
    fn test_handlers_receive_only_their_type() {
        let bus = EventBus::new(16);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _sub = bus.subscribe(EventType::JobRunning, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(running("j1"));
        bus.emit(ReactorEvent::JobPending {
            job_id: "j2".to_string(),
            document_id: "doc".to_string(),
            job_meta: Value::Null,
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_and_panicking_handlers_are_isolated() {
        let bus = EventBus::new(16);
        let seen = Arc::new(AtomicUsize::new(0));

        let _a = bus.subscribe(EventType::JobRunning, |_| Err(EventError::Handler("boom".to_string())));
        let _b = bus.subscribe(EventType::JobRunning, |_| panic!("handler panic"));
        let counter = seen.clone();
        let _c = bus.subscribe(EventType::JobRunning, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.emit(running("j1")), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new(16);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sub = bus.subscribe(EventType::JobRunning, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(running("j1"));
        sub.unsubscribe();
        bus.emit(running("j2"));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(EventType::JobRunning), 0);
    }

    #[tokio::test]
    async fn test_broadcast_receiver_sees_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.receiver();
        bus.emit(running("j1"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), EventType::JobRunning);
        assert_eq!(event.job_id(), "j1");
    }
}
