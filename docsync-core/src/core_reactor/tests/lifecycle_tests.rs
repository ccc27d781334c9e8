/*
    Lifecycle tests - events, the background loop and draining
*/

use crate::config::ReactorConfig;
use crate::core_queue::{JobStatus, QueueError};
use crate::core_reactor::{DocumentModelRegistry, Reactor, ReactorError};
use crate::core_store::InMemoryStore;
use crate::events::{EventBus, EventType, ReactorEvent};
use crate::test_utils::async_helpers::{recv_matching, DEFAULT_TEST_TIMEOUT};
use crate::test_utils::fixtures::{increment, CounterModel, COUNTER_DOCUMENT_TYPE};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn reactor(bus: Arc<EventBus>) -> Arc<Reactor> {
    let registry = Arc::new(DocumentModelRegistry::new().with_model(CounterModel).unwrap());
    let config = ReactorConfig { job_timeout: Duration::from_secs(5), ..Default::default() };
    Arc::new(Reactor::new(config, registry, Arc::new(InMemoryStore::new()), bus))
}

#[tokio::test]
async fn test_job_events_in_order() {
    let bus = EventBus::new(64);
    let reactor = reactor(bus.clone());
    let mut events = bus.receiver();

    let receipt = reactor.create("doc", COUNTER_DOCUMENT_TYPE, None).await.unwrap();
    let job_id = receipt.last_job_id().unwrap().to_string();
    reactor.run_until_idle().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id() == job_id {
            seen.push(event.event_type());
        }
    }
    assert_eq!(
        seen,
        vec![EventType::JobAvailable, EventType::JobPending, EventType::JobRunning, EventType::JobWriteReady]
    );
}

#[tokio::test]
async fn test_write_ready_carries_memberships_and_meta() {
    let bus = EventBus::new(64);
    let reactor = reactor(bus.clone());
    let mut events = bus.receiver();

    reactor.create("doc", COUNTER_DOCUMENT_TYPE, None).await.unwrap();
    reactor.run_until_idle().await.unwrap();
    reactor.execute("doc", None, vec![increment(1)], json!({"batch": 7})).await.unwrap();
    reactor.run_until_idle().await.unwrap();

    let event = recv_matching(&mut events, DEFAULT_TEST_TIMEOUT, |event| {
        matches!(event, ReactorEvent::JobWriteReady { job_meta, .. } if job_meta["batch"] == 7)
    })
    .await
    .unwrap();

    let ReactorEvent::JobWriteReady { operations, collection_memberships, .. } = event else {
        panic!("unexpected event");
    };
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].context.document_type, COUNTER_DOCUMENT_TYPE);
    assert!(operations[0].context.ordinal > 0);
    assert_eq!(collection_memberships["doc"], vec!["main.doc".to_string()]);
}

#[tokio::test]
async fn test_background_loop_runs_jobs() {
    let bus = EventBus::new(64);
    let reactor = reactor(bus);
    reactor.start().unwrap();

    let created = reactor.create("doc", COUNTER_DOCUMENT_TYPE, None).await.unwrap();
    let info = reactor.wait_for_job(created.last_job_id().unwrap(), None).await.unwrap();
    assert_eq!(info.status, JobStatus::WriteReady);

    let receipt = reactor.execute("doc", None, vec![increment(5)], Value::Null).await.unwrap();
    let info = reactor.wait_for_job(receipt.last_job_id().unwrap(), None).await.unwrap();
    assert_eq!(info.operation_count, 1);

    assert!(reactor.kill().await.unwrap());
}

#[tokio::test]
async fn test_kill_rejects_new_work_until_revived() {
    let bus = EventBus::new(64);
    let reactor = reactor(bus.clone());
    reactor.start().unwrap();
    assert_eq!(bus.handler_count(EventType::JobAvailable), 1);

    assert!(reactor.kill().await.unwrap());
    assert_eq!(bus.handler_count(EventType::JobAvailable), 0);

    let err = reactor.create("doc", COUNTER_DOCUMENT_TYPE, None).await.unwrap_err();
    assert!(matches!(err, ReactorError::Queue(QueueError::QueueBlocked)));

    reactor.revive().unwrap();
    reactor.create("doc", COUNTER_DOCUMENT_TYPE, None).await.unwrap();
    assert_eq!(reactor.run_until_idle().await.unwrap(), 1);
}

#[tokio::test]
async fn test_kill_without_loop_reports_pending_work() {
    let bus = EventBus::new(64);
    let reactor = reactor(bus);
    reactor.create("doc", COUNTER_DOCUMENT_TYPE, None).await.unwrap();

    assert!(!reactor.kill().await.unwrap());
    assert_eq!(reactor.queue().len().unwrap(), 1);
}

#[tokio::test]
async fn test_wait_for_unknown_job() {
    let reactor = reactor(EventBus::new(8));
    let err = reactor.wait_for_job("nope", Some(Duration::from_millis(10))).await.unwrap_err();
    assert!(matches!(err, ReactorError::Queue(QueueError::JobNotFound(_))));
}
