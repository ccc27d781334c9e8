/*
    end_to_end.rs - Two replicas syncing over in-memory channels

    Each replica runs its own store, reactor loop and sync manager. These
    tests cover propagation, echo termination and convergence after a
    partition with concurrent edits.
*/

use docsync_core::abort::AbortSignal;
use docsync_core::core_oplog::GLOBAL_SCOPE;
use docsync_core::core_sync::connect_in_memory;
use docsync_core::test_utils::assertions::assert_converged;
use docsync_core::test_utils::async_helpers::{wait_for_quiet, wait_until, DEFAULT_TEST_TIMEOUT};
use docsync_core::test_utils::fixtures::{increment, COUNTER_DOCUMENT_TYPE};
use docsync_core::test_utils::replica::{link, Replica};
use serde_json::{json, Value};
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(300);

async fn started_pair() -> (Replica, Replica) {
    let a = Replica::with_test_config("alice").unwrap();
    let b = Replica::with_test_config("bob").unwrap();
    link(&a, &b, "main.drive").await.unwrap();
    a.start().unwrap();
    b.start().unwrap();
    (a, b)
}

async fn run(replica: &Replica, receipt: docsync_core::core_reactor::JobReceipt) {
    for job_id in &receipt.job_ids {
        replica.reactor.wait_for_job(job_id, None).await.unwrap();
    }
}

async fn settled_counts(a: &Replica, b: &Replica) -> (usize, usize) {
    wait_for_quiet(QUIET, DEFAULT_TEST_TIMEOUT, || async { (a.operation_count().await, b.operation_count().await) })
        .await
        .expect("replicas never settled")
}

async fn counter(replica: &Replica, document_id: &str) -> Value {
    let snapshot = replica.reactor.get_document(document_id, None, &AbortSignal::never()).await.unwrap();
    snapshot.state[GLOBAL_SCOPE].clone()
}

#[tokio::test]
async fn test_single_mutation_stops_echoing() {
    let (a, b) = started_pair().await;

    run(&a, a.reactor.create("drive", COUNTER_DOCUMENT_TYPE, None).await.unwrap()).await;
    run(&a, a.reactor.execute("drive", None, vec![increment(3)], Value::Null).await.unwrap()).await;

    let (left, right) = settled_counts(&a, &b).await;
    assert_eq!(left, 2);
    assert_eq!(right, 2);
    assert_eq!(counter(&b, "drive").await, json!({"count": 3}));

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test]
async fn test_writes_flow_both_ways() {
    let (a, b) = started_pair().await;

    run(&a, a.reactor.create("drive", COUNTER_DOCUMENT_TYPE, None).await.unwrap()).await;
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || async { b.operation_count().await == 1 }).await);

    run(&b, b.reactor.create_child("drive", "file", COUNTER_DOCUMENT_TYPE, None).await.unwrap()).await;
    run(&b, b.reactor.execute("file", None, vec![increment(2)], Value::Null).await.unwrap()).await;

    let (left, right) = settled_counts(&a, &b).await;
    assert_eq!(left, right);
    assert_eq!(counter(&a, "file").await, json!({"count": 2}));

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_edits_converge_after_partition() {
    let a = Replica::with_test_config("alice").unwrap();
    let b = Replica::with_test_config("bob").unwrap();
    let (to_b, to_a) = link(&a, &b, "main.drive").await.unwrap();
    a.start().unwrap();
    b.start().unwrap();

    run(&a, a.reactor.create("drive", COUNTER_DOCUMENT_TYPE, None).await.unwrap()).await;
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || async { b.operation_count().await == 1 }).await);

    // partition, then edit on both sides
    to_b.disconnect();
    to_a.disconnect();
    run(&a, a.reactor.execute("drive", None, vec![increment(1)], Value::Null).await.unwrap()).await;
    run(&b, b.reactor.execute("drive", None, vec![increment(10)], Value::Null).await.unwrap()).await;

    let both_dead_lettered = wait_until(DEFAULT_TEST_TIMEOUT, || async {
        !a.sync.dead_letters("bob").unwrap().is_empty() && !b.sync.dead_letters("alice").unwrap().is_empty()
    })
    .await;
    assert!(both_dead_lettered);

    connect_in_memory(&to_b, &to_a);
    a.sync.retry_dead_letters("bob").unwrap();
    b.sync.retry_dead_letters("alice").unwrap();

    let (left, right) = settled_counts(&a, &b).await;
    assert_eq!(left, right);
    assert_eq!(counter(&a, "drive").await, json!({"count": 11}));
    assert_eq!(counter(&b, "drive").await, json!({"count": 11}));

    let never = AbortSignal::never();
    let ops_a = a.reactor.get_operations("drive", GLOBAL_SCOPE, None, &never).await.unwrap();
    let ops_b = b.reactor.get_operations("drive", GLOBAL_SCOPE, None, &never).await.unwrap();
    assert_converged(&ops_a, &ops_b);

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}
