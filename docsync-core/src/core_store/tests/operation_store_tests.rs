/*
    operation_store_tests.rs - InMemoryStore as an OperationStore
*/

use crate::abort::{AbortController, AbortSignal};
use crate::core_store::*;
use crate::test_utils::{ops_from_pairs, positions, OperationBuilder};

fn batch(document_id: &str, operations: Vec<crate::core_oplog::Operation>) -> WriteBatch {
    WriteBatch {
        document_id: document_id.to_string(),
        document_type: "test/counter".to_string(),
        branch: "main".to_string(),
        operations,
        ..Default::default()
    }
}

fn key(document_id: &str) -> ScopeKey {
    ScopeKey::new(document_id, "global", "main")
}

#[tokio::test]
async fn test_apply_assigns_consecutive_ordinals() {
    let store = InMemoryStore::new();
    let first = store.apply(batch("doc-1", ops_from_pairs(&[(0, 0), (1, 0)]))).await.unwrap();
    let second = store.apply(batch("doc-2", ops_from_pairs(&[(0, 0)]))).await.unwrap();

    let ordinals: Vec<u64> = first
        .operations
        .iter()
        .chain(&second.operations)
        .map(|entry| entry.context.ordinal)
        .collect();
    assert_eq!(ordinals, vec![1, 2, 3]);
    assert_eq!(store.count(&AbortSignal::never()).await.unwrap(), 3);
}

#[tokio::test]
async fn test_duplicate_position_rejects_whole_batch() {
    let store = InMemoryStore::new();
    store.apply(batch("doc-1", ops_from_pairs(&[(0, 0)]))).await.unwrap();

    let racing = vec![
        OperationBuilder::new(1).id("fresh").build(),
        OperationBuilder::new(0).id("racer").build(),
    ];
    let err = store.apply(batch("doc-1", racing)).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicatePosition { index: 0, skip: 0, .. }));

    // nothing from the rejected batch was committed
    let ops = store.get(&key("doc-1"), &AbortSignal::never()).await.unwrap();
    assert_eq!(positions(&ops), vec![(0, 0)]);
}

#[tokio::test]
async fn test_duplicate_position_within_one_batch() {
    let store = InMemoryStore::new();
    let ops = vec![OperationBuilder::new(0).id("a").build(), OperationBuilder::new(0).id("b").build()];
    assert!(store.apply(batch("doc-1", ops)).await.is_err());
}

#[tokio::test]
async fn test_same_id_at_new_position_is_accepted() {
    // reshuffled operations keep their id but move to a new position
    let store = InMemoryStore::new();
    store.apply(batch("doc-1", vec![OperationBuilder::new(0).id("x").build()])).await.unwrap();
    store
        .apply(batch("doc-1", vec![OperationBuilder::new(1).skip(1).id("x").build()]))
        .await
        .unwrap();

    let ops = store.get(&key("doc-1"), &AbortSignal::never()).await.unwrap();
    assert_eq!(positions(&ops), vec![(0, 0), (1, 1)]);
}

#[tokio::test]
async fn test_get_returns_sequence_in_position_order() {
    let store = InMemoryStore::new();
    store.apply(batch("doc-1", ops_from_pairs(&[(2, 0), (0, 0)]))).await.unwrap();
    store.apply(batch("doc-1", ops_from_pairs(&[(1, 0), (2, 1)]))).await.unwrap();

    let ops = store.get(&key("doc-1"), &AbortSignal::never()).await.unwrap();
    assert_eq!(positions(&ops), vec![(0, 0), (1, 0), (2, 0), (2, 1)]);
}

#[tokio::test]
async fn test_range_queries() {
    let store = InMemoryStore::new();
    store.apply(batch("doc-1", ops_from_pairs(&[(0, 0), (1, 0), (2, 0), (3, 0)]))).await.unwrap();
    let never = AbortSignal::never();

    let since = store.get_since(&key("doc-1"), 1, &never).await.unwrap();
    assert_eq!(positions(&since), vec![(2, 0), (3, 0)]);

    let conflicting = store.get_conflicting(&key("doc-1"), 1, &never).await.unwrap();
    assert_eq!(positions(&conflicting), vec![(1, 0), (2, 0), (3, 0)]);

    // default timestamps are 1000 + index * 10
    let recent = store.get_since_timestamp(&key("doc-1"), 1_010, &never).await.unwrap();
    assert_eq!(positions(&recent), vec![(2, 0), (3, 0)]);
}

#[tokio::test]
async fn test_revisions_per_scope() {
    let store = InMemoryStore::new();
    let ops = vec![
        OperationBuilder::new(0).build(),
        OperationBuilder::new(1).build(),
        OperationBuilder::new(0).scope("local").id("local-0").build(),
    ];
    store.apply(batch("doc-1", ops)).await.unwrap();

    let revisions = store.get_revisions("doc-1", "main", &AbortSignal::never()).await.unwrap();
    assert_eq!(revisions.get("global"), Some(&2));
    assert_eq!(revisions.get("local"), Some(&1));
    assert!(store.get_revisions("doc-1", "draft", &AbortSignal::never()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_existing_ids_and_header() {
    let store = InMemoryStore::new();
    let never = AbortSignal::never();
    assert!(!store.has_document("doc-1", &never).await.unwrap());

    store.apply(batch("doc-1", ops_from_pairs(&[(0, 0)]))).await.unwrap();

    let ids = vec!["op-0-0".to_string(), "missing".to_string()];
    let existing = store.existing_ids(&ids, &never).await.unwrap();
    assert!(existing.contains("op-0-0"));
    assert!(!existing.contains("missing"));

    let header = store.get_header("doc-1", &never).await.unwrap();
    assert_eq!(header.document_type, "test/counter");
    assert_eq!(header.created_at_utc_ms, 1_000);
    assert!(matches!(store.get_header("doc-2", &never).await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_aborted_signal_fails_reads_immediately() {
    let store = InMemoryStore::new();
    store.apply(batch("doc-1", ops_from_pairs(&[(0, 0)]))).await.unwrap();

    let controller = AbortController::new();
    controller.abort("test");
    let signal = controller.signal();

    assert!(matches!(store.get(&key("doc-1"), &signal).await, Err(StoreError::Aborted(_))));
    assert!(matches!(store.count(&signal).await, Err(StoreError::Aborted(_))));
    assert!(matches!(store.find("main.doc-1", 0, &signal).await, Err(StoreError::Aborted(_))));
}

#[tokio::test]
async fn test_commit_context_carries_source_remote() {
    let store = InMemoryStore::new();
    let mut incoming = batch("doc-1", ops_from_pairs(&[(0, 0)]));
    incoming.source_remote = "peer-a".to_string();

    let result = store.apply(incoming).await.unwrap();
    let context = &result.operations[0].context;
    assert_eq!(context.source_remote, "peer-a");
    assert_eq!(context.scope, "global");
    assert_eq!(context.branch, "main");
}
