/// Stress tests for merge and sync at scale
///
/// These tests verify correctness under load:
/// - Merging long divergent histories with many undos
/// - Many documents replicating between two replicas
///
/// Run with: cargo test --test stress_tests -- --ignored --nocapture

#[cfg(test)]
mod stress_tests {
    use docsync_core::core_oplog::{garbage_collect, merge, reshuffle_by_timestamp_and_index, sort_operations};
    use docsync_core::test_utils::assertions::assert_converged;
    use docsync_core::test_utils::async_helpers::wait_for_quiet;
    use docsync_core::test_utils::deterministic_rng::{random_history, test_rng};
    use docsync_core::test_utils::fixtures::{increment, COUNTER_DOCUMENT_TYPE};
    use docsync_core::test_utils::replica::{link, Replica};
    use serde_json::Value;
    use std::time::{Duration, Instant};

    /// Merge two 2000-operation histories in both directions
    #[test]
    #[ignore] // Run with: cargo test --ignored
    fn stress_merge_long_histories() {
        let mut rng = test_rng();
        let left = random_history(&mut rng, "left", 2_000, 0.1);
        let right = random_history(&mut rng, "right", 2_000, 0.1);

        let start = Instant::now();
        let merged_lr = merge(&left, &right, reshuffle_by_timestamp_and_index);
        let merged_rl = merge(&right, &left, reshuffle_by_timestamp_and_index);
        let elapsed = start.elapsed();

        println!("Merged 2 x 2000 operations twice in {:?}", elapsed);
        assert_converged(&merged_lr, &merged_rl);

        let active = garbage_collect(&sort_operations(&merged_lr));
        assert!(!active.is_empty());
        assert!(elapsed < Duration::from_secs(5), "merge too slow: {:?}", elapsed);
    }

    /// 50 documents, five writes each, replicated and settled
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn stress_many_documents_replicate() {
        let a = Replica::with_test_config("alice").unwrap();
        let b = Replica::with_test_config("bob").unwrap();
        link(&a, &b, "main.drive").await.unwrap();
        a.start().unwrap();
        b.start().unwrap();

        let receipt = a.reactor.create("drive", COUNTER_DOCUMENT_TYPE, None).await.unwrap();
        a.reactor.wait_for_job(receipt.last_job_id().unwrap(), None).await.unwrap();

        let start = Instant::now();
        for n in 0..50 {
            let document_id = format!("file-{}", n);
            let receipt = a.reactor.create_child("drive", &document_id, COUNTER_DOCUMENT_TYPE, None).await.unwrap();
            for job_id in &receipt.job_ids {
                a.reactor.wait_for_job(job_id, None).await.unwrap();
            }
            for by in 1..=5 {
                a.reactor.execute(&document_id, None, vec![increment(by)], Value::Null).await.unwrap();
            }
        }

        let settled = wait_for_quiet(Duration::from_millis(500), Duration::from_secs(60), || async {
            (a.operation_count().await, b.operation_count().await)
        })
        .await
        .expect("replicas never settled");
        println!("Replicated {} operations in {:?}", settled.0, start.elapsed());

        assert_eq!(settled.0, settled.1);
        // drive create, then per file: create, relationship, five increments
        assert_eq!(settled.0, 1 + 50 * 7);

        a.stop().await.unwrap();
        b.stop().await.unwrap();
    }
}
