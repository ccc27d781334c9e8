/*
    property_tests.rs - Randomized properties of the operation log engine
*/

use crate::core_oplog::*;
use crate::test_utils::{random_history, test_rng_with_seed, OperationBuilder};
use proptest::prelude::*;
use rand::Rng;

/// A shared random prefix followed by two independent suffixes of plain
/// operations with random timestamps
fn diverged(seed: u64, common_len: usize, a_len: usize, b_len: usize) -> (Vec<Operation>, Vec<Operation>) {
    let mut rng = test_rng_with_seed(seed);
    let common = random_history(&mut rng, "c", common_len, 0.2);

    let mut extend = |prefix: &str, len: usize| {
        let mut ops = common.clone();
        for n in 0..len {
            let index = ops.last().map(|op| op.index + 1).unwrap_or(0);
            let timestamp = rng.random_range(10_000..10_050);
            ops.push(OperationBuilder::new(index).id(format!("{}{}", prefix, n)).timestamp(timestamp).build());
        }
        ops
    };

    let a = extend("a", a_len);
    let b = extend("b", b_len);
    (a, b)
}

proptest! {
    #[test]
    fn prop_gc_is_idempotent(seed in any::<u64>(), len in 0usize..60) {
        let history = random_history(&mut test_rng_with_seed(seed), "p", len, 0.3);
        let once = garbage_collect(&history);
        prop_assert_eq!(garbage_collect(&once), once.clone());

        let v2 = garbage_collect_with(&history, GcVariant::V2);
        prop_assert_eq!(garbage_collect_with(&v2, GcVariant::V2), v2.clone());
    }

    #[test]
    fn prop_ignore_map_preserves_length(seed in any::<u64>(), len in 0usize..60) {
        let history = random_history(&mut test_rng_with_seed(seed), "p", len, 0.3);
        prop_assert_eq!(ignore_map(&history, GcVariant::V1).len(), history.len());
        prop_assert_eq!(ignore_map(&history, GcVariant::V2).len(), history.len());
    }

    #[test]
    fn prop_merge_is_deterministic(seed in any::<u64>(), common in 0usize..10, a in 0usize..8, b in 0usize..8) {
        let (left, right) = diverged(seed, common, a, b);
        prop_assert_eq!(
            merge(&left, &right, reshuffle_by_timestamp),
            merge(&left, &right, reshuffle_by_timestamp)
        );
    }

    #[test]
    fn prop_merge_is_symmetric_and_consistent(seed in any::<u64>(), common in 0usize..10, a in 0usize..8, b in 0usize..8) {
        let (left, right) = diverged(seed, common, a, b);
        let ab = merge(&left, &right, reshuffle_by_timestamp_and_index);
        let ba = merge(&right, &left, reshuffle_by_timestamp_and_index);

        prop_assert_eq!(&ab, &ba);
        prop_assert!(check_cleaned_operations_integrity(&garbage_collect(&ab)).is_empty());

        // nothing is lost: every plain operation of either side survives
        let survivors: Vec<_> = garbage_collect(&ab).into_iter().map(|op| op.id).collect();
        let expected = a + b;
        let suffix_count = survivors.iter().filter(|id| id.starts_with('a') || id.starts_with('b')).count();
        prop_assert_eq!(suffix_count, expected);
    }
}
