/*!
    Deterministic RNG helpers for reproducible tests

    Seeded generators plus a random history builder used by the
    convergence suites and the benchmarks (see benches/bench_config.rs).
*/

use crate::core_oplog::{next_undo_position, garbage_collect, Operation};
use crate::test_utils::fixtures::OperationBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default seed for deterministic tests
pub const DEFAULT_TEST_SEED: u64 = 42;

/// Create a deterministic RNG with the default seed
pub fn test_rng() -> StdRng {
    test_rng_with_seed(DEFAULT_TEST_SEED)
}

/// Create a deterministic RNG with a custom seed
pub fn test_rng_with_seed(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Build a valid sorted history of `len` operations where roughly
/// `undo_ratio` of them are undo NOOPs. Ids are prefixed with `prefix`
/// so two generated histories never share ids by accident.
pub fn random_history(rng: &mut StdRng, prefix: &str, len: usize, undo_ratio: f64) -> Vec<Operation> {
    let mut history: Vec<Operation> = Vec::with_capacity(len);
    let mut timestamp = 1_000u64;

    for n in 0..len {
        timestamp += rng.random_range(1..50);
        let id = format!("{}-{}", prefix, n);

        let undo = if rng.random_bool(undo_ratio) {
            next_undo_position(&garbage_collect(&history))
        } else {
            None
        };

        let op = match undo {
            Some(position) => OperationBuilder::new(position.index)
                .skip(position.skip)
                .noop()
                .id(id)
                .timestamp(timestamp)
                .build(),
            None => {
                let index = history.last().map(|op| op.index + 1).unwrap_or(0);
                OperationBuilder::new(index).id(id).timestamp(timestamp).build()
            }
        };
        history.push(op);
    }

    history
}
