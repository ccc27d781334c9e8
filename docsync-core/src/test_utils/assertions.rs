//! Custom assertions for operation histories
//!
//! Helpers that compare histories by position and identity and print both
//! sides on failure.

use crate::core_oplog::{garbage_collect, sort_operations, Operation};
use std::fmt::Debug;

/// Assert that a Result is Ok and return the value
pub fn assert_ok<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a Result is Err and return the error
pub fn assert_err<T: Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
        Err(e) => e,
    }
}

/// (index, skip) of every operation, in input order
pub fn positions(operations: &[Operation]) -> Vec<(u64, u64)> {
    operations.iter().map(Operation::position).collect()
}

/// Ids of every operation, in input order
pub fn operation_ids(operations: &[Operation]) -> Vec<String> {
    operations.iter().map(|op| op.id.clone()).collect()
}

/// Assert the exact (index, skip) sequence of a history
pub fn assert_positions(operations: &[Operation], expected: &[(u64, u64)]) {
    let actual = positions(operations);
    if actual != expected {
        panic!("Unexpected positions: {:?}, expected {:?}", actual, expected);
    }
}

/// Assert two replicas hold the same active history: same ids at the same
/// positions after sorting and garbage collection
pub fn assert_converged(a: &[Operation], b: &[Operation]) {
    let left = garbage_collect(&sort_operations(a));
    let right = garbage_collect(&sort_operations(b));

    let left: Vec<_> = left.iter().map(|op| (op.position(), op.id.as_str())).collect();
    let right: Vec<_> = right.iter().map(|op| (op.position(), op.id.as_str())).collect();

    if left != right {
        panic!("Histories diverged.\n left: {:?}\nright: {:?}", left, right);
    }
}

/// Assert that a future completes within a timeout
#[macro_export]
macro_rules! assert_timeout {
    ($duration:expr, $future:expr) => {{
        match tokio::time::timeout($duration, $future).await {
            Ok(result) => result,
            Err(_) => panic!("Future did not complete within {:?}", $duration),
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::{ops_from_pairs, OperationBuilder};

    #[test]
    #[should_panic(expected = "Expected Ok, got Err")]
    fn test_assert_ok_panics_on_err() {
        let result: Result<i32, &str> = Err("error");
        let _ = assert_ok(result);
    }

    #[test]
    fn test_assert_positions() {
        assert_positions(&ops_from_pairs(&[(0, 0), (1, 1)]), &[(0, 0), (1, 1)]);
    }

    #[test]
    fn test_converged_ignores_arrival_order_and_cancelled_operations() {
        let a = ops_from_pairs(&[(0, 0), (1, 0), (2, 0)]);
        let mut b = vec![a[2].clone(), a[0].clone(), a[1].clone()];
        b.push(OperationBuilder::new(3).id("cancelled").build());
        b.push(OperationBuilder::new(3).skip(1).id("undo").noop().build());

        let mut a = a;
        a.push(OperationBuilder::new(3).skip(1).id("undo").noop().build());
        assert_converged(&a, &b);
    }

    #[test]
    #[should_panic(expected = "Histories diverged")]
    fn test_converged_detects_different_ids() {
        let a = vec![OperationBuilder::new(0).id("x").build()];
        let b = vec![OperationBuilder::new(0).id("y").build()];
        assert_converged(&a, &b);
    }
}
