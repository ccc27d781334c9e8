/*
    ordering.rs - Canonical ordering of operations

    (index ascending, skip ascending) is the order every downstream
    algorithm works in, regardless of the order operations arrived in.
*/

use super::operation::Operation;
use std::cmp::Ordering;

/// Stable sort by (index, skip)
pub fn sort_operations(operations: &[Operation]) -> Vec<Operation> {
    let mut sorted = operations.to_vec();
    sorted.sort_by(compare_position);
    sorted
}

pub(crate) fn compare_position(a: &Operation, b: &Operation) -> Ordering {
    a.index.cmp(&b.index).then(a.skip.cmp(&b.skip))
}

/// True when `a` sorts strictly before `b`
pub fn precedes(a: &Operation, b: &Operation) -> bool {
    compare_position(a, b) == Ordering::Less
}

/// Structural equality used to find the common prefix of two histories.
///
/// Compares position, scope, type and input; ids, hashes and timestamps
/// are deliberately not part of it.
pub fn operations_are_equal(a: &Operation, b: &Operation) -> bool {
    a.index == b.index
        && a.skip == b.skip
        && a.scope() == b.scope()
        && a.action_type() == b.action_type()
        && a.action.input == b.action.input
}
