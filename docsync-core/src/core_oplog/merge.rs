/*
    merge.rs - Branch attachment, split and deterministic merge

    Two replicas that diverged after a common prefix reconcile by
    reshuffling the union of their diverging suffixes into a single new
    suffix. Reshuffling is a pure function of its inputs, so both replicas
    compute the same suffix without talking to each other.
*/

use super::gc::garbage_collect;
use super::operation::Operation;
use super::ordering::{operations_are_equal, precedes, sort_operations};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Common prefix and diverging suffixes of two histories
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitOperations {
    pub common: Vec<Operation>,
    pub target_only: Vec<Operation>,
    pub merge_only: Vec<Operation>,
}

/// First position and skip assigned to a reshuffled suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartIndex {
    pub index: u64,
    pub skip: u64,
}

/// Output of [`attach_branch`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachedBranch {
    pub operations: Vec<Operation>,
    pub trunk_remainder: Vec<Operation>,
}

/// Output of [`merge_detailed`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeResult {
    pub common: Vec<Operation>,
    pub reshuffled: Vec<Operation>,
}

impl MergeResult {
    pub fn into_operations(self) -> Vec<Operation> {
        let mut operations = self.common;
        operations.extend(self.reshuffled);
        operations
    }
}

/// Named reshuffle functions, selectable from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReshufflePolicy {
    Timestamp,
    #[default]
    TimestampAndIndex,
}

impl ReshufflePolicy {
    pub fn reshuffle(
        &self,
        start: StartIndex,
        target: &[Operation],
        merge: &[Operation],
    ) -> Vec<Operation> {
        match self {
            ReshufflePolicy::Timestamp => reshuffle_by_timestamp(start, target, merge),
            ReshufflePolicy::TimestampAndIndex => {
                reshuffle_by_timestamp_and_index(start, target, merge)
            }
        }
    }
}

/// Positional split of two sorted histories at their first divergence.
///
/// Once the histories diverge every remaining element of both sides is
/// part of the diff, even if some later pair happens to be equal.
pub fn split(target: &[Operation], merge: &[Operation]) -> SplitOperations {
    let mut result = SplitOperations::default();
    let mut diverged = false;

    for position in 0..target.len().max(merge.len()) {
        match (target.get(position), merge.get(position)) {
            (Some(t), Some(m)) => {
                if !diverged && operations_are_equal(t, m) {
                    result.common.push(t.clone());
                } else {
                    diverged = true;
                    result.target_only.push(t.clone());
                    result.merge_only.push(m.clone());
                }
            }
            (Some(t), None) => result.target_only.push(t.clone()),
            (None, Some(m)) => result.merge_only.push(m.clone()),
            (None, None) => break,
        }
    }

    result
}

/// Append a branch onto a trunk after their longest common prefix.
///
/// Both inputs are sorted and garbage collected first. Trunk operations
/// that sort before the next branch candidate are carried over; once the
/// histories disagree the rest of the branch is appended verbatim and the
/// unconsumed trunk is handed back.
pub fn attach_branch(trunk: &[Operation], branch: &[Operation]) -> AttachedBranch {
    let mut trunk_queue: VecDeque<Operation> =
        garbage_collect(&sort_operations(trunk)).into_iter().collect();
    let mut branch_queue: VecDeque<Operation> =
        garbage_collect(&sort_operations(branch)).into_iter().collect();

    if trunk_queue.is_empty() {
        return AttachedBranch { operations: branch_queue.into_iter().collect(), trunk_remainder: vec![] };
    }

    let mut result = Vec::new();
    let mut entered_branch = false;

    while !entered_branch {
        let Some(candidate) = branch_queue.front() else {
            break;
        };

        while trunk_queue.front().is_some_and(|next| precedes(next, candidate)) {
            if let Some(next) = trunk_queue.pop_front() {
                result.push(next);
            }
        }

        match trunk_queue.front() {
            Some(next) if operations_are_equal(next, candidate) => {
                if let Some(next) = trunk_queue.pop_front() {
                    result.push(next);
                }
                branch_queue.pop_front();
            }
            _ => entered_branch = true,
        }
    }

    if entered_branch {
        result.extend(branch_queue);
    } else {
        result.extend(trunk_queue.drain(..));
    }

    AttachedBranch {
        operations: garbage_collect(&result),
        trunk_remainder: trunk_queue.into_iter().collect(),
    }
}

/// Merge two sorted histories and return the combined history
pub fn merge<F>(target: &[Operation], merge: &[Operation], reshuffle: F) -> Vec<Operation>
where
    F: Fn(StartIndex, &[Operation], &[Operation]) -> Vec<Operation>,
{
    merge_detailed(target, merge, reshuffle).into_operations()
}

/// Merge two sorted histories, keeping the common prefix and the
/// reshuffled suffix apart so callers can tell which operations are new.
pub fn merge_detailed<F>(target: &[Operation], merge: &[Operation], reshuffle: F) -> MergeResult
where
    F: Fn(StartIndex, &[Operation], &[Operation]) -> Vec<Operation>,
{
    let SplitOperations { common, target_only, merge_only } =
        split(&garbage_collect(target), &garbage_collect(merge));

    let max_common = last_index(&common);
    let next_index = 1 + max_common.max(last_index(&target_only)).max(last_index(&merge_only));

    let target_ids: HashSet<&str> = target_only.iter().map(|op| op.id.as_str()).collect();
    let filtered_merge: Vec<Operation> =
        merge_only.iter().filter(|op| !target_ids.contains(op.id.as_str())).cloned().collect();

    let start = StartIndex {
        index: next_index as u64,
        skip: (next_index - (max_common + 1)) as u64,
    };
    let reshuffled = reshuffle(start, &target_only, &filtered_merge);

    MergeResult { common, reshuffled }
}

fn last_index(operations: &[Operation]) -> i64 {
    operations.last().map(|op| op.index as i64).unwrap_or(-1)
}

/// Order the union of both suffixes by timestamp (stable) and reassign indices
pub fn reshuffle_by_timestamp(
    start: StartIndex,
    target: &[Operation],
    merge: &[Operation],
) -> Vec<Operation> {
    let mut combined: Vec<Operation> = target.iter().chain(merge).cloned().collect();
    combined.sort_by_key(|op| op.timestamp_utc_ms);
    reassign(start, combined)
}

/// Order by timestamp, then original index, then id.
///
/// The id tie-break makes the result independent of argument order.
pub fn reshuffle_by_timestamp_and_index(
    start: StartIndex,
    target: &[Operation],
    merge: &[Operation],
) -> Vec<Operation> {
    let mut combined: Vec<Operation> = target.iter().chain(merge).cloned().collect();
    combined.sort_by(|a, b| {
        a.timestamp_utc_ms
            .cmp(&b.timestamp_utc_ms)
            .then(a.index.cmp(&b.index))
            .then_with(|| a.id.cmp(&b.id))
    });
    reassign(start, combined)
}

// Cached states belong to the old positions and are dropped
fn reassign(start: StartIndex, operations: Vec<Operation>) -> Vec<Operation> {
    operations
        .into_iter()
        .enumerate()
        .map(|(offset, mut op)| {
            op.index = start.index + offset as u64;
            op.skip = if offset == 0 { start.skip } else { 0 };
            op.resulting_state = None;
            op
        })
        .collect()
}
