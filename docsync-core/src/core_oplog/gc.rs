/*
    gc.rs - Skip resolution ("garbage collection") of undo chains

    Two protocol variants:
    - V1: skip may be larger than one and rewinds that many preceding
      operations. Scanning from the tail, each retained operation drops
      every earlier operation whose index lies above its skip floor.
    - V2: every NOOP carries skip 1. Consecutive NOOPs form a chain and
      each following non-NOOP (walking backwards) is cancelled until the
      chain is exhausted.

    Every variant yields a cleaned list (cancelled operations removed) and
    an ignore map (same length as the input, flagging what replay skips).
*/

use super::operation::Operation;
use serde::{Deserialize, Serialize};

/// Skip protocol version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GcVariant {
    #[default]
    V1,
    V2,
}

/// An operation of the full history with its replay disposition
#[derive(Debug, Clone, PartialEq)]
pub struct IgnoredOperation {
    pub operation: Operation,
    pub ignore: bool,
}

/// Where the next undo NOOP goes and what it must skip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoPosition {
    pub index: u64,
    pub skip: u64,
}

/// V1 garbage collection of a sorted history
pub fn garbage_collect(sorted: &[Operation]) -> Vec<Operation> {
    garbage_collect_with(sorted, GcVariant::V1)
}

/// Garbage collection under the given variant
pub fn garbage_collect_with(sorted: &[Operation], variant: GcVariant) -> Vec<Operation> {
    retained_positions(sorted, variant)
        .into_iter()
        .zip(sorted)
        .filter(|(retained, _)| *retained)
        .map(|(_, op)| op.clone())
        .collect()
}

/// Full history flagged for replay: cancelled operations and NOOPs are ignored
pub fn ignore_map(sorted: &[Operation], variant: GcVariant) -> Vec<IgnoredOperation> {
    retained_positions(sorted, variant)
        .into_iter()
        .zip(sorted)
        .map(|(retained, op)| IgnoredOperation {
            operation: op.clone(),
            ignore: !retained || op.is_noop(),
        })
        .collect()
}

/// Which positions of `sorted` survive garbage collection
pub(crate) fn retained_positions(sorted: &[Operation], variant: GcVariant) -> Vec<bool> {
    match variant {
        GcVariant::V1 => retained_v1(sorted),
        GcVariant::V2 => retained_v2(sorted),
    }
}

fn retained_v1(sorted: &[Operation]) -> Vec<bool> {
    let mut retained = vec![false; sorted.len()];
    let mut cursor = sorted.len();

    while cursor > 0 {
        let position = cursor - 1;
        let op = &sorted[position];
        retained[position] = true;

        let floor = op.index as i64 - op.skip as i64 - 1;
        cursor = position;
        while cursor > 0 && sorted[cursor - 1].index as i64 > floor {
            cursor -= 1;
        }
    }

    retained
}

fn retained_v2(sorted: &[Operation]) -> Vec<bool> {
    let mut retained = vec![false; sorted.len()];
    let mut chain = 0usize;

    for position in (0..sorted.len()).rev() {
        if sorted[position].is_noop() {
            chain += 1;
        } else if chain > 0 {
            chain -= 1;
        } else {
            retained[position] = true;
        }
    }

    retained
}

/// Skip value a new undo must carry to cancel exactly the last logical operation.
///
/// Returns `None` when nothing is left to undo.
pub fn next_skip_number(sorted: &[Operation]) -> Option<u64> {
    next_undo_position(sorted).map(|position| position.skip)
}

/// Index and skip for the next V1 undo.
///
/// When the cleaned tail is already a NOOP the new undo reuses its index
/// and widens the skip, so consecutive undos extend one chain instead of
/// cancelling each other.
pub fn next_undo_position(sorted: &[Operation]) -> Option<UndoPosition> {
    let cleaned = garbage_collect(sorted);
    let tail = cleaned.last()?;

    if !tail.is_noop() {
        return Some(UndoPosition { index: tail.index + 1, skip: tail.skip + 1 });
    }

    let target = cleaned.iter().rev().find(|op| !op.is_noop())?;
    Some(UndoPosition { index: tail.index, skip: tail.index - target.index + target.skip })
}
