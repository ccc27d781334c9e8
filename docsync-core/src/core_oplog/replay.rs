/*
    replay.rs - Rebuild scope state from an operation history

    Replay walks the ignore-mapped history of one scope and folds every
    retained operation through the document model's reducer. A cached
    `resulting_state` on the newest retained operation that has one acts
    as a checkpoint; everything up to it is skipped.
*/

use super::errors::{HashMismatchError, OpLogResult};
use super::gc::{ignore_map, GcVariant, IgnoredOperation};
use super::operation::{hash_state, Action, Operation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pure state transition of a document model
pub trait Reducer: Send + Sync {
    /// State of `scope` before any operation
    fn initial_state(&self, scope: &str) -> Value;

    /// Apply one non-NOOP action to the state of `scope`
    fn reduce(&self, scope: &str, state: &Value, action: &Action) -> OpLogResult<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOptions {
    pub variant: GcVariant,

    /// Start from the newest usable checkpoint instead of the initial state
    pub use_checkpoints: bool,

    /// Compare each retained operation's hash with the recomputed state.
    /// Implies a full replay.
    pub verify_hashes: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        ReplayOptions { variant: GcVariant::V1, use_checkpoints: true, verify_hashes: false }
    }
}

impl ReplayOptions {
    pub fn verifying() -> Self {
        ReplayOptions { use_checkpoints: false, verify_hashes: true, ..Default::default() }
    }
}

/// Live state of one scope after replay
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeState {
    pub scope: String,
    pub state: Value,
    pub hash: String,

    /// Index of the last operation in the history, cancelled or not
    pub last_index: Option<u64>,

    pub last_timestamp_utc_ms: u64,

    /// Operations folded through the reducer during this replay
    pub applied: usize,

    pub from_checkpoint: bool,
}

/// Apply one action; NOOPs leave the state unchanged
pub fn apply_action(
    reducer: &dyn Reducer,
    scope: &str,
    state: &Value,
    action: &Action,
) -> OpLogResult<Value> {
    if action.is_noop() {
        return Ok(state.clone());
    }
    reducer.reduce(scope, state, action)
}

/// Replay the sorted full history of `scope`
pub fn replay_scope(
    reducer: &dyn Reducer,
    scope: &str,
    sorted: &[Operation],
    options: ReplayOptions,
) -> OpLogResult<ScopeState> {
    let mapped = ignore_map(sorted, options.variant);

    let checkpoint = if options.use_checkpoints && !options.verify_hashes {
        find_checkpoint(&mapped)
    } else {
        None
    };

    let (mut state, start, from_checkpoint) = match checkpoint {
        Some((position, state)) => (state, position + 1, true),
        None => (reducer.initial_state(scope), 0, false),
    };

    let mut applied = 0;
    for entry in mapped.iter().skip(start).filter(|entry| !entry.ignore) {
        let op = &entry.operation;
        state = apply_action(reducer, scope, &state, &op.action)?;
        applied += 1;

        if options.verify_hashes {
            let actual = hash_state(&state)?;
            if actual != op.hash {
                return Err(HashMismatchError {
                    scope: scope.to_string(),
                    index: op.index,
                    operation_id: op.id.clone(),
                    expected: op.hash.clone(),
                    actual,
                }
                .into());
            }
        }
    }

    let hash = hash_state(&state)?;
    let last = sorted.last();

    Ok(ScopeState {
        scope: scope.to_string(),
        state,
        hash,
        last_index: last.map(|op| op.index),
        last_timestamp_utc_ms: last.map(|op| op.timestamp_utc_ms).unwrap_or(0),
        applied,
        from_checkpoint,
    })
}

// Only the newest candidate is tried; if it does not parse, replay starts over
fn find_checkpoint(mapped: &[IgnoredOperation]) -> Option<(usize, Value)> {
    let (position, entry) = mapped
        .iter()
        .enumerate()
        .rev()
        .find(|(_, entry)| !entry.ignore && entry.operation.resulting_state.is_some())?;

    let raw = entry.operation.resulting_state.as_deref()?;
    match serde_json::from_str(raw) {
        Ok(state) => Some((position, state)),
        Err(e) => {
            tracing::debug!(
                operation_id = %entry.operation.id,
                error = %e,
                "Unusable checkpoint, replaying from initial state"
            );
            None
        }
    }
}
