/*
    core_oplog - Operation log engine

    Pure algorithms over ordered operation histories. Nothing in here
    touches storage or the network; every function takes slices and
    returns fresh vectors so two replicas fed the same inputs compute
    byte-identical outputs.

    Handles:
    - Canonical (index, skip) ordering
    - Skip resolution (garbage collection) for undo chains
    - Branch attachment, split and merge with deterministic reshuffling
    - Integrity checking of cleaned histories
    - Replay through a document reducer, with checkpoints and hash checks
*/

pub mod errors;
pub mod gc;
pub mod integrity;
pub mod merge;
pub mod operation;
pub mod ordering;
pub mod replay;

#[cfg(test)]
pub mod tests;

pub use errors::{HashMismatchError, OpLogError, OpLogResult};
pub use gc::{
    garbage_collect, garbage_collect_with, ignore_map, next_skip_number, next_undo_position,
    GcVariant, IgnoredOperation, UndoPosition,
};
pub use integrity::{
    check_cleaned_operations_integrity, prepare_operations, IntegrityIssue, IntegrityIssueKind,
    PreparedOperations,
};
pub use merge::{
    attach_branch, merge, merge_detailed, reshuffle_by_timestamp, reshuffle_by_timestamp_and_index,
    split, AttachedBranch, MergeResult, ReshufflePolicy, SplitOperations, StartIndex,
};
pub use operation::{
    derive_operation_id, hash_state, now_millis, Action, Operation, OperationContext,
    OperationWithContext, DOCUMENT_SCOPE, GLOBAL_SCOPE, LOCAL_SCOPE, NOOP,
};
pub use ordering::{operations_are_equal, precedes, sort_operations};
pub use replay::{apply_action, replay_scope, Reducer, ReplayOptions, ScopeState};
