/*
    integrity.rs - Structural consistency of operation sequences

    A garbage-collected sequence is consistent when every operation's
    `index - skip` is exactly one past the previous operation's index.
    Anything above that is a gap (operations are missing), anything below
    is two writers claiming the same slot.
*/

use super::gc::garbage_collect;
use super::operation::Operation;
use super::ordering::{precedes, sort_operations};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityIssueKind {
    MissingIndex,
    DuplicatedIndex,
}

/// A single structural violation at (index, skip)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub index: u64,
    pub skip: u64,
    pub kind: IntegrityIssueKind,
    pub message: String,
}

impl IntegrityIssue {
    pub fn new(index: u64, skip: u64, kind: IntegrityIssueKind) -> Self {
        let message = match kind {
            IntegrityIssueKind::MissingIndex => {
                format!("Missing operations before index {} (skip {})", index, skip)
            }
            IntegrityIssueKind::DuplicatedIndex => {
                format!("Duplicated index {} (skip {})", index, skip)
            }
        };
        IntegrityIssue { index, skip, kind, message }
    }
}

/// Classification of an incoming batch against an existing history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedOperations {
    /// Accepted in order, each one consistent with everything before it
    pub valid: Vec<Operation>,

    /// Already present by id or position, or racing an existing slot
    pub duplicated: Vec<Operation>,

    /// At or after the first gap; never applied
    pub invalid: Vec<Operation>,

    pub integrity_issues: Vec<IntegrityIssue>,
}

impl PreparedOperations {
    pub fn has_gap(&self) -> bool {
        !self.invalid.is_empty()
    }
}

/// Walk a cleaned, sorted sequence and report every position that breaks contiguity
pub fn check_cleaned_operations_integrity(cleaned: &[Operation]) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();
    let mut current: i64 = -1;

    for op in cleaned {
        let next = op.index as i64 - op.skip as i64;
        let expected = current + 1;

        if next > expected {
            issues.push(IntegrityIssue::new(op.index, op.skip, IntegrityIssueKind::MissingIndex));
        } else if next < expected {
            issues.push(IntegrityIssue::new(op.index, op.skip, IntegrityIssueKind::DuplicatedIndex));
        }

        current = op.index as i64;
    }

    issues
}

/// Decide which incoming operations may be appended to `history`.
///
/// Incoming operations are considered in sorted order. Once one of them
/// opens a gap, it and everything after it are invalid.
pub fn prepare_operations(history: &[Operation], incoming: &[Operation]) -> PreparedOperations {
    let mut accepted = sort_operations(history);
    let mut known_ids: HashSet<String> = accepted.iter().map(|op| op.id.clone()).collect();
    let mut known_positions: HashSet<(u64, u64)> = accepted.iter().map(Operation::position).collect();

    let mut prepared = PreparedOperations::default();

    for op in sort_operations(incoming) {
        if prepared.has_gap() {
            prepared.invalid.push(op);
            continue;
        }

        if known_ids.contains(&op.id) || known_positions.contains(&op.position()) {
            prepared.duplicated.push(op);
            continue;
        }

        if accepted.last().is_some_and(|tail| !precedes(tail, &op)) {
            prepared.duplicated.push(op);
            continue;
        }

        let mut candidate = accepted.clone();
        candidate.push(op.clone());
        let issue = check_cleaned_operations_integrity(&garbage_collect(&candidate))
            .into_iter()
            .find(|issue| issue.index == op.index && issue.skip == op.skip);

        match issue {
            Some(issue) if issue.kind == IntegrityIssueKind::MissingIndex => {
                prepared.integrity_issues.push(issue);
                prepared.invalid.push(op);
            }
            Some(issue) => {
                prepared.integrity_issues.push(issue);
                prepared.duplicated.push(op);
            }
            None => {
                known_ids.insert(op.id.clone());
                known_positions.insert(op.position());
                accepted.push(op.clone());
                prepared.valid.push(op);
            }
        }
    }

    prepared
}
