//! Test fixtures for creating common test objects
//!
//! Provides builder patterns and factory functions for operations, actions
//! and a small counter document model used across the test suites and the
//! harness.

use crate::core_oplog::{Action, Operation, GLOBAL_SCOPE, NOOP};
use crate::core_reactor::registry::DocumentModel;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Document type string of [`CounterModel`]
pub const COUNTER_DOCUMENT_TYPE: &str = "test/counter";

/// Builder for operations with predictable defaults
///
/// Defaults: id `op-{index}-{skip}`, type `TEST`, scope `global`,
/// input `{"id": <id>}`, timestamp `1000 + index * 10`.
#[derive(Debug, Clone)]
pub struct OperationBuilder {
    index: u64,
    skip: u64,
    id: Option<String>,
    action_type: String,
    input: Option<Value>,
    scope: String,
    timestamp: Option<u64>,
    hash: Option<String>,
    resulting_state: Option<String>,
}

impl OperationBuilder {
    pub fn new(index: u64) -> Self {
        Self {
            index,
            skip: 0,
            id: None,
            action_type: "TEST".to_string(),
            input: None,
            scope: GLOBAL_SCOPE.to_string(),
            timestamp: None,
            hash: None,
            resulting_state: None,
        }
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn timestamp(mut self, timestamp_utc_ms: u64) -> Self {
        self.timestamp = Some(timestamp_utc_ms);
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn action_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = action_type.into();
        self
    }

    /// Turn the operation into a NOOP with a null input
    pub fn noop(mut self) -> Self {
        self.action_type = NOOP.to_string();
        self.input = Some(Value::Null);
        self
    }

    pub fn hash(mut self, hash: &str) -> Self {
        self.hash = Some(hash.to_string());
        self
    }

    pub fn resulting_state(mut self, state: &str) -> Self {
        self.resulting_state = Some(state.to_string());
        self
    }

    pub fn build(self) -> Operation {
        let id = self.id.unwrap_or_else(|| format!("op-{}-{}", self.index, self.skip));
        let timestamp = self.timestamp.unwrap_or(1000 + self.index * 10);
        let input = self.input.unwrap_or_else(|| json!({ "id": id }));

        Operation {
            hash: self.hash.unwrap_or_else(|| format!("hash-{}", id)),
            action: Action {
                id: format!("action-{}", id),
                action_type: self.action_type,
                input,
                scope: self.scope,
                timestamp_utc_ms: timestamp,
            },
            id,
            index: self.index,
            skip: self.skip,
            timestamp_utc_ms: timestamp,
            resulting_state: self.resulting_state,
        }
    }
}

/// Operations at the given (index, skip) positions with default contents
pub fn ops_from_pairs(pairs: &[(u64, u64)]) -> Vec<Operation> {
    pairs.iter().map(|&(index, skip)| OperationBuilder::new(index).skip(skip).build()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterState {
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "input", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CounterAction {
    Increment { by: i64 },
    Set { value: i64 },
}

/// Minimal document model: one integer per scope
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterModel;

impl DocumentModel for CounterModel {
    type State = CounterState;
    type Action = CounterAction;

    fn document_type(&self) -> &'static str {
        COUNTER_DOCUMENT_TYPE
    }

    fn apply(&self, _scope: &str, state: CounterState, action: CounterAction) -> Result<CounterState, String> {
        match action {
            CounterAction::Increment { by } => state
                .count
                .checked_add(by)
                .map(|count| CounterState { count })
                .ok_or_else(|| "counter overflow".to_string()),
            CounterAction::Set { value } => Ok(CounterState { count: value }),
        }
    }
}

/// `INCREMENT` action in the global scope
pub fn increment(by: i64) -> Action {
    Action::new("INCREMENT", json!({ "by": by }), GLOBAL_SCOPE)
}

/// `SET` action in the global scope
pub fn set_counter(value: i64) -> Action {
    Action::new("SET", json!({ "value": value }), GLOBAL_SCOPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let op = OperationBuilder::new(3).build();
        assert_eq!(op.id, "op-3-0");
        assert_eq!(op.position(), (3, 0));
        assert_eq!(op.timestamp_utc_ms, 1030);
        assert_eq!(op.scope(), GLOBAL_SCOPE);
        assert_eq!(op.action.input, json!({"id": "op-3-0"}));
    }

    #[test]
    fn test_noop_builder() {
        let op = OperationBuilder::new(2).skip(1).noop().build();
        assert!(op.is_noop());
        assert_eq!(op.action.input, Value::Null);
    }

    #[test]
    fn test_counter_model_applies_actions() {
        let model = CounterModel;
        let state = model.apply("global", CounterState::default(), CounterAction::Increment { by: 2 }).unwrap();
        let state = model.apply("global", state, CounterAction::Set { value: 9 }).unwrap();
        assert_eq!(state.count, 9);
        assert!(model.apply("global", CounterState { count: i64::MAX }, CounterAction::Increment { by: 1 }).is_err());
    }
}
