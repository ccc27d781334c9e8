/*
    operation.rs - Operations and the actions they carry

    An operation is the immutable record of one applied action at a
    position (index, skip) within a (document, scope, branch) sequence.
    Its id is derived from the action, so every replica computes the same
    id for the same action without a central allocator.
*/

use super::errors::OpLogResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Action type of an operation that changes nothing but may carry a skip
pub const NOOP: &str = "NOOP";

/// Scope holding document lifecycle and relationship operations
pub const DOCUMENT_SCOPE: &str = "document";

/// Default shared scope
pub const GLOBAL_SCOPE: &str = "global";

/// Replica-private scope
pub const LOCAL_SCOPE: &str = "local";

/// Milliseconds since the UNIX epoch, or 0 if the clock is before it
pub fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Command payload applied by a reducer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,

    #[serde(rename = "type")]
    pub action_type: String,

    #[serde(default)]
    pub input: Value,

    pub scope: String,

    pub timestamp_utc_ms: u64,
}

impl Action {
    pub fn new(action_type: impl Into<String>, input: Value, scope: impl Into<String>) -> Self {
        Action {
            id: Uuid::new_v4().to_string(),
            action_type: action_type.into(),
            input,
            scope: scope.into(),
            timestamp_utc_ms: now_millis(),
        }
    }

    pub fn noop(scope: impl Into<String>) -> Self {
        Self::new(NOOP, Value::Null, scope)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp_utc_ms: u64) -> Self {
        self.timestamp_utc_ms = timestamp_utc_ms;
        self
    }

    pub fn is_noop(&self) -> bool {
        self.action_type == NOOP
    }
}

/// One committed entry of an operation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,

    /// Position within the (scope, branch) sequence
    pub index: u64,

    /// Number of immediately preceding operations this one invalidates
    pub skip: u64,

    /// Hash of the scope state after applying this operation
    pub hash: String,

    pub timestamp_utc_ms: u64,

    pub action: Action,

    /// Serialized scope state after this operation, used as a replay checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resulting_state: Option<String>,
}

impl Operation {
    pub fn scope(&self) -> &str {
        &self.action.scope
    }

    pub fn action_type(&self) -> &str {
        &self.action.action_type
    }

    pub fn is_noop(&self) -> bool {
        self.action.is_noop()
    }

    /// (index, skip) position key
    pub fn position(&self) -> (u64, u64) {
        (self.index, self.skip)
    }
}

/// Where a committed operation lives and where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationContext {
    pub document_id: String,
    pub document_type: String,
    pub scope: String,
    pub branch: String,

    /// Commit position in the local store (0 before commit)
    #[serde(default)]
    pub ordinal: u64,

    /// Remote the operation was received from; empty when it originated locally
    #[serde(default)]
    pub source_remote: String,
}

/// An operation together with its routing context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationWithContext {
    pub operation: Operation,
    pub context: OperationContext,
}

/// Deterministic operation id for an action applied to a document scope
pub fn derive_operation_id(document_id: &str, scope: &str, branch: &str, action_id: &str) -> String {
    let name = format!("{}/{}/{}/{}", document_id, scope, branch, action_id);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// BLAKE3 hash of the canonical JSON encoding of a scope state
pub fn hash_state(state: &Value) -> OpLogResult<String> {
    let bytes = serde_json::to_vec(state)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_id_is_deterministic() {
        let a = derive_operation_id("doc-1", "global", "main", "action-1");
        let b = derive_operation_id("doc-1", "global", "main", "action-1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_operation_id_depends_on_every_component() {
        let base = derive_operation_id("doc-1", "global", "main", "action-1");
        assert_ne!(base, derive_operation_id("doc-2", "global", "main", "action-1"));
        assert_ne!(base, derive_operation_id("doc-1", "local", "main", "action-1"));
        assert_ne!(base, derive_operation_id("doc-1", "global", "draft", "action-1"));
        assert_ne!(base, derive_operation_id("doc-1", "global", "main", "action-2"));
    }

    #[test]
    fn test_hash_state_ignores_key_insertion_order() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(hash_state(&a).unwrap(), hash_state(&b).unwrap());
        assert_ne!(hash_state(&a).unwrap(), hash_state(&json!({"a": 2, "b": 1})).unwrap());
    }

    #[test]
    fn test_action_serializes_type_field() {
        let action = Action::new("INCREMENT", json!({"by": 2}), GLOBAL_SCOPE).with_id("a1");
        let encoded = serde_json::to_value(&action).unwrap();
        assert_eq!(encoded["type"], "INCREMENT");
        assert_eq!(encoded["id"], "a1");
        assert!(encoded.get("timestampUtcMs").is_some());
    }

    #[test]
    fn test_noop_action() {
        let action = Action::noop("global");
        assert!(action.is_noop());
        assert_eq!(action.input, Value::Null);
    }
}
