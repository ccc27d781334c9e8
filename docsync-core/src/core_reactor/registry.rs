/*
    registry.rs - Document models and the registry that resolves them

    A document model is a pure reducer over a typed state with a typed
    action enum. Actions travel through the log as `{type, input}` JSON;
    the registry decodes them at the boundary so an action that does not
    fit its model never reaches the log.

    The `document` scope of every document type is reduced by the built-in
    `DocumentScopeModel`, which tracks lifecycle and relationships.
*/

use super::errors::{ReactorError, ReactorResult};
use crate::core_oplog::{Action, OpLogError, OpLogResult, Reducer, DOCUMENT_SCOPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Request-level action turned into a NOOP carrying the undo skip
pub const UNDO: &str = "UNDO";

pub const CREATE_DOCUMENT: &str = "CREATE_DOCUMENT";
pub const ADD_RELATIONSHIP: &str = "ADD_RELATIONSHIP";
pub const REMOVE_RELATIONSHIP: &str = "REMOVE_RELATIONSHIP";
pub const DELETE_DOCUMENT: &str = "DELETE_DOCUMENT";

/// Typed reducer for one document type.
///
/// `Action` is expected to be an adjacently tagged enum
/// (`#[serde(tag = "type", content = "input")]`).
pub trait DocumentModel: Send + Sync + 'static {
    type State: Serialize + DeserializeOwned + Default;
    type Action: DeserializeOwned;

    fn document_type(&self) -> &'static str;

    /// Pure state transition
    fn apply(&self, scope: &str, state: Self::State, action: Self::Action) -> Result<Self::State, String>;
}

fn action_envelope(action: &Action) -> Value {
    let mut envelope = Map::new();
    envelope.insert("type".to_string(), Value::String(action.action_type.clone()));
    if !action.input.is_null() {
        envelope.insert("input".to_string(), action.input.clone());
    }
    Value::Object(envelope)
}

fn decode_action<A: DeserializeOwned>(action: &Action) -> Result<A, String> {
    serde_json::from_value(action_envelope(action)).map_err(|e| e.to_string())
}

impl<M: DocumentModel> Reducer for M {
    fn initial_state(&self, _scope: &str) -> Value {
        serde_json::to_value(M::State::default()).unwrap_or(Value::Null)
    }

    fn reduce(&self, scope: &str, state: &Value, action: &Action) -> OpLogResult<Value> {
        let reducer_error = |reason: String| OpLogError::Reducer {
            action_type: action.action_type.clone(),
            reason,
        };

        let current: M::State = if state.is_null() {
            M::State::default()
        } else {
            serde_json::from_value(state.clone())?
        };
        let typed = decode_action::<M::Action>(action).map_err(reducer_error)?;
        let next = self.apply(scope, current, typed).map_err(reducer_error)?;
        Ok(serde_json::to_value(next)?)
    }
}

/// Object-safe view of a registered model
pub trait RegisteredModel: Reducer {
    fn model_type(&self) -> &'static str;

    /// Decode the action without applying it
    fn validate_action(&self, action: &Action) -> Result<(), String>;

    fn as_reducer(&self) -> &dyn Reducer;
}

impl<M: DocumentModel> RegisteredModel for M {
    fn model_type(&self) -> &'static str {
        self.document_type()
    }

    fn validate_action(&self, action: &Action) -> Result<(), String> {
        decode_action::<M::Action>(action).map(|_| ())
    }

    fn as_reducer(&self) -> &dyn Reducer {
        self
    }
}

/// Models by document type, built once at startup and shared by `Arc`
pub struct DocumentModelRegistry {
    models: HashMap<String, Arc<dyn RegisteredModel>>,
    system: Arc<dyn RegisteredModel>,
}

impl Default for DocumentModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentModelRegistry {
    pub fn new() -> Self {
        DocumentModelRegistry { models: HashMap::new(), system: Arc::new(DocumentScopeModel) }
    }

    pub fn register<M: DocumentModel>(&mut self, model: M) -> ReactorResult<()> {
        let document_type = model.document_type();
        if self.models.contains_key(document_type) {
            return Err(ReactorError::DuplicateDocumentType(document_type.to_string()));
        }
        self.models.insert(document_type.to_string(), Arc::new(model));
        Ok(())
    }

    pub fn with_model<M: DocumentModel>(mut self, model: M) -> ReactorResult<Self> {
        self.register(model)?;
        Ok(self)
    }

    pub fn get(&self, document_type: &str) -> ReactorResult<Arc<dyn RegisteredModel>> {
        self.models
            .get(document_type)
            .cloned()
            .ok_or_else(|| ReactorError::UnknownDocumentType(document_type.to_string()))
    }

    pub fn contains(&self, document_type: &str) -> bool {
        self.models.contains_key(document_type)
    }

    /// Model reducing `scope` of documents of `document_type`
    pub fn reducer_for(&self, document_type: &str, scope: &str) -> ReactorResult<Arc<dyn RegisteredModel>> {
        let model = self.get(document_type)?;
        if scope == DOCUMENT_SCOPE {
            Ok(self.system.clone())
        } else {
            Ok(model)
        }
    }

    /// Reject an action that does not decode for its scope's model
    pub fn validate_action(&self, document_type: &str, action: &Action) -> ReactorResult<()> {
        if action.is_noop() || action.action_type == UNDO {
            return Ok(());
        }
        let model = self.reducer_for(document_type, &action.scope)?;
        model.validate_action(action).map_err(|reason| ReactorError::InvalidAction {
            action_type: action.action_type.clone(),
            reason,
        })
    }

    pub fn document_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.models.keys().cloned().collect();
        types.sort();
        types
    }
}

/// State of the `document` scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentScopeState {
    pub document_type: Option<String>,
    pub created: bool,
    pub deleted: bool,
    pub parent_id: Option<String>,
    pub children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "input", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentScopeAction {
    CreateDocument {
        #[serde(rename = "documentType")]
        document_type: String,
        #[serde(rename = "parentId", default)]
        parent_id: Option<String>,
    },
    AddRelationship {
        #[serde(rename = "childId")]
        child_id: String,
    },
    RemoveRelationship {
        #[serde(rename = "childId")]
        child_id: String,
    },
    DeleteDocument,
}

impl DocumentScopeAction {
    pub fn decode(action: &Action) -> Result<Self, String> {
        decode_action(action)
    }
}

/// Built-in reducer of the `document` scope
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentScopeModel;

impl DocumentModel for DocumentScopeModel {
    type State = DocumentScopeState;
    type Action = DocumentScopeAction;

    fn document_type(&self) -> &'static str {
        "system/document"
    }

    fn apply(&self, _scope: &str, mut state: DocumentScopeState, action: DocumentScopeAction) -> Result<DocumentScopeState, String> {
        if let DocumentScopeAction::CreateDocument { document_type, parent_id } = action {
            if state.created {
                return Err("document already created".to_string());
            }
            state.created = true;
            state.document_type = Some(document_type);
            state.parent_id = parent_id;
            return Ok(state);
        }

        if !state.created {
            return Err("document not created".to_string());
        }
        if state.deleted {
            return Err("document deleted".to_string());
        }

        match action {
            DocumentScopeAction::AddRelationship { child_id } => {
                if !state.children.contains(&child_id) {
                    state.children.push(child_id);
                }
            }
            DocumentScopeAction::RemoveRelationship { child_id } => {
                state.children.retain(|child| *child != child_id);
            }
            DocumentScopeAction::DeleteDocument => state.deleted = true,
            DocumentScopeAction::CreateDocument { .. } => {}
        }
        Ok(state)
    }
}

/// `CREATE_DOCUMENT` action
pub fn create_document_action(document_type: &str, parent_id: Option<&str>) -> Action {
    Action::new(
        CREATE_DOCUMENT,
        json!({ "documentType": document_type, "parentId": parent_id }),
        DOCUMENT_SCOPE,
    )
}

/// `ADD_RELATIONSHIP` action on the parent
pub fn add_relationship_action(child_id: &str) -> Action {
    Action::new(ADD_RELATIONSHIP, json!({ "childId": child_id }), DOCUMENT_SCOPE)
}

/// `REMOVE_RELATIONSHIP` action on the parent
pub fn remove_relationship_action(child_id: &str) -> Action {
    Action::new(REMOVE_RELATIONSHIP, json!({ "childId": child_id }), DOCUMENT_SCOPE)
}
