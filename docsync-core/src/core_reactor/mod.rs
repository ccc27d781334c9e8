/*
    core_reactor - Write orchestration

    Handles:
    - Document model registry and the built-in document scope model
    - Splitting requests into per-scope jobs
    - Executing jobs into atomic commits (mutations, loads, merges)
    - Job lifecycle events on the event bus
*/

pub mod errors;
pub mod executor;
pub mod reactor;
pub mod registry;

#[cfg(test)]
pub mod tests;

pub use errors::{ReactorError, ReactorResult};
pub use executor::JobExecutor;
pub use reactor::{DocumentSnapshot, JobReceipt, LoadRequest, MutationRequest, Reactor};
pub use registry::{
    add_relationship_action, create_document_action, remove_relationship_action, DocumentModel,
    DocumentModelRegistry, DocumentScopeAction, DocumentScopeModel, DocumentScopeState, RegisteredModel,
    ADD_RELATIONSHIP, CREATE_DOCUMENT, DELETE_DOCUMENT, REMOVE_RELATIONSHIP, UNDO,
};
