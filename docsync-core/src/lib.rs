//! docsync - multi-writer document sync engine
//!
//! Documents are append-only operation logs, one per (document, scope,
//! branch). Writes go through the [`core_reactor::Reactor`] as queued jobs;
//! replicas exchange committed operations through the
//! [`core_sync::SyncManager`] and reconcile divergent histories with the
//! merge in [`core_oplog`].

pub mod abort;
pub mod config;
pub mod core_oplog;
pub mod core_queue;
pub mod core_reactor;
pub mod core_store;
pub mod core_sync;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod test_utils;
pub mod tracing;

pub use config::{Config, ConfigError};
pub use core_reactor::{DocumentModel, DocumentModelRegistry, Reactor, ReactorError};
pub use core_sync::{Remote, SyncError, SyncManager};
pub use events::{EventBus, EventType, ReactorEvent};
pub use logging::{init_logging, LogLevel};
