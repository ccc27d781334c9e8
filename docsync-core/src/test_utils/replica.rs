//! In-process replicas for sync tests
//!
//! A [`Replica`] bundles a store, a reactor with its loop running and a
//! sync manager on one event bus. [`link`] joins two replicas over a pair
//! of in-memory channels.

use super::fixtures::CounterModel;
use crate::abort::AbortSignal;
use crate::config::{ReactorConfig, SyncConfig};
use crate::core_reactor::{DocumentModelRegistry, Reactor, ReactorResult};
use crate::core_store::{InMemoryCursorStore, InMemoryStore, OperationStore};
use crate::core_sync::{InMemoryChannel, Remote, SyncManager, SyncResult};
use crate::events::EventBus;
use std::sync::Arc;
use std::time::Duration;

pub struct Replica {
    pub name: String,
    pub store: Arc<InMemoryStore>,
    pub cursors: Arc<InMemoryCursorStore>,
    pub bus: Arc<EventBus>,
    pub reactor: Arc<Reactor>,
    pub sync: SyncManager,
}

/// Fast settings for tests: short job timeout and retry backoff
pub fn test_configs() -> (ReactorConfig, SyncConfig) {
    let reactor = ReactorConfig { job_timeout: Duration::from_secs(5), ..Default::default() };
    let sync = SyncConfig { retry_backoff: Duration::from_millis(5), ..Default::default() };
    (reactor, sync)
}

impl Replica {
    /// Replica with the counter model registered; nothing is running yet
    pub fn new(name: &str, reactor_config: ReactorConfig, sync_config: SyncConfig) -> ReactorResult<Self> {
        let registry = Arc::new(DocumentModelRegistry::new().with_model(CounterModel)?);
        let store = Arc::new(InMemoryStore::new());
        let cursors = Arc::new(InMemoryCursorStore::new());
        let bus = EventBus::new(1024);
        let reactor = Arc::new(Reactor::new(reactor_config, registry, store.clone(), bus.clone()));
        let sync = SyncManager::new(sync_config, reactor.clone(), store.clone(), cursors.clone(), bus.clone());

        Ok(Replica { name: name.to_string(), store, cursors, bus, reactor, sync })
    }

    pub fn with_test_config(name: &str) -> ReactorResult<Self> {
        let (reactor, sync) = test_configs();
        Self::new(name, reactor, sync)
    }

    /// Start the reactor loop and the sync workers
    pub fn start(&self) -> SyncResult<()> {
        self.reactor.start()?;
        self.sync.start()
    }

    pub async fn stop(&self) -> SyncResult<()> {
        self.sync.shutdown().await?;
        self.reactor.kill().await?;
        Ok(())
    }

    /// Operations held in the store, 0 if the store cannot be read
    pub async fn operation_count(&self) -> usize {
        self.store.count(&AbortSignal::never()).await.unwrap_or(0)
    }
}

/// Connect two replicas both ways on `collection_id`; each side names the
/// remote after its peer
pub async fn link(a: &Replica, b: &Replica, collection_id: &str) -> SyncResult<(Arc<InMemoryChannel>, Arc<InMemoryChannel>)> {
    let (to_b, to_a) = InMemoryChannel::pair();
    a.sync.add(Remote::new(&b.name, collection_id, to_b.clone())).await?;
    b.sync.add(Remote::new(&a.name, collection_id, to_a.clone())).await?;
    Ok((to_b, to_a))
}
