/*
    channel.rs - Transport between two replicas

    A channel pushes envelopes to its peer and exposes the inbox the peer
    pushes into. Delivery is at-least-once; the receiving executor drops
    operations it already holds.
*/

use super::envelope::SyncEnvelope;
use super::errors::{handle_poison, SyncError, SyncResult};
use super::mailbox::Mailbox;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

#[async_trait]
pub trait SyncChannel: Send + Sync {
    /// Push an envelope to the peer
    async fn send(&self, envelope: SyncEnvelope) -> SyncResult<()>;

    /// Envelopes received from the peer
    fn inbox(&self) -> Arc<Mailbox>;
}

/// In-process channel end; two ends are joined with [`connect_in_memory`]
#[derive(Default)]
pub struct InMemoryChannel {
    inbox: Arc<Mailbox>,
    peer_inbox: RwLock<Option<Weak<Mailbox>>>,
    fail_next: AtomicU32,
    sent: AtomicU64,
}

impl InMemoryChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Two connected ends
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let (a, b) = (Self::new(), Self::new());
        connect_in_memory(&a, &b);
        (a, b)
    }

    /// Fail the next `count` sends with a transport error
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Envelopes handed to the peer so far
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    /// Drop the link; sends fail until reconnected
    pub fn disconnect(&self) {
        if let Ok(mut peer) = self.peer_inbox.write() {
            *peer = None;
        }
    }

    fn connect_to(&self, peer: &InMemoryChannel) {
        if let Ok(mut slot) = self.peer_inbox.write() {
            *slot = Some(Arc::downgrade(&peer.inbox));
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SyncChannel for InMemoryChannel {
    async fn send(&self, envelope: SyncEnvelope) -> SyncResult<()> {
        if self.take_injected_failure() {
            return Err(SyncError::Channel("injected transport failure".to_string()));
        }

        let peer = self
            .peer_inbox
            .read()
            .map_err(handle_poison)?
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| SyncError::Channel("channel not connected".to_string()))?;

        peer.add(envelope);
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn inbox(&self) -> Arc<Mailbox> {
        self.inbox.clone()
    }
}

/// Join two ends so each one's sends land in the other's inbox
pub fn connect_in_memory(a: &InMemoryChannel, b: &InMemoryChannel) {
    a.connect_to(b);
    b.connect_to(a);
}
