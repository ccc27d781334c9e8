/*
    mailbox.rs - Ordered envelope holder with add notifications

    Outboxes, inboxes and dead-letter lanes are all mailboxes. Listeners
    registered with `on_added` run synchronously after each add, outside
    the mailbox lock, so a listener may read the mailbox it observes.
*/

use super::envelope::SyncEnvelope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

type Listener = Arc<dyn Fn(&SyncEnvelope) + Send + Sync>;

#[derive(Default)]
pub struct Mailbox {
    items: RwLock<Vec<SyncEnvelope>>,
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

impl Mailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, envelope: SyncEnvelope) {
        match self.items.write() {
            Ok(mut items) => items.push(envelope.clone()),
            Err(poisoned) => poisoned.into_inner().push(envelope.clone()),
        }

        let listeners: Vec<Listener> = match self.listeners.read() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|(_, l)| l.clone()).collect(),
        };
        for listener in listeners {
            listener(&envelope);
        }
    }

    pub fn remove(&self, envelope_id: &str) -> Option<SyncEnvelope> {
        let mut items = match self.items.write() {
            Ok(items) => items,
            Err(poisoned) => poisoned.into_inner(),
        };
        let position = items.iter().position(|e| e.id == envelope_id)?;
        Some(items.remove(position))
    }

    /// Oldest envelope
    pub fn front(&self) -> Option<SyncEnvelope> {
        self.read(|items| items.first().cloned())
    }

    pub fn items(&self) -> Vec<SyncEnvelope> {
        self.read(|items| items.to_vec())
    }

    pub fn len(&self) -> usize {
        self.read(|items| items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operations across all envelopes
    pub fn operation_count(&self) -> usize {
        self.read(|items| items.iter().map(SyncEnvelope::len).sum())
    }

    /// Remove and return everything
    pub fn drain(&self) -> Vec<SyncEnvelope> {
        match self.items.write() {
            Ok(mut items) => std::mem::take(&mut *items),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Run `listener` after every add until the subscription is dropped
    /// by `unsubscribe`
    pub fn on_added<F>(self: &Arc<Self>, listener: F) -> MailboxSubscription
    where
        F: Fn(&SyncEnvelope) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push((id, Arc::new(listener))),
            Err(poisoned) => poisoned.into_inner().push((id, Arc::new(listener))),
        }
        MailboxSubscription { mailbox: Arc::downgrade(self), id }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    fn read<T>(&self, f: impl FnOnce(&[SyncEnvelope]) -> T) -> T {
        match self.items.read() {
            Ok(items) => f(&items),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn remove_listener(&self, id: u64) {
        let mut listeners = match self.listeners.write() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.retain(|(listener_id, _)| *listener_id != id);
    }
}

#[derive(Debug)]
pub struct MailboxSubscription {
    mailbox: Weak<Mailbox>,
    id: u64,
}

impl MailboxSubscription {
    pub fn unsubscribe(&self) {
        if let Some(mailbox) = self.mailbox.upgrade() {
            mailbox.remove_listener(self.id);
        }
    }
}
