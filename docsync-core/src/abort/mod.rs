//! Cancellation for read paths and background loops
//!
//! An [`AbortController`] owns the right to abort; any number of
//! [`AbortSignal`]s observe it. Checking an already-aborted signal fails
//! immediately, even on paths that never suspend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Notify;

/// Returned by [`AbortSignal::check`] once the controller has aborted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Operation aborted: {reason}")]
pub struct AbortedError {
    pub reason: String,
}

#[derive(Debug, Default)]
struct AbortState {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

/// Owner side of an abort signal
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    state: Arc<AbortState>,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal observing this controller
    pub fn signal(&self) -> AbortSignal {
        AbortSignal { state: Some(self.state.clone()) }
    }

    /// Abort every signal. Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.state.reason.lock() {
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.state.aborted.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }
}

/// Observer side of an abort signal
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    state: Option<Arc<AbortState>>,
}

impl AbortSignal {
    /// A signal that never aborts
    pub fn never() -> Self {
        AbortSignal { state: None }
    }

    pub fn is_aborted(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.aborted.load(Ordering::SeqCst))
    }

    pub fn reason(&self) -> Option<String> {
        let state = self.state.as_ref()?;
        state.reason.lock().ok().and_then(|slot| slot.clone())
    }

    /// Fail with [`AbortedError`] if the signal has fired
    pub fn check(&self) -> Result<(), AbortedError> {
        if self.is_aborted() {
            Err(AbortedError { reason: self.reason().unwrap_or_else(|| "aborted".to_string()) })
        } else {
            Ok(())
        }
    }

    /// Resolve once the signal fires; pending forever for [`AbortSignal::never`]
    pub async fn aborted(&self) {
        let Some(state) = &self.state else {
            std::future::pending::<()>().await;
            return;
        };

        loop {
            let notified = state.notify.notified();
            if state.aborted.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}
