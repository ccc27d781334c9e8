//! Async test helpers
//!
//! Utilities for waiting on asynchronous replicas: bounded receives,
//! polling until a condition holds, and waiting for a value to stop
//! changing.

use std::future::Future;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration, Instant};

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for tests that should fail fast (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Polling interval of [`wait_until`] and [`wait_for_quiet`]
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

impl std::fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvTimeoutError::Timeout => write!(f, "receive operation timed out"),
            RecvTimeoutError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}

/// Receive the next broadcast value that matches `predicate`, skipping
/// others and tolerating lag
pub async fn recv_matching<T, P>(
    rx: &mut broadcast::Receiver<T>,
    duration: Duration,
    mut predicate: P,
) -> Result<T, RecvTimeoutError>
where
    T: Clone,
    P: FnMut(&T) -> bool,
{
    let deadline = Instant::now() + duration;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, rx.recv()).await {
            Err(_) => return Err(RecvTimeoutError::Timeout),
            Ok(Ok(value)) if predicate(&value) => return Ok(value),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => return Err(RecvTimeoutError::Closed),
        }
    }
}

/// Poll `condition` until it returns true; false if `duration` elapses first
pub async fn wait_until<F, Fut>(duration: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + duration;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Wait until `sample` returns the same value for a full `quiet` period.
/// Returns the stable value, or `None` if it kept changing for `duration`.
pub async fn wait_for_quiet<F, Fut, T>(quiet: Duration, duration: Duration, mut sample: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    T: PartialEq,
{
    let deadline = Instant::now() + duration;
    let mut last = sample().await;
    let mut stable_since = Instant::now();

    while Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
        let current = sample().await;
        if current != last {
            last = current;
            stable_since = Instant::now();
        } else if stable_since.elapsed() >= quiet {
            return Some(last);
        }
    }
    None
}

/// Helper to assert a future completes within duration
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}
