//! What the sync manager needs from the reactor

use crate::core_queue::JobInfo;
use crate::core_reactor::{JobReceipt, LoadRequest, Reactor, ReactorResult};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait ReactorClient: Send + Sync {
    /// Queue received operations for local application
    async fn load(&self, request: LoadRequest) -> ReactorResult<JobReceipt>;

    /// Wait for a job's terminal state; `None` uses the reactor's default
    async fn wait_for_job(&self, job_id: &str, timeout: Option<Duration>) -> ReactorResult<JobInfo>;
}

#[async_trait]
impl ReactorClient for Reactor {
    async fn load(&self, request: LoadRequest) -> ReactorResult<JobReceipt> {
        Reactor::load(self, request).await
    }

    async fn wait_for_job(&self, job_id: &str, timeout: Option<Duration>) -> ReactorResult<JobInfo> {
        Reactor::wait_for_job(self, job_id, timeout).await
    }
}
