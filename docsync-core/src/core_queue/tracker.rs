/*
    tracker.rs - Job status after submission

    The queue forgets a job once it is dequeued; the tracker keeps its
    status so callers can poll or await the terminal state.
*/

use super::errors::{handle_poison, QueueError, QueueResult};
use super::job::Job;
use crate::core_oplog::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    WriteReady,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::WriteReady | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    pub document_id: String,
    pub status: JobStatus,

    /// Last error of a failed job
    pub error: Option<String>,

    pub error_history: Vec<String>,

    /// Operations committed by the job
    pub operation_count: usize,

    /// Failed because the loaded operations start past the end of local
    /// history; loading the missing operations first lets it succeed
    #[serde(default)]
    pub out_of_order: bool,

    pub meta: Value,
    pub updated_at_utc_ms: u64,
}

#[derive(Default)]
pub struct JobTracker {
    jobs: RwLock<HashMap<String, watch::Sender<JobInfo>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: &Job) -> QueueResult<()> {
        let info = JobInfo {
            id: job.id.clone(),
            document_id: job.document_id.clone(),
            status: JobStatus::Pending,
            error: None,
            error_history: Vec::new(),
            operation_count: 0,
            out_of_order: false,
            meta: job.meta.clone(),
            updated_at_utc_ms: now_millis(),
        };
        let (tx, _rx) = watch::channel(info);
        self.jobs.write().map_err(handle_poison)?.insert(job.id.clone(), tx);
        Ok(())
    }

    pub fn mark_running(&self, job_id: &str) -> QueueResult<()> {
        self.update(job_id, |info| info.status = JobStatus::Running)
    }

    /// Record an execution error that will be retried
    pub fn record_retry(&self, job_id: &str, error: &str) -> QueueResult<()> {
        self.update(job_id, |info| {
            info.status = JobStatus::Pending;
            info.error_history.push(error.to_string());
        })
    }

    pub fn mark_write_ready(&self, job_id: &str, operation_count: usize) -> QueueResult<()> {
        self.update(job_id, |info| {
            info.status = JobStatus::WriteReady;
            info.operation_count = operation_count;
        })
    }

    pub fn mark_failed(&self, job_id: &str, error: &str) -> QueueResult<()> {
        self.update(job_id, |info| {
            info.status = JobStatus::Failed;
            info.error = Some(error.to_string());
            info.error_history.push(error.to_string());
        })
    }

    /// Fail a load that arrived ahead of operations it builds on
    pub fn mark_out_of_order(&self, job_id: &str, error: &str) -> QueueResult<()> {
        self.update(job_id, |info| {
            info.status = JobStatus::Failed;
            info.out_of_order = true;
            info.error = Some(error.to_string());
            info.error_history.push(error.to_string());
        })
    }

    pub fn get(&self, job_id: &str) -> QueueResult<Option<JobInfo>> {
        let jobs = self.jobs.read().map_err(handle_poison)?;
        Ok(jobs.get(job_id).map(|tx| tx.borrow().clone()))
    }

    /// Wait until the job is `WriteReady` or `Failed`
    pub async fn wait(&self, job_id: &str, timeout: Duration) -> QueueResult<JobInfo> {
        let mut rx = {
            let jobs = self.jobs.read().map_err(handle_poison)?;
            jobs.get(job_id).ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?.subscribe()
        };

        let waited = tokio::time::timeout(timeout, rx.wait_for(|info| info.status.is_terminal())).await;
        match waited {
            Ok(Ok(info)) => Ok(info.clone()),
            Ok(Err(_)) => Err(QueueError::JobNotFound(job_id.to_string())),
            Err(_) => Err(QueueError::Timeout(job_id.to_string())),
        }
    }

    /// Forget terminal jobs; returns how many were dropped
    pub fn prune_terminal(&self) -> QueueResult<usize> {
        let mut jobs = self.jobs.write().map_err(handle_poison)?;
        let before = jobs.len();
        jobs.retain(|_, tx| !tx.borrow().status.is_terminal());
        Ok(before - jobs.len())
    }

    fn update<F>(&self, job_id: &str, change: F) -> QueueResult<()>
    where
        F: FnOnce(&mut JobInfo),
    {
        let jobs = self.jobs.read().map_err(handle_poison)?;
        let tx = jobs.get(job_id).ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        tx.send_modify(|info| {
            change(info);
            info.updated_at_utc_ms = now_millis();
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn job(id: &str) -> Job {
        Job::mutation("doc", "test/counter", "global", "main", vec![]).with_id(id)
    }

    #[test]
    fn test_status_transitions() {
        let tracker = JobTracker::new();
        tracker.register(&job("j1")).unwrap();
        assert_eq!(tracker.get("j1").unwrap().unwrap().status, JobStatus::Pending);

        tracker.mark_running("j1").unwrap();
        tracker.record_retry("j1", "first").unwrap();
        tracker.mark_failed("j1", "second").unwrap();

        let info = tracker.get("j1").unwrap().unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert_eq!(info.error.as_deref(), Some("second"));
        assert_eq!(info.error_history, vec!["first", "second"]);
    }

    #[test]
    fn test_out_of_order_is_terminal_and_flagged() {
        let tracker = JobTracker::new();
        tracker.register(&job("j1")).unwrap();
        tracker.mark_running("j1").unwrap();
        tracker.mark_out_of_order("j1", "gap").unwrap();

        let info = tracker.get("j1").unwrap().unwrap();
        assert!(info.status.is_terminal());
        assert!(info.out_of_order);
        assert_eq!(info.error.as_deref(), Some("gap"));
    }

    #[test]
    fn test_unknown_job() {
        let tracker = JobTracker::new();
        assert!(tracker.get("nope").unwrap().is_none());
        assert!(matches!(tracker.mark_running("nope"), Err(QueueError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_wait_returns_terminal_state() {
        let tracker = Arc::new(JobTracker::new());
        tracker.register(&job("j1")).unwrap();

        let writer = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.mark_running("j1").unwrap();
            writer.mark_write_ready("j1", 3).unwrap();
        });

        let info = tracker.wait("j1", Duration::from_secs(5)).await.unwrap();
        assert_eq!(info.status, JobStatus::WriteReady);
        assert_eq!(info.operation_count, 3);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let tracker = JobTracker::new();
        tracker.register(&job("j1")).unwrap();
        let err = tracker.wait("j1", Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, QueueError::Timeout("j1".to_string()));
    }

    #[test]
    fn test_prune_keeps_live_jobs() {
        let tracker = JobTracker::new();
        tracker.register(&job("done")).unwrap();
        tracker.register(&job("live")).unwrap();
        tracker.mark_write_ready("done", 0).unwrap();

        assert_eq!(tracker.prune_terminal().unwrap(), 1);
        assert!(tracker.get("live").unwrap().is_some());
    }
}
