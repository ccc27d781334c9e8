/*
    queue.rs - Dependency-aware job queue

    One FIFO per (document, scope, branch). A queue's head is handed out
    only when every job named in its queue hint has completed and no other
    job of the same queue is in flight. A blocked head is never skipped
    within its own queue; other queues proceed independently.

    The queue is never locked across an await: callers dequeue, execute,
    then report completion or failure.
*/

use super::errors::{handle_poison, QueueError, QueueResult};
use super::job::{Job, QueueKey};
use crate::events::{EventBus, ReactorEvent};
use crate::metrics::{self, QUEUE_DEPTH, QUEUE_JOBS_ENQUEUED, QUEUE_JOBS_REJECTED};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

type DrainCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct QueueState {
    /// Pending jobs with their global enqueue sequence
    queues: HashMap<QueueKey, VecDeque<(u64, Job)>>,
    /// Running jobs with their queue and original enqueue sequence
    in_flight: HashMap<String, (QueueKey, u64)>,
    completed: HashSet<String>,
    blocked: bool,
    on_drained: Vec<DrainCallback>,
    next_seq: u64,
}

impl QueueState {
    fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    fn is_drained(&self) -> bool {
        self.in_flight.is_empty() && self.queues.values().all(VecDeque::is_empty)
    }

    fn contains(&self, job_id: &str) -> bool {
        self.in_flight.contains_key(job_id)
            || self.queues.values().any(|queue| queue.iter().any(|(_, job)| job.id == job_id))
    }

    fn head_ready(&self, key: &QueueKey) -> Option<u64> {
        if self.in_flight.values().any(|(running, _)| running == key) {
            return None;
        }
        let (seq, head) = self.queues.get(key)?.front()?;
        head.queue_hint.iter().all(|dep| self.completed.contains(dep)).then_some(*seq)
    }

    fn take_head(&mut self, key: &QueueKey) -> Option<Job> {
        let queue = self.queues.get_mut(key)?;
        let (seq, job) = queue.pop_front()?;
        if queue.is_empty() {
            self.queues.remove(key);
        }
        self.in_flight.insert(job.id.clone(), (key.clone(), seq));
        Some(job)
    }

    /// Callbacks to run once the lock is released
    fn drained_callbacks(&mut self) -> Vec<DrainCallback> {
        if self.blocked && self.is_drained() {
            std::mem::take(&mut self.on_drained)
        } else {
            Vec::new()
        }
    }
}

/// Per-key FIFO scheduler with cross-queue dependencies
pub struct JobQueue {
    state: Mutex<QueueState>,
    bus: Option<Arc<EventBus>>,

    /// 0 means unbounded
    max_pending_per_queue: usize,
}

impl JobQueue {
    pub fn new(bus: Option<Arc<EventBus>>, max_pending_per_queue: usize) -> Self {
        JobQueue { state: Mutex::new(QueueState::default()), bus, max_pending_per_queue }
    }

    /// Append a job to its queue and announce it
    pub fn enqueue(&self, job: Job) -> QueueResult<()> {
        let key = job.key();
        let job_id = job.id.clone();

        let depth = {
            let mut state = self.state.lock().map_err(handle_poison)?;

            if state.blocked {
                metrics::record_counter(QUEUE_JOBS_REJECTED, 1);
                return Err(QueueError::QueueBlocked);
            }
            if state.contains(&job.id) {
                return Err(QueueError::DuplicateJob(job.id));
            }

            let queued = state.queues.get(&key).map(VecDeque::len).unwrap_or(0);
            if self.max_pending_per_queue > 0 && queued >= self.max_pending_per_queue {
                metrics::record_counter(QUEUE_JOBS_REJECTED, 1);
                return Err(QueueError::QueueFull { key: key.to_string(), limit: self.max_pending_per_queue });
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.queues.entry(key.clone()).or_default().push_back((seq, job));
            state.pending()
        };

        tracing::debug!(job_id = %job_id, queue = %key, depth, "Job enqueued");
        metrics::record_counter(QUEUE_JOBS_ENQUEUED, 1);
        metrics::record_gauge(QUEUE_DEPTH, depth as f64);
        self.announce(&job_id, key);
        Ok(())
    }

    /// Put a failed job back at the head of its queue with its original
    /// sequence, so it keeps its place in oldest-first order.
    ///
    /// Allowed while blocked so that draining waits for the retry.
    pub fn retry(&self, job: Job) -> QueueResult<()> {
        let key = job.key();
        let job_id = job.id.clone();
        {
            let mut state = self.state.lock().map_err(handle_poison)?;
            let Some((_, seq)) = state.in_flight.remove(&job.id) else {
                return Err(QueueError::JobNotFound(job.id));
            };
            state.queues.entry(key.clone()).or_default().push_front((seq, job));
        }

        tracing::debug!(job_id = %job_id, queue = %key, "Job requeued for retry");
        self.announce(&job_id, key);
        Ok(())
    }

    /// Head of `key` if its dependencies are met and nothing of `key` is running
    pub fn dequeue(&self, key: &QueueKey) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().map_err(handle_poison)?;
        if state.head_ready(key).is_none() {
            return Ok(None);
        }
        Ok(state.take_head(key))
    }

    /// Oldest ready head across all queues
    pub fn dequeue_next(&self) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().map_err(handle_poison)?;

        let next = state
            .queues
            .keys()
            .filter_map(|key| state.head_ready(key).map(|seq| (seq, key.clone())))
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, key)| key);

        Ok(next.and_then(|key| state.take_head(&key)))
    }

    /// Mark a dequeued job done, unblocking its dependents
    pub fn complete_job(&self, job_id: &str) -> QueueResult<()> {
        let callbacks = {
            let mut state = self.state.lock().map_err(handle_poison)?;
            if state.in_flight.remove(job_id).is_none() {
                return Err(QueueError::JobNotFound(job_id.to_string()));
            }
            state.completed.insert(job_id.to_string());
            state.drained_callbacks()
        };

        run_callbacks(callbacks);
        Ok(())
    }

    /// Mark a dequeued job failed. Its dependents stay blocked.
    pub fn fail_job(&self, job_id: &str, reason: &str) -> QueueResult<()> {
        let callbacks = {
            let mut state = self.state.lock().map_err(handle_poison)?;
            if state.in_flight.remove(job_id).is_none() {
                return Err(QueueError::JobNotFound(job_id.to_string()));
            }
            state.drained_callbacks()
        };

        tracing::debug!(job_id = %job_id, reason, "Job failed in queue");
        run_callbacks(callbacks);
        Ok(())
    }

    /// Remove a pending job wherever it sits in its queue
    pub fn remove(&self, job_id: &str) -> QueueResult<bool> {
        let (removed, callbacks) = {
            let mut state = self.state.lock().map_err(handle_poison)?;

            let mut removed = false;
            state.queues.retain(|_, queue| {
                let before = queue.len();
                queue.retain(|(_, job)| job.id != job_id);
                removed |= queue.len() != before;
                !queue.is_empty()
            });

            (removed, state.drained_callbacks())
        };

        run_callbacks(callbacks);
        Ok(removed)
    }

    /// Reject new jobs; `on_drained` runs once nothing is pending or in flight
    pub fn block<F>(&self, on_drained: F) -> QueueResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock().map_err(handle_poison)?;
            state.blocked = true;
            if !state.is_drained() {
                state.on_drained.push(Box::new(on_drained));
                return Ok(());
            }
        }

        on_drained();
        Ok(())
    }

    /// Accept jobs again; pending drain callbacks are dropped without running
    pub fn unblock(&self) -> QueueResult<()> {
        let mut state = self.state.lock().map_err(handle_poison)?;
        state.blocked = false;
        state.on_drained.clear();
        Ok(())
    }

    pub fn is_blocked(&self) -> QueueResult<bool> {
        Ok(self.state.lock().map_err(handle_poison)?.blocked)
    }

    pub fn is_drained(&self) -> QueueResult<bool> {
        Ok(self.state.lock().map_err(handle_poison)?.is_drained())
    }

    /// Pending jobs across all queues
    pub fn len(&self) -> QueueResult<usize> {
        Ok(self.state.lock().map_err(handle_poison)?.pending())
    }

    pub fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn pending_for(&self, key: &QueueKey) -> QueueResult<usize> {
        let state = self.state.lock().map_err(handle_poison)?;
        Ok(state.queues.get(key).map(VecDeque::len).unwrap_or(0))
    }

    pub fn in_flight_count(&self) -> QueueResult<usize> {
        Ok(self.state.lock().map_err(handle_poison)?.in_flight.len())
    }

    /// Whether the job is pending or in flight
    pub fn has_job(&self, job_id: &str) -> QueueResult<bool> {
        Ok(self.state.lock().map_err(handle_poison)?.contains(job_id))
    }

    pub fn is_completed(&self, job_id: &str) -> QueueResult<bool> {
        Ok(self.state.lock().map_err(handle_poison)?.completed.contains(job_id))
    }

    fn announce(&self, job_id: &str, key: QueueKey) {
        if let Some(bus) = &self.bus {
            bus.emit(ReactorEvent::JobAvailable {
                job_id: job_id.to_string(),
                document_id: key.document_id,
                scope: key.scope,
                branch: key.branch,
            });
        }
    }
}

fn run_callbacks(callbacks: Vec<DrainCallback>) {
    for callback in callbacks {
        callback();
    }
}
