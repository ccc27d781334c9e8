/*
    core_queue - Dependency-aware job scheduling

    Handles:
    - Per (document, scope, branch) FIFO queues
    - Cross-queue dependencies through queue hints
    - Drain mode (block / unblock) with drained callbacks
    - Job status tracking for callers awaiting results
*/

pub mod errors;
pub mod job;
pub mod queue;
pub mod tracker;

pub use errors::{QueueError, QueueResult};
pub use job::{Job, JobKind, QueueKey};
pub use queue::JobQueue;
pub use tracker::{JobInfo, JobStatus, JobTracker};
