/*
    core_sync - Multi-remote sync

    Moves committed operations between replicas.
    Handles:
    - Collection-scoped routing of committed operations to remotes
    - Per-remote outbox, inbox and dead-letter lanes
    - Delivery retries and durable inbound/outbound cursors
    - Applying received operations through reactor load jobs
*/

pub mod channel;
pub mod client;
pub mod envelope;
pub mod errors;
pub mod mailbox;
pub mod manager;
pub mod remote;


pub use channel::{connect_in_memory, InMemoryChannel, SyncChannel};
pub use client::ReactorClient;
pub use envelope::{SyncEnvelope, SyncStatus};
pub use errors::{SyncError, SyncResult};
pub use mailbox::{Mailbox, MailboxSubscription};
pub use manager::{SyncManager, BACKFILL_JOB_ID};
pub use remote::{Remote, RemoteFilter, RemoteStatus};
