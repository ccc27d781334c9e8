//! Two-replica sync harness
//!
//! Runs two in-process replicas joined by in-memory channels, drives a
//! workload of documents and counter writes from both sides, optionally
//! partitions them to force concurrent edits, and reports whether they
//! converged and stopped exchanging operations.

use anyhow::{bail, Context, Result};
use clap::Parser;
use docsync_core::abort::AbortSignal;
use docsync_core::config::Config;
use docsync_core::core_oplog::GLOBAL_SCOPE;
use docsync_core::core_reactor::JobReceipt;
use docsync_core::core_sync::{connect_in_memory, InMemoryChannel};
use docsync_core::logging::init_logging_with_config;
use docsync_core::metrics::init_metrics;
use docsync_core::test_utils::async_helpers::{wait_for_quiet, wait_until};
use docsync_core::test_utils::fixtures::{increment, COUNTER_DOCUMENT_TYPE};
use docsync_core::test_utils::replica::{link, Replica};
use serde_json::Value;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

const DRIVE: &str = "drive";
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "docsync-harness")]
#[command(about = "Sync two in-process docsync replicas and check convergence", long_about = None)]
struct Args {
    /// TOML config file; environment variables are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Child documents created under the shared drive
    #[arg(short, long, default_value = "10")]
    documents: usize,

    /// Counter writes per document
    #[arg(short, long, default_value = "5")]
    writes: i64,

    /// Cut the link, edit the drive on both sides, then reconnect
    #[arg(long)]
    partition: bool,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

async fn settle(replica: &Replica, receipt: JobReceipt) -> Result<()> {
    for job_id in &receipt.job_ids {
        replica.reactor.wait_for_job(job_id, None).await?;
    }
    Ok(())
}

async fn drive_state(replica: &Replica) -> Result<Value> {
    let snapshot = replica.reactor.get_document(DRIVE, None, &AbortSignal::never()).await?;
    Ok(snapshot.state[GLOBAL_SCOPE].clone())
}

async fn partitioned_edits(
    alice: &Replica,
    bob: &Replica,
    to_bob: &InMemoryChannel,
    to_alice: &InMemoryChannel,
) -> Result<()> {
    to_bob.disconnect();
    to_alice.disconnect();
    info!("Link cut");

    settle(alice, alice.reactor.execute(DRIVE, None, vec![increment(1)], Value::Null).await?).await?;
    settle(bob, bob.reactor.execute(DRIVE, None, vec![increment(100)], Value::Null).await?).await?;

    let dead_lettered = wait_until(SETTLE_TIMEOUT, || async {
        alice.sync.dead_letters(&bob.name).map(|d| !d.is_empty()).unwrap_or(false)
            && bob.sync.dead_letters(&alice.name).map(|d| !d.is_empty()).unwrap_or(false)
    })
    .await;
    if !dead_lettered {
        bail!("partitioned writes were never dead-lettered");
    }

    connect_in_memory(to_bob, to_alice);
    let requeued = alice.sync.retry_dead_letters(&bob.name)? + bob.sync.retry_dead_letters(&alice.name)?;
    info!(requeued, "Link restored");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env()?,
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_logging_with_config(config.logging.to_log_config()?)?;
    init_metrics();

    let alice = Replica::new("alice", config.reactor.clone(), config.sync.clone())?;
    let bob = Replica::new("bob", config.reactor.clone(), config.sync.clone())?;
    let channels = link(&alice, &bob, &format!("{}.{}", config.reactor.default_branch, DRIVE)).await?;
    alice.start()?;
    bob.start()?;

    let started = Instant::now();
    settle(&alice, alice.reactor.create(DRIVE, COUNTER_DOCUMENT_TYPE, None).await?).await?;

    for n in 0..args.documents {
        // alternate the writing side
        let writer = if n % 2 == 0 { &alice } else { &bob };
        let document_id = format!("file-{}", n);

        let reached = wait_until(SETTLE_TIMEOUT, || async {
            writer.reactor.get_document(DRIVE, None, &AbortSignal::never()).await.is_ok()
        })
        .await;
        if !reached {
            bail!("{} never received the drive", writer.name);
        }

        settle(writer, writer.reactor.create_child(DRIVE, &document_id, COUNTER_DOCUMENT_TYPE, None).await?).await?;
        for by in 1..=args.writes {
            writer.reactor.execute(&document_id, None, vec![increment(by)], Value::Null).await?;
        }
    }

    if args.partition {
        partitioned_edits(&alice, &bob, &channels.0, &channels.1).await?;
    }

    let counts = wait_for_quiet(config.sync.quiet_period, SETTLE_TIMEOUT, || async {
        (alice.operation_count().await, bob.operation_count().await)
    })
    .await;
    let Some((alice_ops, bob_ops)) = counts else {
        bail!("replicas kept exchanging operations for {:?}", SETTLE_TIMEOUT);
    };

    let (alice_drive, bob_drive) = (drive_state(&alice).await?, drive_state(&bob).await?);
    println!("settled after {:?}", started.elapsed());
    println!("  alice: {} operations, drive {}", alice_ops, alice_drive);
    println!("  bob:   {} operations, drive {}", bob_ops, bob_drive);
    println!("  envelopes sent: alice {}, bob {}", channels.0.sent_count(), channels.1.sent_count());

    alice.stop().await?;
    bob.stop().await?;

    if alice_ops != bob_ops || alice_drive != bob_drive {
        bail!("replicas diverged");
    }
    println!("converged");
    Ok(())
}
