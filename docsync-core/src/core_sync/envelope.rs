/*
    envelope.rs - Unit of transfer between replicas

    An envelope carries committed operations of one document branch in
    commit order, together with its delivery bookkeeping.
*/

use crate::core_oplog::OperationWithContext;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Delivered,
    /// Delivery retries exhausted
    DeadLettered,
    /// Received but could not be applied
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    pub id: String,

    /// Job that committed the operations, or `backfill`
    pub job_id: String,

    /// Remote the envelope is addressed to, as named by the sender
    pub remote_name: String,

    pub document_id: String,
    pub branch: String,

    /// Scopes touched, in order of first appearance
    pub scopes: Vec<String>,

    pub operations: Vec<OperationWithContext>,
    pub status: SyncStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub attempts: u32,
}

impl SyncEnvelope {
    pub fn new(job_id: &str, remote_name: &str, operations: Vec<OperationWithContext>) -> Self {
        let (document_id, branch) = operations
            .first()
            .map(|op| (op.context.document_id.clone(), op.context.branch.clone()))
            .unwrap_or_default();

        let mut scopes: Vec<String> = Vec::new();
        for op in &operations {
            if !scopes.contains(&op.context.scope) {
                scopes.push(op.context.scope.clone());
            }
        }

        SyncEnvelope {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            remote_name: remote_name.to_string(),
            document_id,
            branch,
            scopes,
            operations,
            status: SyncStatus::Pending,
            error: None,
            attempts: 0,
        }
    }

    /// Split operations into envelopes of one document branch each, at most
    /// `batch_size` operations long, preserving order
    pub fn batch(
        job_id: &str,
        remote_name: &str,
        operations: Vec<OperationWithContext>,
        batch_size: usize,
    ) -> Vec<SyncEnvelope> {
        let limit = batch_size.max(1);
        let mut envelopes = Vec::new();
        let mut current: Vec<OperationWithContext> = Vec::new();

        for op in operations {
            let split = current.first().is_some_and(|head| {
                head.context.document_id != op.context.document_id
                    || head.context.branch != op.context.branch
                    || current.len() >= limit
            });
            if split {
                envelopes.push(Self::new(job_id, remote_name, std::mem::take(&mut current)));
            }
            current.push(op);
        }
        if !current.is_empty() {
            envelopes.push(Self::new(job_id, remote_name, current));
        }
        envelopes
    }

    /// Highest sender ordinal carried
    pub fn max_ordinal(&self) -> u64 {
        self.operations.iter().map(|op| op.context.ordinal).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
