/*
    job.rs - Units of scheduled work

    A job targets exactly one (document, scope, branch) queue. Mutation
    jobs carry actions to apply; load jobs carry operations received from
    another replica.
*/

use crate::core_oplog::{now_millis, Action, Operation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Mutation,
    Load,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Mutation => "mutation",
            JobKind::Load => "load",
        }
    }
}

/// Identity of one FIFO
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueKey {
    pub document_id: String,
    pub scope: String,
    pub branch: String,
}

impl QueueKey {
    pub fn new(document_id: impl Into<String>, scope: impl Into<String>, branch: impl Into<String>) -> Self {
        QueueKey { document_id: document_id.into(), scope: scope.into(), branch: branch.into() }
    }
}

impl std::fmt::Display for QueueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.document_id, self.scope, self.branch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub document_id: String,
    pub document_type: String,
    pub scope: String,
    pub branch: String,

    /// Actions to apply (mutation jobs)
    #[serde(default)]
    pub actions: Vec<Action>,

    /// Operations to import (load jobs)
    #[serde(default)]
    pub operations: Vec<Operation>,

    /// Remote a load job's operations arrived from
    #[serde(default)]
    pub source_remote: String,

    /// Jobs that must complete before this one may run
    #[serde(default)]
    pub queue_hint: Vec<String>,

    pub max_retries: u32,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default)]
    pub error_history: Vec<String>,

    /// Opaque correlation data copied onto every event of this job
    #[serde(default)]
    pub meta: Value,

    pub created_at_utc_ms: u64,
}

impl Job {
    fn new(kind: JobKind, document_id: &str, document_type: &str, scope: &str, branch: &str) -> Self {
        Job {
            id: Uuid::new_v4().to_string(),
            kind,
            document_id: document_id.to_string(),
            document_type: document_type.to_string(),
            scope: scope.to_string(),
            branch: branch.to_string(),
            actions: Vec::new(),
            operations: Vec::new(),
            source_remote: String::new(),
            queue_hint: Vec::new(),
            max_retries: 0,
            retry_count: 0,
            error_history: Vec::new(),
            meta: Value::Null,
            created_at_utc_ms: now_millis(),
        }
    }

    pub fn mutation(document_id: &str, document_type: &str, scope: &str, branch: &str, actions: Vec<Action>) -> Self {
        Job { actions, ..Self::new(JobKind::Mutation, document_id, document_type, scope, branch) }
    }

    pub fn load(
        document_id: &str,
        document_type: &str,
        scope: &str,
        branch: &str,
        operations: Vec<Operation>,
        source_remote: &str,
    ) -> Self {
        Job {
            operations,
            source_remote: source_remote.to_string(),
            ..Self::new(JobKind::Load, document_id, document_type, scope, branch)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_queue_hint(mut self, queue_hint: Vec<String>) -> Self {
        self.queue_hint = queue_hint;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn key(&self) -> QueueKey {
        QueueKey::new(&self.document_id, &self.scope, &self.branch)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_and_defaults() {
        let job = Job::mutation("doc-1", "test/counter", "global", "main", vec![]);
        assert_eq!(job.key().to_string(), "doc-1/global/main");
        assert_eq!(job.kind, JobKind::Mutation);
        assert!(!job.can_retry());
    }

    #[test]
    fn test_retry_budget() {
        let mut job = Job::load("doc-1", "t", "global", "main", vec![], "peer").with_max_retries(2);
        assert!(job.can_retry());
        job.retry_count = 2;
        assert!(!job.can_retry());
        assert_eq!(job.source_remote, "peer");
    }
}
