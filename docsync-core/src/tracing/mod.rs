//! Span helpers for correlating work across jobs, merges and deliveries

use std::time::Instant;
use tracing::{span, Level, Span};

/// Trace context carried across subsystem boundaries
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

impl TraceContext {
    /// Create a new trace context
    pub fn new() -> Self {
        use uuid::Uuid;

        Self {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
        }
    }

    /// Create a child trace context
    pub fn child(&self) -> Self {
        use uuid::Uuid;

        Self {
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: Some(self.span_id.clone()),
        }
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Traced operation wrapper
pub struct TracedOperation {
    span: Span,
    start: Instant,
}

impl TracedOperation {
    /// Start a new traced operation
    pub fn new(operation_name: &str) -> Self {
        let span = span!(Level::DEBUG, "operation", name = operation_name);

        Self { span, start: Instant::now() }
    }

    /// Start a traced operation with context
    pub fn with_context(operation_name: &str, ctx: &TraceContext) -> Self {
        let span = span!(
            Level::DEBUG,
            "operation",
            name = operation_name,
            trace_id = %ctx.trace_id,
            span_id = %ctx.span_id,
            parent_span_id = ?ctx.parent_span_id
        );

        Self { span, start: Instant::now() }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Record an event in the trace
    pub fn record_event(&self, event: &str) {
        tracing::debug!(parent: &self.span, event = event);
    }

    /// Record an error in the trace
    pub fn record_error(&self, error: &str) {
        tracing::warn!(parent: &self.span, error = error);
    }

    /// Complete the operation and return its duration in milliseconds
    pub fn complete(self) -> f64 {
        let duration = self.start.elapsed();
        tracing::debug!(
            parent: &self.span,
            duration_ms = duration.as_millis() as u64,
            "operation completed"
        );
        duration.as_secs_f64() * 1000.0
    }
}

/// Trace operation log algorithms
pub mod oplog {
    use super::*;

    pub fn trace_merge(scope: &str, target_len: usize, merge_len: usize) -> TracedOperation {
        let op = TracedOperation::new("oplog_merge");
        tracing::debug!(parent: &op.span, scope = scope, target_len = target_len, merge_len = merge_len);
        op
    }
}

/// Trace job execution
pub mod reactor {
    use super::*;

    pub fn trace_job(job_id: &str, document_id: &str, scope: &str, kind: &str) -> TracedOperation {
        let op = TracedOperation::new("reactor_job");
        tracing::debug!(
            parent: &op.span,
            job_id = job_id,
            document_id = document_id,
            scope = scope,
            kind = kind
        );
        op
    }
}

/// Trace delivery to remotes
pub mod sync {
    use super::*;

    pub fn trace_delivery(remote: &str, document_id: &str, operation_count: usize) -> TracedOperation {
        let op = TracedOperation::new("sync_delivery");
        tracing::debug!(
            parent: &op.span,
            remote = remote,
            document_id = document_id,
            operation_count = operation_count
        );
        op
    }
}
