/*
    remote.rs - Peers and the operations they receive

    A remote subscribes to one collection. An operation is routed to it
    only when the operation's document is a member of that collection at
    commit time, the filter accepts it, and it did not arrive from that
    same remote.
*/

use super::channel::SyncChannel;
use crate::core_oplog::OperationWithContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Narrows what a remote receives; empty lists match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFilter {
    #[serde(default)]
    pub document_ids: Vec<String>,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub branch: Option<String>,
}

impl RemoteFilter {
    pub fn matches(&self, op: &OperationWithContext) -> bool {
        let context = &op.context;
        (self.document_ids.is_empty() || self.document_ids.contains(&context.document_id))
            && (self.scopes.is_empty() || self.scopes.contains(&context.scope))
            && self.branch.as_ref().map_or(true, |branch| *branch == context.branch)
    }
}

#[derive(Clone)]
pub struct Remote {
    pub name: String,
    pub collection_id: String,
    pub filter: RemoteFilter,
    pub channel: Arc<dyn SyncChannel>,
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("name", &self.name)
            .field("collection_id", &self.collection_id)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl Remote {
    pub fn new(name: impl Into<String>, collection_id: impl Into<String>, channel: Arc<dyn SyncChannel>) -> Self {
        Remote { name: name.into(), collection_id: collection_id.into(), filter: RemoteFilter::default(), channel }
    }

    pub fn with_filter(mut self, filter: RemoteFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Filter and echo check, without membership
    pub fn wants(&self, op: &OperationWithContext) -> bool {
        op.context.source_remote != self.name && self.filter.matches(op)
    }

    /// Full routing decision for a freshly committed operation. A document
    /// missing from `memberships` is routed nowhere.
    pub fn accepts(&self, op: &OperationWithContext, memberships: &HashMap<String, Vec<String>>) -> bool {
        let member = memberships
            .get(&op.context.document_id)
            .is_some_and(|collections| collections.contains(&self.collection_id));
        member && self.wants(op)
    }
}

/// Point-in-time view of a registered remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    pub name: String,
    pub collection_id: String,
    pub filter: RemoteFilter,
    pub outbox_len: usize,
    pub inbox_len: usize,
    pub dead_letter_len: usize,
    /// Envelopes waiting for an earlier envelope of the same document
    pub held_len: usize,
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_oplog::OperationContext;
    use crate::core_sync::channel::InMemoryChannel;
    use crate::test_utils::fixtures::OperationBuilder;

    fn op(document_id: &str, scope: &str, source_remote: &str) -> OperationWithContext {
        OperationWithContext {
            operation: OperationBuilder::new(0).scope(scope).build(),
            context: OperationContext {
                document_id: document_id.to_string(),
                document_type: "test/counter".to_string(),
                scope: scope.to_string(),
                branch: "main".to_string(),
                ordinal: 1,
                source_remote: source_remote.to_string(),
            },
        }
    }

    fn memberships(document_id: &str, collections: &[&str]) -> HashMap<String, Vec<String>> {
        HashMap::from([(document_id.to_string(), collections.iter().map(|c| c.to_string()).collect())])
    }

    #[test]
    fn test_routing_requires_membership() {
        let remote = Remote::new("peer", "main.drive", InMemoryChannel::new());
        let op = op("file", "global", "");

        assert!(remote.accepts(&op, &memberships("file", &["main.file", "main.drive"])));
        assert!(!remote.accepts(&op, &memberships("file", &["main.file"])));
        // no membership data at all
        assert!(!remote.accepts(&op, &HashMap::new()));
    }

    #[test]
    fn test_echo_is_filtered() {
        let remote = Remote::new("peer", "main.drive", InMemoryChannel::new());
        let all = memberships("file", &["main.drive"]);
        assert!(!remote.accepts(&op("file", "global", "peer"), &all));
        assert!(remote.accepts(&op("file", "global", "other"), &all));
    }

    #[test]
    fn test_filter_narrows() {
        let filter = RemoteFilter {
            document_ids: vec!["file".to_string()],
            scopes: vec!["global".to_string()],
            branch: Some("main".to_string()),
        };
        assert!(filter.matches(&op("file", "global", "")));
        assert!(!filter.matches(&op("file", "local", "")));
        assert!(!filter.matches(&op("other", "global", "")));
        assert!(RemoteFilter::default().matches(&op("anything", "local", "")));
    }
}
