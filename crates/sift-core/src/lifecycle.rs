//! Reference counting of nodes across the rules that use them

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::rete_nodes::{NodeId, NodeKind};

/// Ownership record of one node
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleRecord {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub rules: BTreeSet<String>,
}

impl LifecycleRecord {
    pub fn ref_count(&self) -> usize {
        self.rules.len()
    }
}

/// Outcome of releasing a rule's claim on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other rules still reference the node
    Retained(usize),
    /// The last reference is gone; the node can be deleted
    CanDelete,
    /// The node or the rule's claim on it was unknown
    Unknown,
}

#[derive(Debug, Default)]
pub struct LifecycleManager {
    records: HashMap<NodeId, LifecycleRecord>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `rule_id` uses `node_id`; returns the new reference count
    pub fn register(&mut self, node_id: NodeId, kind: NodeKind, rule_id: &str) -> usize {
        let record = self
            .records
            .entry(node_id)
            .or_insert_with(|| LifecycleRecord { node_id, kind, rules: BTreeSet::new() });
        record.rules.insert(rule_id.to_string());
        record.ref_count()
    }

    pub fn release(&mut self, node_id: NodeId, rule_id: &str) -> Release {
        let Some(record) = self.records.get_mut(&node_id) else {
            return Release::Unknown;
        };
        if !record.rules.remove(rule_id) {
            return Release::Unknown;
        }
        if record.rules.is_empty() {
            self.records.remove(&node_id);
            debug!(node_id = node_id, rule_id = rule_id, "Last reference released");
            Release::CanDelete
        } else {
            Release::Retained(record.ref_count())
        }
    }

    pub fn ref_count(&self, node_id: NodeId) -> usize {
        self.records.get(&node_id).map_or(0, LifecycleRecord::ref_count)
    }

    pub fn record(&self, node_id: NodeId) -> Option<&LifecycleRecord> {
        self.records.get(&node_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
