//! RETE Network Node Sharing
//!
//! Shareable nodes are identified by a *semantic hash*: a deterministic
//! 64-bit digest of the node kind, its predicate in canonical form and the
//! hashes of its inputs. Two nodes with the same hash hold the same memory
//! and are merged. The registries below map hashes to live node ids; the
//! reference counts themselves live in the lifecycle manager.

use fnv::FnvHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::rete_nodes::NodeId;

/// Incremental builder for semantic hashes
pub struct SignatureHasher {
    hasher: FnvHasher,
}

impl SignatureHasher {
    pub fn new(kind: &str) -> Self {
        let mut hasher = FnvHasher::default();
        kind.hash(&mut hasher);
        Self { hasher }
    }

    #[must_use]
    pub fn parent(mut self, signature: u64) -> Self {
        signature.hash(&mut self.hasher);
        self
    }

    #[must_use]
    pub fn part(mut self, part: impl Hash) -> Self {
        part.hash(&mut self.hasher);
        self
    }

    pub fn finish(self) -> u64 {
        self.hasher.finish()
    }
}

/// Hash of a single canonical key, used to order conjuncts
pub fn key_hash(key: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Signature-to-node map for one family of nodes
#[derive(Debug, Default)]
pub struct SharingRegistry {
    nodes: HashMap<u64, NodeId>,
    /// Lookups answered with an existing node
    pub shares_found: usize,
    /// Nodes registered since creation
    pub nodes_registered: usize,
}

impl SharingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing node with this signature, if any
    pub fn find(&mut self, signature: u64) -> Option<NodeId> {
        let found = self.nodes.get(&signature).copied();
        if found.is_some() {
            self.shares_found += 1;
        }
        found
    }

    pub fn register(&mut self, signature: u64, node_id: NodeId) {
        self.nodes.insert(signature, node_id);
        self.nodes_registered += 1;
    }

    /// Forget `signature` if it still points at `node_id`
    pub fn unregister(&mut self, signature: u64, node_id: NodeId) -> bool {
        if self.nodes.get(&signature) == Some(&node_id) {
            self.nodes.remove(&signature);
            true
        } else {
            false
        }
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.values().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Sharing statistics exposed through the diagnostic surface
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct NodeSharingStats {
    /// Alpha nodes currently registered for sharing
    pub total_shared_alpha_nodes: usize,
    /// Sum of the rule reference counts of those alpha nodes
    pub total_rule_references: usize,
    /// `total_rule_references / total_shared_alpha_nodes`
    pub average_sharing_ratio: f64,
    pub alpha_shares_found: usize,
    pub beta_shares_found: usize,
    /// Nodes created rather than shared, removed ones included
    pub alpha_nodes_created: usize,
    pub beta_nodes_created: usize,
}
