//! Tokens, deltas and the node arena entry shared by every node variant.

use serde::{Deserialize, Serialize};
use sift_types::{Fact, FactId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::aggregation::AggregateNode;
use crate::alpha_memory::{AlphaNode, TypeNode};
use crate::beta_network::{ExistsNode, JoinNode};
use crate::memory::{MemoryKey, WorkingMemory};
use crate::terminal::TerminalNode;

/// Unique identifier for nodes in the RETE network. `0` is reserved for the
/// root.
pub type NodeId = u64;

/// Identifier of the root node
pub const ROOT_NODE_ID: NodeId = 0;

/// Identity of a token: the ordered ids of the facts it binds
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(Vec<FactId>);

impl TokenId {
    pub fn fact_ids(&self) -> &[FactId] {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(","))
    }
}

/// An ordered tuple of facts, one per variable bound so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub facts: Vec<Arc<Fact>>,
    /// Aggregation results attached by an aggregation node at emission time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, f64>,
}

impl Token {
    pub fn single(fact: Arc<Fact>) -> Self {
        Self { facts: vec![fact], values: BTreeMap::new() }
    }

    pub fn id(&self) -> TokenId {
        TokenId(self.facts.iter().map(|f| f.id.clone()).collect())
    }

    /// A new token with `fact` appended
    pub fn extend(&self, fact: Arc<Fact>) -> Self {
        let mut facts = Vec::with_capacity(self.facts.len() + 1);
        facts.extend(self.facts.iter().cloned());
        facts.push(fact);
        Self { facts, values: BTreeMap::new() }
    }

    /// Fact bound at `slot`
    pub fn fact(&self, slot: usize) -> Option<&Fact> {
        self.facts.get(slot).map(Arc::as_ref)
    }

    /// First fact of a single-fact token, as delivered by alpha and type nodes
    pub fn head(&self) -> Option<&Arc<Fact>> {
        self.facts.first()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn contains_fact(&self, fact_id: &str) -> bool {
        self.facts.iter().any(|f| f.id == fact_id)
    }

    pub(crate) fn deep_copy(&self) -> Self {
        Self {
            facts: self.facts.iter().map(|f| Arc::new(Fact::clone(f))).collect(),
            values: self.values.clone(),
        }
    }
}

/// A change travelling along one edge of the network
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Add(Token),
    Remove(Token),
}

impl Delta {
    pub fn token(&self) -> &Token {
        match self {
            Delta::Add(token) | Delta::Remove(token) => token,
        }
    }
}

/// Input of a node an edge feeds. Single-input nodes only have `Left`.
/// Aggregation nodes number their sources `Right(0)`, `Right(1)`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Port {
    Left,
    Right(usize),
}

/// An outgoing edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub target: NodeId,
    pub port: Port,
}

/// Tag of a node variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Type,
    Alpha,
    Join,
    Exists,
    Aggregate,
    Terminal,
}

impl NodeKind {
    /// Alpha-side nodes hold facts; everything else sits on the beta side
    pub fn is_beta(self) -> bool {
        matches!(self, NodeKind::Join | NodeKind::Exists | NodeKind::Aggregate)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Type => "type",
            NodeKind::Alpha => "alpha",
            NodeKind::Join => "join",
            NodeKind::Exists => "exists",
            NodeKind::Aggregate => "aggregate",
            NodeKind::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Per-variant state
#[derive(Debug)]
pub enum NodeState {
    Type(TypeNode),
    Alpha(AlphaNode),
    Join(JoinNode),
    Exists(ExistsNode),
    Aggregate(AggregateNode),
    Terminal(TerminalNode),
}

/// A node of the discrimination network together with its outgoing edges
#[derive(Debug)]
pub struct ReteNode {
    pub id: NodeId,
    /// Semantic hash used for sharing; `0` for nodes that are never shared
    pub signature: u64,
    pub children: Vec<Link>,
    pub state: NodeState,
}

impl ReteNode {
    pub fn new(id: NodeId, signature: u64, state: NodeState) -> Self {
        Self { id, signature, children: Vec::new(), state }
    }

    pub fn kind(&self) -> NodeKind {
        match &self.state {
            NodeState::Type(_) => NodeKind::Type,
            NodeState::Alpha(_) => NodeKind::Alpha,
            NodeState::Join(_) => NodeKind::Join,
            NodeState::Exists(_) => NodeKind::Exists,
            NodeState::Aggregate(_) => NodeKind::Aggregate,
            NodeState::Terminal(_) => NodeKind::Terminal,
        }
    }

    /// Apply an incoming change and return the changes to forward to every
    /// child. For terminals the returned deltas are the activation changes.
    pub fn receive(&mut self, port: Port, delta: Delta) -> Vec<Delta> {
        match &mut self.state {
            NodeState::Type(node) => node.receive(delta),
            NodeState::Alpha(node) => node.receive(delta),
            NodeState::Join(node) => node.receive(port, delta),
            NodeState::Exists(node) => node.receive(port, delta),
            NodeState::Aggregate(node) => node.receive(port, delta),
            NodeState::Terminal(node) => node.receive(delta),
        }
    }

    /// Everything this node currently emits downstream. Used to prime nodes
    /// attached after facts were already submitted.
    pub fn outputs(&self) -> Vec<Token> {
        match &self.state {
            NodeState::Type(node) => node.outputs(),
            NodeState::Alpha(node) => node.outputs(),
            NodeState::Join(node) => node.outputs(),
            NodeState::Exists(node) => node.outputs(),
            NodeState::Aggregate(node) => node.outputs(),
            NodeState::Terminal(node) => node.outputs(),
        }
    }

    /// Snapshot of the node's working set
    pub fn working_memory(&self) -> WorkingMemory {
        match &self.state {
            NodeState::Type(node) => node.working_memory(),
            NodeState::Alpha(node) => node.working_memory(),
            NodeState::Join(node) => node.working_memory(),
            NodeState::Exists(node) => node.working_memory(),
            NodeState::Aggregate(node) => node.working_memory(),
            NodeState::Terminal(node) => node.working_memory(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.working_memory().is_empty()
    }

    /// Memory entry a delta arriving on `port` can change
    pub fn memory_key(&self, port: Port, delta: &Delta) -> Option<MemoryKey> {
        let token = delta.token();
        match (&self.state, port) {
            (NodeState::Type(_) | NodeState::Alpha(_), _)
            | (NodeState::Join(_) | NodeState::Exists(_), Port::Right(_)) => {
                token.head().map(|fact| MemoryKey::Fact(fact.id.clone()))
            }
            _ => Some(MemoryKey::Token(token.id())),
        }
    }

    pub fn fact_entry(&self, fact_id: &str) -> Option<&Arc<Fact>> {
        match &self.state {
            NodeState::Type(node) => node.fact(fact_id),
            NodeState::Alpha(node) => node.fact(fact_id),
            NodeState::Join(node) => node.right_fact(fact_id),
            NodeState::Exists(node) => node.right_fact(fact_id),
            NodeState::Aggregate(_) | NodeState::Terminal(_) => None,
        }
    }

    pub fn token_entry(&self, id: &TokenId) -> Option<&Token> {
        match &self.state {
            NodeState::Type(_) | NodeState::Alpha(_) => None,
            NodeState::Join(node) => node.left_token(id),
            NodeState::Exists(node) => node.left_token(id),
            NodeState::Aggregate(node) => node.token(id),
            NodeState::Terminal(node) => node.activation(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_identity_follows_fact_order() {
        let p = Arc::new(Fact::new("p1", "Person"));
        let o = Arc::new(Fact::new("o1", "Order"));
        let po = Token::single(p.clone()).extend(o.clone());
        let op = Token::single(o).extend(p);
        assert_ne!(po.id(), op.id());
        assert_eq!(po.id().to_string(), "[p1,o1]");
        assert!(po.contains_fact("o1"));
        assert_eq!(po.fact(1).map(|f| f.id.as_str()), Some("o1"));
    }

    #[test]
    fn deep_copy_does_not_share_facts() {
        let token = Token::single(Arc::new(Fact::new("p1", "Person")));
        let copy = token.deep_copy();
        assert_eq!(copy, token);
        assert!(!Arc::ptr_eq(&copy.facts[0], &token.facts[0]));
    }
}
