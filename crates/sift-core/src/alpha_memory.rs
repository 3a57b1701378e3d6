//! Type entry nodes and alpha filters.
//!
//! Alpha-side nodes hold facts. A type node accepts every fact of its type;
//! an alpha node keeps the facts that pass its predicate. Both emit
//! single-fact tokens to their children.

use sift_types::{Fact, FactId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::memory::WorkingMemory;
use crate::rete_nodes::{Delta, NodeId, Token};
use crate::types::Condition;

/// Entry node for one declared record type
#[derive(Debug)]
pub struct TypeNode {
    pub node_id: NodeId,
    pub type_name: String,
    memory: BTreeMap<FactId, Arc<Fact>>,
}

impl TypeNode {
    pub fn new(node_id: NodeId, type_name: impl Into<String>) -> Self {
        Self { node_id, type_name: type_name.into(), memory: BTreeMap::new() }
    }

    pub fn receive(&mut self, delta: Delta) -> Vec<Delta> {
        let Some(fact) = delta.token().head().cloned() else {
            return Vec::new();
        };
        if fact.type_name != self.type_name {
            return Vec::new();
        }
        store_or_evict(&mut self.memory, delta, fact)
    }

    pub fn outputs(&self) -> Vec<Token> {
        self.memory.values().cloned().map(Token::single).collect()
    }

    pub fn working_memory(&self) -> WorkingMemory {
        WorkingMemory::from_facts(self.memory.values())
    }

    pub fn fact(&self, fact_id: &str) -> Option<&Arc<Fact>> {
        self.memory.get(fact_id)
    }
}

/// Predicate held by an alpha node
#[derive(Debug, Clone, PartialEq)]
pub enum AlphaTest {
    /// Bridges a variable into a join without filtering
    PassThrough,
    /// Comparison, negation or opaque disjunction on slot 0
    Filter(Condition),
}

impl AlphaTest {
    pub fn matches(&self, fact: &Fact) -> bool {
        match self {
            AlphaTest::PassThrough => true,
            AlphaTest::Filter(condition) => condition.matches_fact(fact),
        }
    }

    pub fn canonical_key(&self) -> String {
        match self {
            AlphaTest::PassThrough => "pass".to_string(),
            AlphaTest::Filter(condition) => condition.canonical_key(),
        }
    }
}

/// A single-variable filter
#[derive(Debug)]
pub struct AlphaNode {
    pub node_id: NodeId,
    pub test: AlphaTest,
    memory: BTreeMap<FactId, Arc<Fact>>,
}

impl AlphaNode {
    pub fn new(node_id: NodeId, test: AlphaTest) -> Self {
        Self { node_id, test, memory: BTreeMap::new() }
    }

    pub fn receive(&mut self, delta: Delta) -> Vec<Delta> {
        let Some(fact) = delta.token().head().cloned() else {
            return Vec::new();
        };
        if let Delta::Add(_) = delta {
            if !self.test.matches(&fact) {
                debug!(node_id = self.node_id, fact_id = %fact.id, "Alpha test rejected fact");
                return Vec::new();
            }
        }
        store_or_evict(&mut self.memory, delta, fact)
    }

    pub fn outputs(&self) -> Vec<Token> {
        self.memory.values().cloned().map(Token::single).collect()
    }

    pub fn working_memory(&self) -> WorkingMemory {
        WorkingMemory::from_facts(self.memory.values())
    }

    pub fn contains(&self, fact_id: &str) -> bool {
        self.memory.contains_key(fact_id)
    }

    pub fn fact(&self, fact_id: &str) -> Option<&Arc<Fact>> {
        self.memory.get(fact_id)
    }
}

fn store_or_evict(memory: &mut BTreeMap<FactId, Arc<Fact>>, delta: Delta, fact: Arc<Fact>) -> Vec<Delta> {
    match delta {
        Delta::Add(token) => {
            if memory.contains_key(&fact.id) {
                return Vec::new();
            }
            memory.insert(fact.id.clone(), fact);
            vec![Delta::Add(token)]
        }
        Delta::Remove(token) => match memory.remove(&fact.id) {
            Some(_) => vec![Delta::Remove(token)],
            None => Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Operator;

    fn adult_filter() -> AlphaNode {
        AlphaNode::new(1, AlphaTest::Filter(Condition::field("age", Operator::GreaterThanOrEqual, 18)))
    }

    fn person(id: &str, age: i32) -> Token {
        Token::single(Arc::new(Fact::new(id, "Person").with_field("age", age)))
    }

    #[test]
    fn filter_keeps_matching_facts() {
        let mut node = adult_filter();
        assert_eq!(node.receive(Delta::Add(person("p1", 25))).len(), 1);
        assert!(node.receive(Delta::Add(person("p2", 15))).is_empty());
        assert!(node.contains("p1"));
        assert!(!node.contains("p2"));
    }

    #[test]
    fn removal_of_unmatched_fact_is_silent() {
        let mut node = adult_filter();
        node.receive(Delta::Add(person("p1", 25)));
        assert!(node.receive(Delta::Remove(person("p2", 15))).is_empty());
        assert_eq!(node.receive(Delta::Remove(person("p1", 25))).len(), 1);
        assert!(node.working_memory().is_empty());
    }

    #[test]
    fn duplicate_add_is_idempotent() {
        let mut node = AlphaNode::new(2, AlphaTest::PassThrough);
        assert_eq!(node.receive(Delta::Add(person("p1", 1))).len(), 1);
        assert!(node.receive(Delta::Add(person("p1", 1))).is_empty());
    }

    #[test]
    fn type_node_ignores_other_types() {
        let mut node = TypeNode::new(3, "Order");
        assert!(node.receive(Delta::Add(person("p1", 30))).is_empty());
        assert!(node.outputs().is_empty());
    }
}
