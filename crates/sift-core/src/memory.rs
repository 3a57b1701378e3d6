//! Per-node working memory snapshots
//!
//! A [`WorkingMemory`] is what a node hands to the memory store: the facts
//! it holds (type, alpha and right-hand memories) and the tokens it holds
//! (left-hand memories, aggregation groups, terminal activations). It
//! serialises facts and tokens as lists so that the encoding stays plain JSON
//! and keys are always recomputed from the values on the way back in.
//!
//! Between commits the network only records which entries of a node a change
//! touched ([`MemoryKey`]). The store then receives a [`MemoryChange`] with
//! the current value of exactly those entries, so the cost of a write follows
//! the size of the change and not the size of the memory.

use serde::{Deserialize, Serialize};
use sift_types::{Fact, FactId};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::rete_nodes::{Token, TokenId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "MemorySnapshot", into = "MemorySnapshot")]
pub struct WorkingMemory {
    pub facts: BTreeMap<FactId, Arc<Fact>>,
    pub tokens: BTreeMap<TokenId, Token>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_facts<'a>(facts: impl IntoIterator<Item = &'a Arc<Fact>>) -> Self {
        Self {
            facts: facts.into_iter().map(|f| (f.id.clone(), f.clone())).collect(),
            tokens: BTreeMap::new(),
        }
    }

    pub fn with_tokens<'a>(mut self, tokens: impl IntoIterator<Item = &'a Token>) -> Self {
        self.tokens.extend(tokens.into_iter().map(|t| (t.id(), t.clone())));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.tokens.is_empty()
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn contains_fact(&self, fact_id: &str) -> bool {
        self.facts.contains_key(fact_id)
    }

    /// Copy with no `Arc` shared with `self`
    pub fn deep_copy(&self) -> Self {
        Self {
            facts: self
                .facts
                .iter()
                .map(|(id, fact)| (id.clone(), Arc::new(Fact::clone(fact))))
                .collect(),
            tokens: self.tokens.iter().map(|(id, token)| (id.clone(), token.deep_copy())).collect(),
        }
    }
}

/// One entry of a node memory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryKey {
    Fact(FactId),
    Token(TokenId),
}

/// Entries written or dropped by one commit for one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryChange {
    pub facts: Vec<Arc<Fact>>,
    pub tokens: Vec<Token>,
    pub removed_facts: Vec<FactId>,
    pub removed_tokens: Vec<TokenId>,
}

impl MemoryChange {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries written or dropped
    pub fn len(&self) -> usize {
        self.facts.len() + self.tokens.len() + self.removed_facts.len() + self.removed_tokens.len()
    }

    /// Removals first, so an entry both dropped and written ends up written
    pub fn apply_to(&self, memory: &mut WorkingMemory) {
        for id in &self.removed_facts {
            memory.facts.remove(id);
        }
        for id in &self.removed_tokens {
            memory.tokens.remove(id);
        }
        memory.facts.extend(self.facts.iter().map(|f| (f.id.clone(), f.clone())));
        memory.tokens.extend(self.tokens.iter().map(|t| (t.id(), t.clone())));
    }

    /// Copy with no `Arc` shared with `self`
    pub fn deep_copy(&self) -> Self {
        Self {
            facts: self.facts.iter().map(|fact| Arc::new(Fact::clone(fact))).collect(),
            tokens: self.tokens.iter().map(Token::deep_copy).collect(),
            removed_facts: self.removed_facts.clone(),
            removed_tokens: self.removed_tokens.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct MemorySnapshot {
    #[serde(default)]
    facts: Vec<Arc<Fact>>,
    #[serde(default)]
    tokens: Vec<Token>,
}

impl From<MemorySnapshot> for WorkingMemory {
    fn from(snapshot: MemorySnapshot) -> Self {
        WorkingMemory::from_facts(&snapshot.facts).with_tokens(&snapshot.tokens)
    }
}

impl From<WorkingMemory> for MemorySnapshot {
    fn from(memory: WorkingMemory) -> Self {
        MemorySnapshot {
            facts: memory.facts.into_values().collect(),
            tokens: memory.tokens.into_values().collect(),
        }
    }
}
