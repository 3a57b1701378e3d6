//! Beta Network Implementation for the RETE Network
//!
//! Beta nodes combine a stream of tokens arriving on their left input with
//! facts arriving on their right input.
//!
//! ```text
//!   left tokens (P1..Pk)      right facts (Pk+1)
//!            \                     /
//!             \                   /
//!          +---------------------------+
//!          | left memory | right memory|
//!          |      predicate(t, f)      |
//!          +---------------------------+
//!                       |
//!            join:   t ++ f for every match
//!            exists: t while #matches > 0
//!            not:    t while #matches == 0
//! ```
//!
//! The join predicate reads slots `0..k` from the left token and slot `k`
//! from the right fact. Removal never needs a parent map: facts are
//! immutable, so re-evaluating the predicate yields exactly the pairs that
//! were emitted when they were added.

use sift_types::{Fact, FactId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::memory::WorkingMemory;
use crate::rete_nodes::{Delta, NodeId, Port, Token, TokenId};
use crate::types::Condition;

/// Evaluate a beta predicate on a left token extended by `right`
pub(crate) fn pair_matches(predicate: Option<&Condition>, left: &Token, right: &Fact) -> bool {
    let Some(predicate) = predicate else {
        return true;
    };
    let arity = left.len();
    predicate.evaluate(&|slot| if slot == arity { Some(right) } else { left.fact(slot) })
}

/// Combines left tokens with right facts
#[derive(Debug)]
pub struct JoinNode {
    pub node_id: NodeId,
    pub predicate: Option<Condition>,
    left: BTreeMap<TokenId, Token>,
    right: BTreeMap<FactId, Arc<Fact>>,
}

impl JoinNode {
    pub fn new(node_id: NodeId, predicate: Option<Condition>) -> Self {
        Self { node_id, predicate, left: BTreeMap::new(), right: BTreeMap::new() }
    }

    pub fn receive(&mut self, port: Port, delta: Delta) -> Vec<Delta> {
        match (port, delta) {
            (Port::Left, Delta::Add(token)) => self.left_add(token),
            (Port::Left, Delta::Remove(token)) => self.left_remove(&token),
            (Port::Right(_), Delta::Add(token)) => match token.head() {
                Some(fact) => self.right_add(fact.clone()),
                None => Vec::new(),
            },
            (Port::Right(_), Delta::Remove(token)) => match token.head() {
                Some(fact) => self.right_remove(&fact.id),
                None => Vec::new(),
            },
        }
    }

    fn left_add(&mut self, token: Token) -> Vec<Delta> {
        let id = token.id();
        if self.left.contains_key(&id) {
            return Vec::new();
        }
        let out: Vec<Delta> = self
            .right
            .values()
            .filter(|fact| pair_matches(self.predicate.as_ref(), &token, fact))
            .map(|fact| Delta::Add(token.extend(fact.clone())))
            .collect();
        self.left.insert(id, token);
        out
    }

    fn left_remove(&mut self, token: &Token) -> Vec<Delta> {
        let Some(token) = self.left.remove(&token.id()) else {
            return Vec::new();
        };
        self.right
            .values()
            .filter(|fact| pair_matches(self.predicate.as_ref(), &token, fact))
            .map(|fact| Delta::Remove(token.extend(fact.clone())))
            .collect()
    }

    fn right_add(&mut self, fact: Arc<Fact>) -> Vec<Delta> {
        if self.right.contains_key(&fact.id) {
            return Vec::new();
        }
        let out: Vec<Delta> = self
            .left
            .values()
            .filter(|token| pair_matches(self.predicate.as_ref(), token, &fact))
            .map(|token| Delta::Add(token.extend(fact.clone())))
            .collect();
        debug!(node_id = self.node_id, fact_id = %fact.id, matches = out.len(), "Join right activation");
        self.right.insert(fact.id.clone(), fact);
        out
    }

    fn right_remove(&mut self, fact_id: &str) -> Vec<Delta> {
        let Some(fact) = self.right.remove(fact_id) else {
            return Vec::new();
        };
        self.left
            .values()
            .filter(|token| pair_matches(self.predicate.as_ref(), token, &fact))
            .map(|token| Delta::Remove(token.extend(fact.clone())))
            .collect()
    }

    pub fn outputs(&self) -> Vec<Token> {
        let mut out = Vec::new();
        for token in self.left.values() {
            for fact in self.right.values() {
                if pair_matches(self.predicate.as_ref(), token, fact) {
                    out.push(token.extend(fact.clone()));
                }
            }
        }
        out
    }

    pub fn working_memory(&self) -> WorkingMemory {
        WorkingMemory::from_facts(self.right.values()).with_tokens(self.left.values())
    }

    pub fn left_token(&self, id: &TokenId) -> Option<&Token> {
        self.left.get(id)
    }

    pub fn right_fact(&self, fact_id: &str) -> Option<&Arc<Fact>> {
        self.right.get(fact_id)
    }

    pub fn left_len(&self) -> usize {
        self.left.len()
    }

    pub fn right_len(&self) -> usize {
        self.right.len()
    }
}

#[derive(Debug)]
struct LeftEntry {
    token: Token,
    matches: usize,
}

/// Existential (`negated == false`) or negated existential join. Emits left
/// tokens unchanged; right facts only gate them.
#[derive(Debug)]
pub struct ExistsNode {
    pub node_id: NodeId,
    pub negated: bool,
    pub predicate: Option<Condition>,
    left: BTreeMap<TokenId, LeftEntry>,
    right: BTreeMap<FactId, Arc<Fact>>,
}

impl ExistsNode {
    pub fn new(node_id: NodeId, negated: bool, predicate: Option<Condition>) -> Self {
        Self { node_id, negated, predicate, left: BTreeMap::new(), right: BTreeMap::new() }
    }

    fn passes(&self, matches: usize) -> bool {
        if self.negated { matches == 0 } else { matches > 0 }
    }

    pub fn receive(&mut self, port: Port, delta: Delta) -> Vec<Delta> {
        match (port, delta) {
            (Port::Left, Delta::Add(token)) => self.left_add(token),
            (Port::Left, Delta::Remove(token)) => self.left_remove(&token),
            (Port::Right(_), Delta::Add(token)) => match token.head() {
                Some(fact) => self.right_add(fact.clone()),
                None => Vec::new(),
            },
            (Port::Right(_), Delta::Remove(token)) => match token.head() {
                Some(fact) => self.right_remove(&fact.id),
                None => Vec::new(),
            },
        }
    }

    fn left_add(&mut self, token: Token) -> Vec<Delta> {
        let id = token.id();
        if self.left.contains_key(&id) {
            return Vec::new();
        }
        let matches = self
            .right
            .values()
            .filter(|fact| pair_matches(self.predicate.as_ref(), &token, fact))
            .count();
        let out = if self.passes(matches) { vec![Delta::Add(token.clone())] } else { Vec::new() };
        self.left.insert(id, LeftEntry { token, matches });
        out
    }

    fn left_remove(&mut self, token: &Token) -> Vec<Delta> {
        match self.left.remove(&token.id()) {
            Some(entry) if self.passes(entry.matches) => vec![Delta::Remove(entry.token)],
            _ => Vec::new(),
        }
    }

    fn right_add(&mut self, fact: Arc<Fact>) -> Vec<Delta> {
        if self.right.contains_key(&fact.id) {
            return Vec::new();
        }
        let negated = self.negated;
        let mut out = Vec::new();
        for entry in self.left.values_mut() {
            if pair_matches(self.predicate.as_ref(), &entry.token, &fact) {
                entry.matches += 1;
                if entry.matches == 1 {
                    out.push(if negated {
                        Delta::Remove(entry.token.clone())
                    } else {
                        Delta::Add(entry.token.clone())
                    });
                }
            }
        }
        self.right.insert(fact.id.clone(), fact);
        out
    }

    fn right_remove(&mut self, fact_id: &str) -> Vec<Delta> {
        let Some(fact) = self.right.remove(fact_id) else {
            return Vec::new();
        };
        let negated = self.negated;
        let mut out = Vec::new();
        for entry in self.left.values_mut() {
            if pair_matches(self.predicate.as_ref(), &entry.token, &fact) {
                entry.matches = entry.matches.saturating_sub(1);
                if entry.matches == 0 {
                    out.push(if negated {
                        Delta::Add(entry.token.clone())
                    } else {
                        Delta::Remove(entry.token.clone())
                    });
                }
            }
        }
        out
    }

    pub fn outputs(&self) -> Vec<Token> {
        self.left
            .values()
            .filter(|entry| self.passes(entry.matches))
            .map(|entry| entry.token.clone())
            .collect()
    }

    pub fn working_memory(&self) -> WorkingMemory {
        WorkingMemory::from_facts(self.right.values()).with_tokens(self.left.values().map(|e| &e.token))
    }

    pub fn left_token(&self, id: &TokenId) -> Option<&Token> {
        self.left.get(id).map(|entry| &entry.token)
    }

    pub fn right_fact(&self, fact_id: &str) -> Option<&Arc<Fact>> {
        self.right.get(fact_id)
    }

    /// Number of right facts currently matching `token`
    pub fn match_count(&self, token: &TokenId) -> Option<usize> {
        self.left.get(token).map(|entry| entry.matches)
    }
}
