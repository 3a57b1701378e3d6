//! Terminal nodes and the activation callback surface

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::memory::WorkingMemory;
use crate::rete_nodes::{Delta, NodeId, Token, TokenId};

/// One job invocation of a rule's action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// What a rule asks the embedding driver to do when it fires. The core
/// never interprets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub jobs: Vec<JobCall>,
}

impl ActionDescriptor {
    pub fn job(name: impl Into<String>) -> Self {
        Self { jobs: vec![JobCall { name: name.into(), args: Vec::new() }] }
    }
}

/// A rule instance firing, as handed to the [`ActivationHandler`]
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub rule_id: String,
    pub token: Token,
    pub action: ActionDescriptor,
}

/// Receives activation changes once a submission has been committed, in the
/// order the tokens were produced
pub trait ActivationHandler: Send {
    fn activated(&mut self, activation: &Activation);

    fn deactivated(&mut self, _activation: &Activation) {}
}

impl<F> ActivationHandler for F
where
    F: FnMut(&Activation) + Send,
{
    fn activated(&mut self, activation: &Activation) {
        self(activation);
    }
}

/// Leaf of a rule; its memory is the set of active tokens
#[derive(Debug)]
pub struct TerminalNode {
    pub node_id: NodeId,
    pub rule_id: String,
    pub action: ActionDescriptor,
    activations: BTreeMap<TokenId, Token>,
}

impl TerminalNode {
    pub fn new(node_id: NodeId, rule_id: impl Into<String>, action: ActionDescriptor) -> Self {
        Self { node_id, rule_id: rule_id.into(), action, activations: BTreeMap::new() }
    }

    /// Record the change; the returned deltas are the activation changes
    pub fn receive(&mut self, delta: Delta) -> Vec<Delta> {
        match delta {
            Delta::Add(token) => {
                let id = token.id();
                if self.activations.contains_key(&id) {
                    return Vec::new();
                }
                self.activations.insert(id, token.clone());
                vec![Delta::Add(token)]
            }
            Delta::Remove(token) => match self.activations.remove(&token.id()) {
                Some(stored) => vec![Delta::Remove(stored)],
                None => Vec::new(),
            },
        }
    }

    pub fn activations(&self) -> impl Iterator<Item = &Token> {
        self.activations.values()
    }

    pub fn activation(&self, id: &TokenId) -> Option<&Token> {
        self.activations.get(id)
    }

    pub fn activation_count(&self) -> usize {
        self.activations.len()
    }

    pub fn outputs(&self) -> Vec<Token> {
        Vec::new()
    }

    pub fn working_memory(&self) -> WorkingMemory {
        WorkingMemory::new().with_tokens(self.activations.values())
    }
}
