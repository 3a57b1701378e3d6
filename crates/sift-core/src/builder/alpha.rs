//! Alpha chains
//!
//! The single-variable conditions on a pattern are ordered by the hash of
//! their canonical keys and deduplicated, so the textual order of a
//! conjunction never matters. Each prefix of the ordered list is one alpha
//! node whose signature folds in its parent's, which makes two rules with a
//! common prefix share exactly that prefix.

use crate::alpha_memory::AlphaTest;
use crate::node_sharing::{SignatureHasher, key_hash};
use crate::rete_nodes::Port;
use crate::types::Condition;

use super::{Blueprint, Compiler, Stage, Upstream};

/// Signature of the entry node of `type_name`
pub fn type_signature(type_name: &str) -> u64 {
    SignatureHasher::new("type").part(type_name).finish()
}

/// Order conditions by canonical hash and drop duplicates
fn canonical_tests(filters: &[Condition]) -> Vec<AlphaTest> {
    let mut keyed: Vec<(u64, String, &Condition)> = filters
        .iter()
        .map(|condition| {
            let key = condition.canonical_key();
            (key_hash(&key), key, condition)
        })
        .collect();
    keyed.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    keyed.dedup_by(|a, b| a.1 == b.1);
    keyed.into_iter().map(|(_, _, condition)| AlphaTest::Filter(condition.clone())).collect()
}

impl Compiler<'_> {
    /// Chain for a main or source variable, using its hoisted filters
    pub(super) fn variable_chain(&mut self, variable: usize) -> Stage {
        let type_name = self.variables[variable].type_name.clone();
        let filters = self.filters.get(&variable).cloned().unwrap_or_default();
        self.alpha_chain(&type_name, &filters)
    }

    /// Plan the alpha chain below the type node of `type_name`. A variable
    /// without filters gets a pass-through node so that every join input is
    /// an alpha node.
    pub(super) fn alpha_chain(&mut self, type_name: &str, filters: &[Condition]) -> Stage {
        let mut tests = canonical_tests(filters);
        if tests.is_empty() {
            tests.push(AlphaTest::PassThrough);
        }

        let mut upstream = Upstream::Type(type_name.to_string());
        let mut stage = Stage { index: 0, signature: type_signature(type_name) };
        for test in tests {
            let signature = self.alpha_hasher("alpha").parent(stage.signature).part(test.canonical_key()).finish();
            stage = self.plan.push(signature, vec![(upstream, Port::Left)], Blueprint::Alpha(test));
            upstream = stage.upstream();
        }
        stage
    }
}
