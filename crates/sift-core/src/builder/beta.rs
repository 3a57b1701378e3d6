//! Selectivity-ordered join cascades
//!
//! Patterns taking part in an equi-join are assumed to be more selective
//! than the rest and are joined first. After the first pattern, patterns
//! connected to the already bound ones by a join condition are preferred,
//! so cross products are pushed to the end of the cascade. Every join holds
//! the multi-variable conditions whose variables it is the first to bind.

use std::collections::{BTreeSet, HashMap};

use crate::config::EngineConfig;
use crate::error::{SiftError, SiftResult};
use crate::rete_nodes::Port;
use crate::types::Condition;

use super::{Blueprint, Compiler, Conjunct, Stage, predicate_key};

/// Greedy join order over `variables`; ties keep declaration order
pub(super) fn selectivity_order(variables: &[usize], links: &[Conjunct], config: &EngineConfig) -> Vec<usize> {
    let estimate = |var: usize| {
        if links.iter().any(|c| c.vars.contains(&var) && c.is_equi_join()) {
            config.join_selectivity
        } else {
            config.cross_selectivity
        }
    };
    let mut remaining: Vec<(usize, f64)> = variables.iter().map(|&var| (var, estimate(var))).collect();
    let mut bound = BTreeSet::new();
    let mut order = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let connected = |var: usize| {
            links.iter().any(|c| c.vars.contains(&var) && c.vars.iter().any(|v| bound.contains(v)))
        };
        let mut best = 0;
        for candidate in 1..remaining.len() {
            let (var, selectivity) = remaining[candidate];
            let (best_var, best_selectivity) = remaining[best];
            let better = match (connected(var), connected(best_var)) {
                (true, false) => true,
                (false, true) => false,
                _ => selectivity < best_selectivity,
            };
            if better {
                best = candidate;
            }
        }
        let (var, _) = remaining.remove(best);
        bound.insert(var);
        order.push(var);
    }
    order
}

impl Compiler<'_> {
    /// Plan `order[0] ⋈ order[1] ⋈ ...`, attaching each link to the first
    /// join that binds all of its variables
    pub(super) fn join_chain(&mut self, order: &[usize], links: Vec<Conjunct>) -> SiftResult<Stage> {
        let Some((&first, rest)) = order.split_first() else {
            return Err(SiftError::malformed("join over no patterns"));
        };
        let mut positions = HashMap::from([(first, 0)]);
        let mut pending = links;
        let mut stage = self.variable_chain(first);

        for &var in rest {
            let right = self.variable_chain(var);
            positions.insert(var, positions.len());
            let (ready, later): (Vec<Conjunct>, Vec<Conjunct>) =
                pending.into_iter().partition(|c| c.vars.iter().all(|v| positions.contains_key(v)));
            pending = later;
            let predicate = Condition::all(ready.iter().map(|c| c.remap(&positions)).collect());
            stage = self.join(stage, right, predicate);
        }

        if let Some(orphan) = pending.first() {
            return Err(SiftError::malformed(format!("condition {} spans unrelated patterns", orphan.condition)));
        }
        Ok(stage)
    }

    /// The join's signature covers both inputs, so differently filtered
    /// inputs never share a join memory
    fn join(&mut self, left: Stage, right: Stage, predicate: Option<Condition>) -> Stage {
        let signature = self
            .beta_hasher("join")
            .parent(left.signature)
            .parent(right.signature)
            .part(predicate_key(predicate.as_ref()))
            .finish();
        self.plan.push(
            signature,
            vec![(left.upstream(), Port::Left), (right.upstream(), Port::Right(0))],
            Blueprint::Join(predicate),
        )
    }
}
