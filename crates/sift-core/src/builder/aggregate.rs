//! Aggregation stages
//!
//! Aggregated patterns are grouped into sources: patterns linked to each
//! other by a condition that reads no grouping variable form one source and
//! are joined into a source chain. Each source feeds one right input of the
//! aggregation node. Conditions between a source and the grouping variables
//! become that source's predicate; when they are all field equalities the
//! node indexes groups and source tokens by join key.

use std::collections::{BTreeMap, HashMap};

use crate::aggregation::{AggregateSource, AggregateVariable, EquiKey, Threshold};
use crate::error::{SiftError, SiftResult};
use crate::rete_nodes::Port;
use crate::types::Condition;

use super::{Blueprint, Compiler, Conjunct, Role, Stage, beta, predicate_key};

/// Group source variables that are linked by a condition
fn components(sources: &[usize], links: &[Conjunct]) -> Vec<Vec<usize>> {
    let mut component: BTreeMap<usize, usize> = sources.iter().map(|&v| (v, v)).collect();
    for link in links {
        let ids: Vec<usize> = link.vars.iter().filter_map(|v| component.get(v).copied()).collect();
        let Some(&target) = ids.iter().min() else {
            continue;
        };
        for value in component.values_mut() {
            if ids.contains(value) {
                *value = target;
            }
        }
    }
    let mut grouped: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &var in sources {
        if let Some(&root) = component.get(&var) {
            grouped.entry(root).or_default().push(var);
        }
    }
    grouped.into_values().collect()
}

/// Join key of a source predicate, if it is a conjunction of equalities
/// between a grouping field and a source field
fn equi_keys(conditions: &[Condition], main_len: usize) -> Option<Vec<EquiKey>> {
    if conditions.is_empty() {
        return None;
    }
    conditions
        .iter()
        .map(|condition| {
            let (a, b) = condition.as_equi_join()?;
            let ((main_slot, main_field), (source_slot, source_field)) = match (a.0 < main_len, b.0 < main_len) {
                (true, false) => (a, b),
                (false, true) => (b, a),
                _ => return None,
            };
            Some(EquiKey {
                main_slot,
                main_field: main_field.to_string(),
                source_slot: source_slot - main_len,
                source_field: source_field.to_string(),
            })
        })
        .collect()
}

impl Compiler<'_> {
    /// Plan the source chains and the aggregation node below `main`.
    /// `links` holds every multi-variable condition that reads a source.
    pub(super) fn aggregate_stage(
        &mut self,
        main: Stage,
        order: &[usize],
        links: Vec<Conjunct>,
        thresholds: Vec<Threshold>,
    ) -> SiftResult<Stage> {
        let sources = self.indices(Role::Source);
        let (source_links, mixed): (Vec<Conjunct>, Vec<Conjunct>) =
            links.into_iter().partition(|c| c.vars.iter().all(|&v| self.variables[v].role == Role::Source));
        let groups = components(&sources, &source_links);

        let mut predicates: Vec<Vec<&Conjunct>> = vec![Vec::new(); groups.len()];
        for conjunct in &mixed {
            let reads: Vec<usize> =
                conjunct.vars.iter().copied().filter(|&v| self.variables[v].role == Role::Source).collect();
            let owner = groups.iter().position(|g| reads.iter().all(|v| g.contains(v)));
            match owner {
                Some(index) => predicates[index].push(conjunct),
                None => {
                    return Err(SiftError::malformed(format!(
                        "condition {} links independent aggregated patterns",
                        conjunct.condition
                    )));
                }
            }
        }

        let main_positions: HashMap<usize, usize> =
            order.iter().enumerate().map(|(pos, &var)| (var, pos)).collect();
        let mut inputs = vec![(main.upstream(), Port::Left)];
        let mut hasher = self.beta_hasher("aggregate").parent(main.signature);
        let mut planned_sources = Vec::with_capacity(groups.len());
        let mut slots: HashMap<usize, (usize, usize)> = HashMap::new();

        for (index, group) in groups.iter().enumerate() {
            if !self.aggregations.iter().any(|a| group.contains(&a.variable)) {
                let names: Vec<&str> = group.iter().map(|&v| self.variables[v].name.as_str()).collect();
                return Err(SiftError::malformed(format!(
                    "aggregated pattern {} feeds no aggregation variable",
                    names.join(", ")
                )));
            }
            let chain_links: Vec<Conjunct> =
                source_links.iter().filter(|c| c.vars.iter().all(|v| group.contains(v))).cloned().collect();
            let chain_order = beta::selectivity_order(group, &chain_links, self.config);
            let stage = self.join_chain(&chain_order, chain_links)?;

            let mut positions = main_positions.clone();
            for (pos, &var) in chain_order.iter().enumerate() {
                positions.insert(var, order.len() + pos);
                slots.insert(var, (index, pos));
            }
            let conditions: Vec<Condition> = predicates[index].iter().map(|c| c.remap(&positions)).collect();
            let key = equi_keys(&conditions, order.len());
            let predicate = Condition::all(conditions);

            hasher = hasher.parent(stage.signature).part(predicate_key(predicate.as_ref()));
            inputs.push((stage.upstream(), Port::Right(index)));
            planned_sources.push(AggregateSource { predicate, key });
        }

        let mut variables = Vec::with_capacity(self.aggregations.len());
        for aggregation in &self.aggregations {
            let Some(&(source, slot)) = slots.get(&aggregation.variable) else {
                return Err(SiftError::malformed(format!("aggregation '{}' has no source", aggregation.name)));
            };
            hasher = hasher
                .part(aggregation.name.as_str())
                .part(aggregation.function.name())
                .part(source)
                .part(slot)
                .part(aggregation.field.as_str());
            variables.push(AggregateVariable {
                name: aggregation.name.clone(),
                function: aggregation.function,
                source,
                slot,
                field: Some(aggregation.field.clone()),
            });
        }

        let thresholds = if thresholds.is_empty() { vec![Threshold::default_for_first()] } else { thresholds };
        for threshold in &thresholds {
            hasher = hasher.part(threshold.variable).part(threshold.operator.symbol()).part(threshold.value.to_bits());
        }

        let signature = hasher.finish();
        Ok(self.plan.push(
            signature,
            inputs,
            Blueprint::Aggregate { sources: planned_sources, variables, thresholds },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Operand, Operator};

    fn link(a: usize, b: usize) -> Conjunct {
        Conjunct::new(Condition::compare(
            Operand::Field { slot: a, field: "employeeId".into() },
            Operator::Equal,
            Operand::Field { slot: b, field: "id".into() },
        ))
    }

    #[test]
    fn linked_sources_form_one_component() {
        assert_eq!(components(&[1, 2, 3], &[link(3, 1)]), vec![vec![1, 3], vec![2]]);
        assert_eq!(components(&[1, 2, 3], &[link(3, 2), link(2, 1)]), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn join_keys_need_every_conjunct_to_be_an_equality() {
        let equality = Condition::compare(
            Operand::Field { slot: 1, field: "deptId".into() },
            Operator::Equal,
            Operand::Field { slot: 0, field: "id".into() },
        );
        let keys = equi_keys(std::slice::from_ref(&equality), 1).unwrap();
        assert_eq!(keys[0].main_field, "id");
        assert_eq!(keys[0].source_slot, 0);

        let range = Condition::compare(
            Operand::Field { slot: 1, field: "salary".into() },
            Operator::GreaterThan,
            Operand::Field { slot: 0, field: "floor".into() },
        );
        assert!(equi_keys(&[equality, range], 1).is_none());
    }
}
