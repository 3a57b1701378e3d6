//! Grouped aggregation over joined source facts
//!
//! An aggregation node groups source tokens under the main-side token they
//! join with, keeps one running value per aggregation variable, and emits
//! the group token while every threshold holds.
//!
//! ```text
//!   main tokens (group keys) ─ Left ──────┐
//!   source 0 tokens ──────── Right(0) ────┤  AggregateNode
//!   source 1 tokens ──────── Right(1) ────┘  AVG/SUM/COUNT/MIN/MAX
//! ```
//!
//! A source token is usually a single fact. When sources are linked to each
//! other (`p.employeeId == e.id`) the token carries the whole linked chain
//! and each variable reads the fact at its own slot; a fact reached through
//! several member tokens still counts once per group.
//!
//! SUM, COUNT and AVG update in O(1); MIN and MAX keep an ordered multiset
//! of the observed values so that removal stays logarithmic. Non-numeric
//! (or missing) field values are left out of every function except COUNT,
//! which counts member facts.

use serde::{Deserialize, Serialize};
use sift_types::{FactId, FactValue};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

use crate::memory::WorkingMemory;
use crate::rete_nodes::{Delta, NodeId, Port, Token, TokenId};
use crate::types::{Condition, Operator, compare_values};

/// Supported aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Avg,
    Sum,
    Count,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "AVG" | "AVERAGE" => Some(AggregateFunction::Avg),
            "SUM" => Some(AggregateFunction::Sum),
            "COUNT" => Some(AggregateFunction::Count),
            "MIN" => Some(AggregateFunction::Min),
            "MAX" => Some(AggregateFunction::Max),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }

    /// MIN/MAX have no value for an empty group
    pub fn needs_values(self) -> bool {
        matches!(self, AggregateFunction::Min | AggregateFunction::Max)
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `f64` with a total order, for the MIN/MAX multiset
#[derive(Debug, Clone, Copy)]
struct OrderedValue(f64);

impl PartialEq for OrderedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedValue {}

impl PartialOrd for OrderedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Incrementally maintained value of one aggregation variable
#[derive(Debug, Clone)]
pub struct RunningAggregate {
    function: AggregateFunction,
    /// Facts for COUNT, numeric values for every other function
    count: usize,
    sum: f64,
    ordered: BTreeMap<OrderedValue, usize>,
}

impl RunningAggregate {
    pub fn new(function: AggregateFunction) -> Self {
        Self { function, count: 0, sum: 0.0, ordered: BTreeMap::new() }
    }

    pub fn insert(&mut self, value: Option<f64>) {
        if self.function == AggregateFunction::Count {
            self.count += 1;
            return;
        }
        let Some(value) = value.filter(|v| !v.is_nan()) else {
            return;
        };
        self.count += 1;
        match self.function {
            AggregateFunction::Min | AggregateFunction::Max => {
                *self.ordered.entry(OrderedValue(value)).or_insert(0) += 1;
            }
            _ => self.sum += value,
        }
    }

    pub fn remove(&mut self, value: Option<f64>) {
        if self.function == AggregateFunction::Count {
            self.count = self.count.saturating_sub(1);
            return;
        }
        let Some(value) = value.filter(|v| !v.is_nan()) else {
            return;
        };
        self.count = self.count.saturating_sub(1);
        match self.function {
            AggregateFunction::Min | AggregateFunction::Max => {
                let key = OrderedValue(value);
                if let Some(n) = self.ordered.get_mut(&key) {
                    *n -= 1;
                    if *n == 0 {
                        self.ordered.remove(&key);
                    }
                }
            }
            _ => {
                self.sum -= value;
                // keep an emptied group exact
                if self.count == 0 {
                    self.sum = 0.0;
                }
            }
        }
    }

    /// Current value; `None` for MIN/MAX over an empty group
    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self) -> Option<f64> {
        match self.function {
            AggregateFunction::Sum => Some(self.sum),
            AggregateFunction::Count => Some(self.count as f64),
            AggregateFunction::Avg => Some(if self.count > 0 { self.sum / self.count as f64 } else { 0.0 }),
            AggregateFunction::Min => self.ordered.keys().next().map(|v| v.0),
            AggregateFunction::Max => self.ordered.keys().next_back().map(|v| v.0),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// One aggregation variable, e.g. `avg_sal = AVG(e.salary)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateVariable {
    pub name: String,
    pub function: AggregateFunction,
    /// Index of the source input feeding this variable
    pub source: usize,
    /// Position of the aggregated fact inside the source token
    pub slot: usize,
    /// Field read from each source fact; COUNT may omit it
    pub field: Option<String>,
}

/// `variable <op> value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub variable: usize,
    pub operator: Operator,
    pub value: f64,
}

impl Threshold {
    /// Default applied when a rule declares none: `>= 0` on the first variable
    pub fn default_for_first() -> Self {
        Self { variable: 0, operator: Operator::GreaterThanOrEqual, value: 0.0 }
    }
}

/// Equality between a main-side field and a source field, used to index
/// groups and source tokens by join key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquiKey {
    pub main_slot: usize,
    pub main_field: String,
    pub source_slot: usize,
    pub source_field: String,
}

/// One joined source input of an aggregation node
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSource {
    /// Reads main slots `0..k` followed by the source token at `k..`
    pub predicate: Option<Condition>,
    /// Present when every conjunct of the predicate is an equi-join
    pub key: Option<Vec<EquiKey>>,
}

impl AggregateSource {
    fn matches(&self, main: &Token, source: &Token) -> bool {
        let Some(predicate) = &self.predicate else {
            return true;
        };
        let arity = main.len();
        predicate.evaluate(&|slot| if slot < arity { main.fact(slot) } else { source.fact(slot - arity) })
    }

    fn key_of_source(&self, token: &Token) -> Option<String> {
        let key = self.key.as_ref()?;
        let mut parts = Vec::with_capacity(key.len());
        for part in key {
            parts.push(token.fact(part.source_slot)?.resolve_field(&part.source_field)?.canonical_key());
        }
        Some(parts.join("|"))
    }

    fn key_of_main(&self, token: &Token) -> Option<String> {
        let key = self.key.as_ref()?;
        let mut parts = Vec::with_capacity(key.len());
        for part in key {
            parts.push(token.fact(part.main_slot)?.resolve_field(&part.main_field)?.canonical_key());
        }
        Some(parts.join("|"))
    }
}

#[derive(Debug)]
struct Group {
    token: Token,
    members: Vec<BTreeSet<TokenId>>,
    /// Per variable: how many member tokens carry each aggregated fact
    multiplicity: Vec<BTreeMap<FactId, usize>>,
    running: Vec<RunningAggregate>,
    emitted: Option<Token>,
}

impl Group {
    fn new(token: Token, sources: usize, variables: &[AggregateVariable]) -> Self {
        Self {
            token,
            members: vec![BTreeSet::new(); sources],
            multiplicity: vec![BTreeMap::new(); variables.len()],
            running: variables.iter().map(|v| RunningAggregate::new(v.function)).collect(),
            emitted: None,
        }
    }

    fn apply(&mut self, variables: &[AggregateVariable], source: usize, member: &Token, insert: bool) {
        let id = member.id();
        let changed = if insert { self.members[source].insert(id) } else { self.members[source].remove(&id) };
        if !changed {
            return;
        }
        for (index, variable) in variables.iter().enumerate() {
            if variable.source != source {
                continue;
            }
            let Some(fact) = member.fact(variable.slot) else {
                continue;
            };
            let value = variable
                .field
                .as_deref()
                .and_then(|field| fact.resolve_field(field))
                .and_then(|v| v.as_f64());
            let counts = &mut self.multiplicity[index];
            if insert {
                let n = counts.entry(fact.id.clone()).or_insert(0);
                *n += 1;
                if *n == 1 {
                    self.running[index].insert(value);
                }
            } else if let Some(n) = counts.get_mut(&fact.id) {
                *n -= 1;
                if *n == 0 {
                    counts.remove(&fact.id);
                    self.running[index].remove(value);
                }
            }
        }
    }

    fn qualifies(&self, variables: &[AggregateVariable], thresholds: &[Threshold]) -> bool {
        let withheld = variables
            .iter()
            .zip(&self.running)
            .any(|(variable, running)| variable.function.needs_values() && running.value().is_none());
        if withheld {
            return false;
        }
        thresholds.iter().all(|threshold| {
            let Some(value) = self.running.get(threshold.variable).and_then(RunningAggregate::value) else {
                return false;
            };
            compare_values(&FactValue::Number(value), threshold.operator, &FactValue::Number(threshold.value))
                .unwrap_or(false)
        })
    }

    fn emission(&self, variables: &[AggregateVariable]) -> Token {
        let mut token = self.token.clone();
        token.values = variables
            .iter()
            .zip(&self.running)
            .filter_map(|(variable, running)| running.value().map(|v| (variable.name.clone(), v)))
            .collect();
        token
    }

    /// Emit or retract the group token when its qualification changes
    fn refresh(&mut self, variables: &[AggregateVariable], thresholds: &[Threshold]) -> Option<Delta> {
        match (self.qualifies(variables, thresholds), self.emitted.is_some()) {
            (true, false) => {
                let token = self.emission(variables);
                self.emitted = Some(token.clone());
                Some(Delta::Add(token))
            }
            (false, true) => self.emitted.take().map(Delta::Remove),
            _ => None,
        }
    }
}

/// Aggregation node: groups keyed by left tokens, one right input per source
#[derive(Debug)]
pub struct AggregateNode {
    pub node_id: NodeId,
    pub sources: Vec<AggregateSource>,
    pub variables: Vec<AggregateVariable>,
    pub thresholds: Vec<Threshold>,
    groups: BTreeMap<TokenId, Group>,
    tokens: Vec<BTreeMap<TokenId, Token>>,
    group_index: Vec<HashMap<String, BTreeSet<TokenId>>>,
    source_index: Vec<HashMap<String, BTreeSet<TokenId>>>,
}

impl AggregateNode {
    pub fn new(
        node_id: NodeId,
        sources: Vec<AggregateSource>,
        variables: Vec<AggregateVariable>,
        thresholds: Vec<Threshold>,
    ) -> Self {
        let n = sources.len();
        Self {
            node_id,
            sources,
            variables,
            thresholds,
            groups: BTreeMap::new(),
            tokens: vec![BTreeMap::new(); n],
            group_index: vec![HashMap::new(); n],
            source_index: vec![HashMap::new(); n],
        }
    }

    pub fn receive(&mut self, port: Port, delta: Delta) -> Vec<Delta> {
        match (port, delta) {
            (Port::Left, Delta::Add(token)) => self.group_add(token),
            (Port::Left, Delta::Remove(token)) => self.group_remove(&token),
            (Port::Right(source), Delta::Add(token)) if source < self.sources.len() => {
                self.source_add(source, token)
            }
            (Port::Right(source), Delta::Remove(token)) if source < self.sources.len() => {
                self.source_remove(source, &token.id())
            }
            (Port::Right(source), _) => {
                debug!(node_id = self.node_id, source = source, "Ignoring delta for unknown aggregation source");
                Vec::new()
            }
        }
    }

    fn group_add(&mut self, token: Token) -> Vec<Delta> {
        let id = token.id();
        if self.groups.contains_key(&id) {
            return Vec::new();
        }
        let mut group = Group::new(token, self.sources.len(), &self.variables);
        for (index, source) in self.sources.iter().enumerate() {
            let candidates: Vec<&Token> = match source.key.as_ref() {
                Some(_) => match source.key_of_main(&group.token) {
                    Some(key) => {
                        self.group_index[index].entry(key.clone()).or_default().insert(id.clone());
                        self.source_index[index]
                            .get(&key)
                            .into_iter()
                            .flatten()
                            .filter_map(|member| self.tokens[index].get(member))
                            .collect()
                    }
                    None => Vec::new(),
                },
                None => self.tokens[index].values().collect(),
            };
            for member in candidates {
                if source.matches(&group.token, member) {
                    group.apply(&self.variables, index, member, true);
                }
            }
        }
        let out = group.refresh(&self.variables, &self.thresholds);
        self.groups.insert(id, group);
        out.into_iter().collect()
    }

    fn group_remove(&mut self, token: &Token) -> Vec<Delta> {
        let id = token.id();
        let Some(mut group) = self.groups.remove(&id) else {
            return Vec::new();
        };
        for (index, source) in self.sources.iter().enumerate() {
            if let Some(key) = source.key_of_main(&group.token) {
                remove_indexed(&mut self.group_index[index], &key, &id);
            }
        }
        group.emitted.take().map(Delta::Remove).into_iter().collect()
    }

    fn candidate_groups(&self, source: usize, member: &Token) -> Vec<TokenId> {
        let stream = &self.sources[source];
        match stream.key.as_ref() {
            Some(_) => stream
                .key_of_source(member)
                .and_then(|key| self.group_index[source].get(&key))
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
            None => self.groups.keys().cloned().collect(),
        }
    }

    fn source_add(&mut self, source: usize, member: Token) -> Vec<Delta> {
        let id = member.id();
        if self.tokens[source].contains_key(&id) {
            return Vec::new();
        }
        if let Some(key) = self.sources[source].key_of_source(&member) {
            self.source_index[source].entry(key).or_default().insert(id.clone());
        }

        let mut out = Vec::new();
        for group_id in self.candidate_groups(source, &member) {
            let Some(group) = self.groups.get_mut(&group_id) else {
                continue;
            };
            if self.sources[source].matches(&group.token, &member) {
                group.apply(&self.variables, source, &member, true);
                out.extend(group.refresh(&self.variables, &self.thresholds));
            }
        }
        self.tokens[source].insert(id, member);
        out
    }

    fn source_remove(&mut self, source: usize, id: &TokenId) -> Vec<Delta> {
        let Some(member) = self.tokens[source].remove(id) else {
            return Vec::new();
        };
        let candidates = self.candidate_groups(source, &member);
        if let Some(key) = self.sources[source].key_of_source(&member) {
            remove_indexed(&mut self.source_index[source], &key, id);
        }

        let mut out = Vec::new();
        for group_id in candidates {
            let Some(group) = self.groups.get_mut(&group_id) else {
                continue;
            };
            if group.members[source].contains(id) {
                group.apply(&self.variables, source, &member, false);
                out.extend(group.refresh(&self.variables, &self.thresholds));
            }
        }
        out
    }

    pub fn outputs(&self) -> Vec<Token> {
        self.groups.values().filter_map(|g| g.emitted.clone()).collect()
    }

    /// Group keys and source tokens
    pub fn working_memory(&self) -> WorkingMemory {
        WorkingMemory::new()
            .with_tokens(self.tokens.iter().flat_map(|tokens| tokens.values()))
            .with_tokens(self.groups.values().map(|g| &g.token))
    }

    /// Group key or source token held under `id`
    pub fn token(&self, id: &TokenId) -> Option<&Token> {
        self.groups
            .get(id)
            .map(|group| &group.token)
            .or_else(|| self.tokens.iter().find_map(|tokens| tokens.get(id)))
    }

    /// Current value of `variable` for the group keyed by `group`
    pub fn group_value(&self, group: &TokenId, variable: &str) -> Option<f64> {
        let index = self.variables.iter().position(|v| v.name == variable)?;
        self.groups.get(group)?.running.get(index)?.value()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

fn remove_indexed<T: Ord>(index: &mut HashMap<String, BTreeSet<T>>, key: &str, item: &T) {
    if let Some(set) = index.get_mut(key) {
        set.remove(item);
        if set.is_empty() {
            index.remove(key);
        }
    }
}
