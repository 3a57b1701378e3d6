//! Rule compilation
//!
//! Compiling a rule is pure: the rule is validated against the declared
//! types and lowered into a [`RulePlan`], a topologically ordered list of
//! node blueprints tagged with their semantic signatures. The network then
//! materialises the plan and reuses every node whose signature it already
//! knows. A rule that fails to compile never touches the network.
//!
//! ```text
//!   type ─ alpha* ─┐
//!   type ─ alpha* ─┴─ join ─ join ─ exists* ─ aggregate? ─ terminal
//!                          type ─ alpha* ─┘
//! ```
//!
//! Constraints are split conjunct by conjunct. A conjunct reading a single
//! variable becomes an alpha filter on that variable; a conjunct reading
//! several variables is attached to the first join where all of them are
//! bound. Disjunctions are never decomposed.

mod aggregate;
mod alpha;
mod beta;
mod exists;

pub use alpha::type_signature;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, instrument};

use crate::aggregation::{AggregateFunction, AggregateNode, AggregateSource, AggregateVariable, Threshold};
use crate::alpha_memory::{AlphaNode, AlphaTest};
use crate::ast::{Expr, RuleExpression, TypeDefinition, TypedVariable, VariableDecl};
use crate::beta_network::{ExistsNode, JoinNode};
use crate::config::EngineConfig;
use crate::error::{SiftError, SiftResult};
use crate::node_sharing::SignatureHasher;
use crate::rete_nodes::{NodeId, NodeKind, NodeState, Port};
use crate::terminal::{ActionDescriptor, TerminalNode};
use crate::types::{Condition, Operand, Operator};

/// Where a planned node takes one of its inputs from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream {
    /// Entry node of a declared type
    Type(String),
    /// Earlier node of the same plan
    Planned(usize),
}

/// Node state to create when no node with the same signature exists yet
#[derive(Debug, Clone)]
pub enum Blueprint {
    Alpha(AlphaTest),
    Join(Option<Condition>),
    Exists {
        negated: bool,
        predicate: Option<Condition>,
    },
    Aggregate {
        sources: Vec<AggregateSource>,
        variables: Vec<AggregateVariable>,
        thresholds: Vec<Threshold>,
    },
    Terminal {
        rule_id: String,
        action: ActionDescriptor,
    },
}

impl Blueprint {
    pub fn kind(&self) -> NodeKind {
        match self {
            Blueprint::Alpha(_) => NodeKind::Alpha,
            Blueprint::Join(_) => NodeKind::Join,
            Blueprint::Exists { .. } => NodeKind::Exists,
            Blueprint::Aggregate { .. } => NodeKind::Aggregate,
            Blueprint::Terminal { .. } => NodeKind::Terminal,
        }
    }

    pub fn instantiate(self, node_id: NodeId) -> NodeState {
        match self {
            Blueprint::Alpha(test) => NodeState::Alpha(AlphaNode::new(node_id, test)),
            Blueprint::Join(predicate) => NodeState::Join(JoinNode::new(node_id, predicate)),
            Blueprint::Exists { negated, predicate } => {
                NodeState::Exists(ExistsNode::new(node_id, negated, predicate))
            }
            Blueprint::Aggregate { sources, variables, thresholds } => {
                NodeState::Aggregate(AggregateNode::new(node_id, sources, variables, thresholds))
            }
            Blueprint::Terminal { rule_id, action } => {
                NodeState::Terminal(TerminalNode::new(node_id, rule_id, action))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub signature: u64,
    /// Incoming edges, in the order they are attached
    pub inputs: Vec<(Upstream, Port)>,
    pub blueprint: Blueprint,
}

/// Compiled form of one rule; the terminal is always the last node
#[derive(Debug, Clone)]
pub struct RulePlan {
    pub rule_id: String,
    pub action: ActionDescriptor,
    pub nodes: Vec<PlannedNode>,
}

impl RulePlan {
    fn new(rule_id: &str, action: ActionDescriptor) -> Self {
        Self { rule_id: rule_id.to_string(), action, nodes: Vec::new() }
    }

    /// Append a node unless the plan already holds one with this signature
    fn push(&mut self, signature: u64, inputs: Vec<(Upstream, Port)>, blueprint: Blueprint) -> Stage {
        if let Some(index) = self.nodes.iter().position(|n| n.signature == signature) {
            return Stage { index, signature };
        }
        self.nodes.push(PlannedNode { signature, inputs, blueprint });
        Stage { index: self.nodes.len() - 1, signature }
    }

    /// Signatures of the planned nodes of `kind`
    pub fn signatures(&self, kind: NodeKind) -> Vec<u64> {
        self.nodes.iter().filter(|n| n.blueprint.kind() == kind).map(|n| n.signature).collect()
    }
}

/// Last node of a partially built chain
#[derive(Debug, Clone, Copy)]
struct Stage {
    index: usize,
    signature: u64,
}

impl Stage {
    fn upstream(self) -> Upstream {
        Upstream::Planned(self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Bound by the main patterns; part of every emitted token
    Main,
    /// Aggregated pattern of an aggregation rule
    Source,
    /// Introduced by an exists constraint; visible only inside it
    Exists,
}

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    type_name: String,
    role: Role,
}

/// Which variables a lowered condition may reference
#[derive(Debug, Clone, Copy)]
enum Scope {
    Rule,
    Exists(usize),
}

/// A multi-variable condition. Its `Operand::Field` slots are variable
/// indices until it is remapped onto the node that evaluates it.
#[derive(Debug, Clone)]
struct Conjunct {
    condition: Condition,
    vars: BTreeSet<usize>,
}

impl Conjunct {
    fn new(condition: Condition) -> Self {
        let vars = condition.slots();
        Self { condition, vars }
    }

    fn is_equi_join(&self) -> bool {
        self.condition.as_equi_join().is_some()
    }

    fn remap(&self, positions: &HashMap<usize, usize>) -> Condition {
        self.condition.remap_slots(&|slot| positions.get(&slot).copied().unwrap_or(slot))
    }
}

#[derive(Debug, Clone)]
struct Aggregation {
    name: String,
    function: AggregateFunction,
    variable: usize,
    field: String,
}

#[derive(Debug)]
struct ExistsClause {
    variable: usize,
    negated: bool,
    filters: Vec<Condition>,
    predicate: Vec<Conjunct>,
}

struct Compiler<'a> {
    rule: &'a RuleExpression,
    schema: &'a HashMap<String, TypeDefinition>,
    config: &'a EngineConfig,
    variables: Vec<Variable>,
    aggregations: Vec<Aggregation>,
    /// Single-variable conditions per variable, already remapped to slot 0
    filters: BTreeMap<usize, Vec<Condition>>,
    plan: RulePlan,
}

/// Compile `rule` against the declared types
#[instrument(level = "debug", skip_all, fields(rule_id = %rule.rule_id))]
pub fn compile_rule(
    rule: &RuleExpression,
    schema: &HashMap<String, TypeDefinition>,
    config: &EngineConfig,
) -> SiftResult<RulePlan> {
    if rule.rule_id.is_empty() {
        return Err(SiftError::malformed("rule without an id"));
    }
    let action = rule.action.to_descriptor().map_err(|e| e.in_rule(&rule.rule_id))?;
    let compiler = Compiler {
        rule,
        schema,
        config,
        variables: Vec::new(),
        aggregations: Vec::new(),
        filters: BTreeMap::new(),
        plan: RulePlan::new(&rule.rule_id, action),
    };
    let plan = compiler.compile().map_err(|e| e.in_rule(&rule.rule_id))?;
    debug!(nodes = plan.nodes.len(), "Rule compiled");
    Ok(plan)
}

/// Split a pure conjunction into its conjuncts; anything else is one conjunct
fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Logical { left, operations } if operations.iter().all(|op| is_and(&op.op)) => {
            let mut out = conjuncts(left);
            for operation in operations {
                out.extend(conjuncts(&operation.right));
            }
            out
        }
        other => vec![other],
    }
}

fn is_and(op: &str) -> bool {
    op.eq_ignore_ascii_case("AND") || op == "&&"
}

fn is_or(op: &str) -> bool {
    op.eq_ignore_ascii_case("OR") || op == "||"
}

fn predicate_key(predicate: Option<&Condition>) -> String {
    predicate.map_or_else(|| "true".to_string(), Condition::canonical_key)
}

impl Compiler<'_> {
    fn compile(mut self) -> SiftResult<RulePlan> {
        self.declare_patterns()?;
        let (links, exists, thresholds) = self.classify()?;

        let main = self.indices(Role::Main);
        let (main_links, source_links): (Vec<Conjunct>, Vec<Conjunct>) = links
            .into_iter()
            .partition(|c| c.vars.iter().all(|&v| self.variables[v].role == Role::Main));

        let order = beta::selectivity_order(&main, &main_links, self.config);
        let mut stage = self.join_chain(&order, main_links)?;
        for clause in exists {
            stage = self.exists_stage(stage, &order, clause);
        }
        if !self.aggregations.is_empty() {
            stage = self.aggregate_stage(stage, &order, source_links, thresholds)?;
        }

        let rule_id = self.rule.rule_id.clone();
        let signature = SignatureHasher::new("terminal").part(rule_id.as_str()).finish();
        let action = self.plan.action.clone();
        self.plan.push(signature, vec![(stage.upstream(), Port::Left)], Blueprint::Terminal { rule_id, action });
        Ok(self.plan)
    }

    /// Bind every pattern variable. In an aggregation rule the first block
    /// holds the grouping variables and later blocks the aggregated sources.
    fn declare_patterns(&mut self) -> SiftResult<()> {
        let rule = self.rule;
        if rule.patterns.is_empty() {
            return Err(SiftError::malformed("rule declares no patterns"));
        }
        let aggregate_rule = rule.patterns.iter().flat_map(|p| &p.variables).any(VariableDecl::is_aggregation);

        let mut aggregation_decls = Vec::new();
        for (block, pattern) in rule.patterns.iter().enumerate() {
            for decl in &pattern.variables {
                if decl.is_aggregation() {
                    aggregation_decls.push(decl);
                    continue;
                }
                let role = if aggregate_rule && block > 0 { Role::Source } else { Role::Main };
                self.declare(&decl.name, &decl.data_type, role)?;
            }
        }
        if self.indices(Role::Main).is_empty() {
            return Err(SiftError::malformed("rule binds no pattern variable"));
        }
        for decl in aggregation_decls {
            self.declare_aggregation(decl)?;
        }
        Ok(())
    }

    fn declare(&mut self, name: &str, type_name: &str, role: Role) -> SiftResult<usize> {
        if name.is_empty() {
            return Err(SiftError::malformed("variable without a name"));
        }
        if !self.schema.contains_key(type_name) {
            return Err(SiftError::unknown_type(type_name));
        }
        self.ensure_unused(name)?;
        self.variables.push(Variable { name: name.to_string(), type_name: type_name.to_string(), role });
        Ok(self.variables.len() - 1)
    }

    fn ensure_unused(&self, name: &str) -> SiftResult<()> {
        let taken =
            self.variables.iter().any(|v| v.name == name) || self.aggregations.iter().any(|a| a.name == name);
        if taken {
            return Err(SiftError::malformed(format!("variable '{name}' is declared twice")));
        }
        Ok(())
    }

    fn declare_aggregation(&mut self, decl: &VariableDecl) -> SiftResult<()> {
        let (function, field_ref) = match (&decl.function, &decl.field, &decl.value) {
            (Some(function), Some(field), _) => (function.as_str(), (field.object.as_str(), field.field.as_str())),
            (_, _, Some(call)) => match call.arguments.first() {
                Some(Expr::FieldAccess { object, field }) => (call.function.as_str(), (object.as_str(), field.as_str())),
                _ => {
                    return Err(SiftError::malformed(format!(
                        "aggregation '{}' must take a field access argument",
                        decl.name
                    )));
                }
            },
            _ => {
                return Err(SiftError::malformed(format!(
                    "aggregation '{}' declares no function and field",
                    decl.name
                )));
            }
        };
        let function = AggregateFunction::parse(function)
            .ok_or_else(|| SiftError::malformed(format!("unknown aggregation function '{function}'")))?;
        let (object, field) = field_ref;
        let variable = self.lookup(object, Scope::Rule)?;
        if self.variables[variable].role != Role::Source {
            return Err(SiftError::malformed(format!(
                "aggregation '{}' reads '{object}', which is not an aggregated pattern",
                decl.name
            )));
        }
        self.check_field(variable, field)?;
        self.ensure_unused(&decl.name)?;
        self.aggregations.push(Aggregation { name: decl.name.clone(), function, variable, field: field.to_string() });
        Ok(())
    }

    fn indices(&self, role: Role) -> Vec<usize> {
        (0..self.variables.len()).filter(|&i| self.variables[i].role == role).collect()
    }

    fn lookup(&self, name: &str, scope: Scope) -> SiftResult<usize> {
        self.variables
            .iter()
            .enumerate()
            .find(|(index, v)| {
                v.name == name
                    && match (v.role, scope) {
                        (Role::Main, _) => true,
                        (Role::Source, Scope::Rule) => true,
                        (Role::Exists, Scope::Exists(own)) => *index == own,
                        _ => false,
                    }
            })
            .map(|(index, _)| index)
            .ok_or_else(|| SiftError::unknown_variable(name))
    }

    fn check_field(&self, variable: usize, field: &str) -> SiftResult<()> {
        let type_name = &self.variables[variable].type_name;
        match self.schema.get(type_name) {
            Some(definition) if definition.has_field(field) => Ok(()),
            Some(_) => Err(SiftError::unknown_field(type_name, field)),
            None => Err(SiftError::unknown_type(type_name)),
        }
    }

    /// Sort the top-level conjuncts into alpha filters, multi-variable
    /// links, exists clauses and aggregation thresholds
    fn classify(&mut self) -> SiftResult<(Vec<Conjunct>, Vec<ExistsClause>, Vec<Threshold>)> {
        let mut links = Vec::new();
        let mut exists = Vec::new();
        let mut thresholds = Vec::new();
        let Some(constraints) = self.rule.constraints.as_ref() else {
            return Ok((links, exists, thresholds));
        };

        for expr in conjuncts(constraints) {
            if let Some(threshold) = self.threshold(expr)? {
                thresholds.push(threshold);
                continue;
            }
            match expr {
                Expr::Exists { variable, condition } => {
                    exists.push(self.exists_clause(variable, condition.as_deref(), false)?);
                }
                Expr::Not { expression } => match expression.as_ref() {
                    Expr::Exists { variable, condition } => {
                        exists.push(self.exists_clause(variable, condition.as_deref(), true)?);
                    }
                    _ => self.add_conjunct(expr, &mut links)?,
                },
                _ => self.add_conjunct(expr, &mut links)?,
            }
        }
        Ok((links, exists, thresholds))
    }

    fn add_conjunct(&mut self, expr: &Expr, links: &mut Vec<Conjunct>) -> SiftResult<()> {
        let condition = self.lower(expr, Scope::Rule)?;
        let slots = condition.slots();
        let mut vars = slots.iter();
        match (vars.next(), vars.next()) {
            (None, _) => Err(SiftError::malformed("condition references no pattern variable")),
            (Some(&var), None) => {
                self.filters.entry(var).or_default().push(condition.remap_slots(&|_| 0));
                Ok(())
            }
            _ => {
                links.push(Conjunct::new(condition));
                Ok(())
            }
        }
    }

    /// `aggVar <op> number`, or the mirrored form
    fn threshold(&self, expr: &Expr) -> SiftResult<Option<Threshold>> {
        let Expr::Comparison { operator, left, right } = expr else {
            return Ok(None);
        };
        let (name, literal, mirrored) = match (left.as_ref(), right.as_ref()) {
            (Expr::Variable { name }, other) => (name, other, false),
            (other, Expr::Variable { name }) => (name, other, true),
            _ => return Ok(None),
        };
        let Some(variable) = self.aggregations.iter().position(|a| &a.name == name) else {
            if self.variables.iter().any(|v| &v.name == name) {
                return Err(SiftError::malformed(format!("'{name}' is not an aggregation variable")));
            }
            return Err(SiftError::unknown_variable(name));
        };
        let operator = Operator::parse(operator)
            .ok_or_else(|| SiftError::malformed(format!("unknown operator '{operator}'")))?;
        let value = literal
            .literal()
            .and_then(|v| v.as_f64())
            .ok_or_else(|| SiftError::malformed(format!("threshold on '{name}' must compare against a number")))?;
        let operator = if mirrored { operator.mirrored() } else { operator };
        Ok(Some(Threshold { variable, operator, value }))
    }

    fn exists_clause(
        &mut self,
        variable: &TypedVariable,
        condition: Option<&Expr>,
        negated: bool,
    ) -> SiftResult<ExistsClause> {
        let index = self.declare(&variable.name, &variable.data_type, Role::Exists)?;
        let mut clause = ExistsClause { variable: index, negated, filters: Vec::new(), predicate: Vec::new() };
        let Some(condition) = condition else {
            return Ok(clause);
        };
        for expr in conjuncts(condition) {
            let lowered = self.lower(expr, Scope::Exists(index))?;
            let vars = lowered.slots();
            if vars.is_empty() {
                return Err(SiftError::malformed("condition references no pattern variable"));
            }
            if vars.len() == 1 && vars.contains(&index) {
                clause.filters.push(lowered.remap_slots(&|_| 0));
            } else {
                clause.predicate.push(Conjunct::new(lowered));
            }
        }
        Ok(clause)
    }

    /// Lower a constraint subtree into a condition over variable indices
    fn lower(&self, expr: &Expr, scope: Scope) -> SiftResult<Condition> {
        match expr {
            Expr::Comparison { operator, left, right } => {
                let op = Operator::parse(operator)
                    .ok_or_else(|| SiftError::malformed(format!("unknown operator '{operator}'")))?;
                let left = self.operand(left, scope)?;
                let right = self.operand(right, scope)?;
                if matches!((&left, &right), (Operand::Literal(_), Operand::Literal(_))) {
                    return Err(SiftError::malformed("comparison between two literals"));
                }
                Ok(Condition::compare(left, op, right))
            }
            Expr::Logical { left, operations } => {
                // AND binds tighter than OR
                let mut groups = vec![vec![self.lower(left, scope)?]];
                for operation in operations {
                    let term = self.lower(&operation.right, scope)?;
                    if is_and(&operation.op) {
                        match groups.last_mut() {
                            Some(group) => group.push(term),
                            None => groups.push(vec![term]),
                        }
                    } else if is_or(&operation.op) {
                        groups.push(vec![term]);
                    } else {
                        return Err(SiftError::malformed(format!("unknown logical operator '{}'", operation.op)));
                    }
                }
                let mut disjuncts: Vec<Condition> = groups.into_iter().filter_map(Condition::all).collect();
                match disjuncts.len() {
                    1 => disjuncts.pop().ok_or_else(|| SiftError::malformed("empty logical expression")),
                    _ => Ok(Condition::Or(disjuncts)),
                }
            }
            Expr::Not { expression } => match expression.as_ref() {
                Expr::Exists { .. } => Err(SiftError::malformed("NOT EXISTS must be a top-level conjunct")),
                inner => Ok(Condition::Not(Box::new(self.lower(inner, scope)?))),
            },
            Expr::Exists { .. } => Err(SiftError::malformed("EXISTS must be a top-level conjunct")),
            other => Err(SiftError::malformed(format!("expected a condition, found {}", other.kind()))),
        }
    }

    fn operand(&self, expr: &Expr, scope: Scope) -> SiftResult<Operand> {
        match expr {
            Expr::FieldAccess { object, field } => {
                let slot = self.lookup(object, scope)?;
                self.check_field(slot, field)?;
                Ok(Operand::Field { slot, field: field.clone() })
            }
            Expr::Variable { name } => {
                if self.aggregations.iter().any(|a| &a.name == name) {
                    Err(SiftError::malformed(format!("aggregation '{name}' can only be compared with a number")))
                } else {
                    Err(SiftError::unknown_variable(name))
                }
            }
            other => other
                .literal()
                .map(Operand::Literal)
                .ok_or_else(|| SiftError::malformed(format!("unsupported operand {}", other.kind()))),
        }
    }

    /// Signature hasher for an alpha node, private to the rule when alpha
    /// sharing is disabled
    fn alpha_hasher(&self, kind: &str) -> SignatureHasher {
        let hasher = SignatureHasher::new(kind);
        if self.config.enable_alpha_sharing { hasher } else { hasher.part(self.rule.rule_id.as_str()) }
    }

    fn beta_hasher(&self, kind: &str) -> SignatureHasher {
        let hasher = SignatureHasher::new(kind);
        if self.config.enable_beta_sharing { hasher } else { hasher.part(self.rule.rule_id.as_str()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Action, PatternBlock};

    fn schema() -> HashMap<String, TypeDefinition> {
        [
            TypeDefinition::new("Person").field("name", "string").field("age", "number"),
            TypeDefinition::new("Order").field("personId", "string").field("amount", "number"),
            TypeDefinition::new("Department").field("name", "string"),
            TypeDefinition::new("Employee").field("deptId", "string").field("salary", "number"),
        ]
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect()
    }

    fn rule(id: &str, variables: Vec<Vec<VariableDecl>>, constraints: Option<Expr>) -> RuleExpression {
        RuleExpression {
            rule_id: id.to_string(),
            patterns: variables.into_iter().map(|variables| PatternBlock { variables }).collect(),
            constraints,
            action: Action::job("notify"),
        }
    }

    fn compile(rule: &RuleExpression) -> SiftResult<RulePlan> {
        compile_rule(rule, &schema(), &EngineConfig::default())
    }

    fn adults(id: &str, reversed: bool) -> RuleExpression {
        let age = Expr::compare(Expr::field("p", "age"), ">", Expr::number(18.0));
        let name = Expr::compare(Expr::field("p", "name"), "==", Expr::string("x"));
        let constraints = if reversed { Expr::and(name, [age]) } else { Expr::and(age, [name]) };
        rule(id, vec![vec![VariableDecl::typed("p", "Person")]], Some(constraints))
    }

    fn person_orders(id: &str, amount: f64) -> RuleExpression {
        rule(
            id,
            vec![vec![VariableDecl::typed("p", "Person"), VariableDecl::typed("o", "Order")]],
            Some(Expr::and(
                Expr::compare(Expr::field("p", "id"), "==", Expr::field("o", "personId")),
                [Expr::compare(Expr::field("o", "amount"), ">", Expr::number(amount))],
            )),
        )
    }

    #[test]
    fn conjunct_order_does_not_change_alpha_signatures() {
        let a = compile(&adults("a", false)).unwrap();
        let b = compile(&adults("b", true)).unwrap();
        assert_eq!(a.signatures(NodeKind::Alpha), b.signatures(NodeKind::Alpha));
        assert_eq!(a.signatures(NodeKind::Alpha).len(), 2);
        assert_ne!(a.signatures(NodeKind::Terminal), b.signatures(NodeKind::Terminal));
    }

    #[test]
    fn single_variable_conjuncts_are_hoisted_out_of_the_join() {
        let plan = compile(&person_orders("r", 100.0)).unwrap();
        let joins: Vec<&Condition> = plan
            .nodes
            .iter()
            .filter_map(|n| match &n.blueprint {
                Blueprint::Join(predicate) => predicate.as_ref(),
                _ => None,
            })
            .collect();
        assert_eq!(joins.len(), 1);
        assert!(joins[0].as_equi_join().is_some());

        let filters = plan
            .nodes
            .iter()
            .filter(|n| matches!(&n.blueprint, Blueprint::Alpha(AlphaTest::Filter(_))))
            .count();
        let passes = plan
            .nodes
            .iter()
            .filter(|n| matches!(&n.blueprint, Blueprint::Alpha(AlphaTest::PassThrough)))
            .count();
        assert_eq!((filters, passes), (1, 1));
    }

    #[test]
    fn different_filtered_inputs_give_different_joins() {
        let large = compile(&person_orders("large", 100.0)).unwrap();
        let xl = compile(&person_orders("xl", 500.0)).unwrap();
        let pass = |plan: &RulePlan| {
            plan.nodes
                .iter()
                .find(|n| matches!(&n.blueprint, Blueprint::Alpha(AlphaTest::PassThrough)))
                .map(|n| n.signature)
        };
        assert_eq!(pass(&large), pass(&xl));
        assert_ne!(large.signatures(NodeKind::Join), xl.signatures(NodeKind::Join));
    }

    #[test]
    fn equi_joined_patterns_come_before_cross_products() {
        // o joins p by equality; d is an unrelated cross product declared first
        let rule = rule(
            "r",
            vec![vec![
                VariableDecl::typed("d", "Department"),
                VariableDecl::typed("p", "Person"),
                VariableDecl::typed("o", "Order"),
            ]],
            Some(Expr::compare(Expr::field("o", "personId"), "==", Expr::field("p", "id"))),
        );
        let plan = compile(&rule).unwrap();
        let first_join = plan
            .nodes
            .iter()
            .find(|n| matches!(n.blueprint, Blueprint::Join(_)))
            .unwrap();
        assert!(matches!(&first_join.blueprint, Blueprint::Join(Some(_))));
        let last_join = plan
            .nodes
            .iter()
            .rev()
            .find(|n| matches!(n.blueprint, Blueprint::Join(_)))
            .unwrap();
        assert!(matches!(&last_join.blueprint, Blueprint::Join(None)));
    }

    #[test]
    fn validation_errors_carry_the_rule_id() {
        let unknown_type = rule("r1", vec![vec![VariableDecl::typed("x", "Ghost")]], None);
        assert!(matches!(
            compile(&unknown_type),
            Err(SiftError::UnknownType { ref type_name, rule_id: Some(ref id) }) if type_name == "Ghost" && id == "r1"
        ));

        let unknown_field = rule(
            "r2",
            vec![vec![VariableDecl::typed("p", "Person")]],
            Some(Expr::compare(Expr::field("p", "salary"), ">", Expr::number(1.0))),
        );
        assert!(matches!(compile(&unknown_field), Err(SiftError::UnknownField { .. })));

        let unknown_variable = rule(
            "r3",
            vec![vec![VariableDecl::typed("p", "Person")]],
            Some(Expr::compare(Expr::field("q", "age"), ">", Expr::number(1.0))),
        );
        assert!(matches!(compile(&unknown_variable), Err(SiftError::UnknownVariable { .. })));

        let bad_operator = rule(
            "r4",
            vec![vec![VariableDecl::typed("p", "Person")]],
            Some(Expr::compare(Expr::field("p", "age"), "~", Expr::number(1.0))),
        );
        assert!(matches!(compile(&bad_operator), Err(SiftError::MalformedAst { .. })));

        assert!(matches!(compile(&rule("r5", vec![], None)), Err(SiftError::MalformedAst { .. })));
    }

    #[test]
    fn disjunctions_stay_opaque() {
        let rule = rule(
            "r",
            vec![vec![VariableDecl::typed("p", "Person")]],
            Some(Expr::or(
                Expr::compare(Expr::field("p", "age"), "<", Expr::number(18.0)),
                [Expr::compare(Expr::field("p", "age"), ">", Expr::number(65.0))],
            )),
        );
        let plan = compile(&rule).unwrap();
        let alpha: Vec<&PlannedNode> =
            plan.nodes.iter().filter(|n| n.blueprint.kind() == NodeKind::Alpha).collect();
        assert_eq!(alpha.len(), 1);
        assert!(matches!(&alpha[0].blueprint, Blueprint::Alpha(AlphaTest::Filter(Condition::Or(_)))));
    }

    #[test]
    fn not_exists_becomes_a_negated_exists_stage() {
        let rule = rule(
            "lonely",
            vec![vec![VariableDecl::typed("p", "Person")]],
            Some(Expr::not(Expr::exists(
                "o",
                "Order",
                Expr::compare(Expr::field("o", "personId"), "==", Expr::field("p", "id")),
            ))),
        );
        let plan = compile(&rule).unwrap();
        assert!(plan.nodes.iter().any(|n| matches!(n.blueprint, Blueprint::Exists { negated: true, .. })));
    }

    #[test]
    fn aggregation_threshold_and_join_key() {
        let rule = rule(
            "avg_sal",
            vec![
                vec![
                    VariableDecl::typed("d", "Department"),
                    VariableDecl::aggregation("avg_sal", "AVG", "e", "salary"),
                ],
                vec![VariableDecl::typed("e", "Employee")],
            ],
            Some(Expr::and(
                Expr::compare(Expr::field("e", "deptId"), "==", Expr::field("d", "id")),
                // literal on the left: 50000 < avg_sal
                [Expr::compare(Expr::number(50_000.0), "<", Expr::Variable { name: "avg_sal".into() })],
            )),
        );
        let plan = compile(&rule).unwrap();
        let Some(Blueprint::Aggregate { sources, variables, thresholds }) =
            plan.nodes.iter().map(|n| &n.blueprint).find(|b| b.kind() == NodeKind::Aggregate)
        else {
            panic!("no aggregation node planned");
        };
        assert_eq!(sources.len(), 1);
        assert!(sources[0].key.is_some());
        assert_eq!(variables[0].function, AggregateFunction::Avg);
        assert_eq!(thresholds, &vec![Threshold { variable: 0, operator: Operator::GreaterThan, value: 50_000.0 }]);
    }

    #[test]
    fn disabled_sharing_makes_nodes_private() {
        let config = EngineConfig { enable_alpha_sharing: false, ..EngineConfig::default() };
        let a = compile_rule(&adults("a", false), &schema(), &config).unwrap();
        let b = compile_rule(&adults("b", false), &schema(), &config).unwrap();
        assert_ne!(a.signatures(NodeKind::Alpha), b.signatures(NodeKind::Alpha));
    }
}
