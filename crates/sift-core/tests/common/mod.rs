#![allow(dead_code)]

use sift_core::ast::{Action, Expr, PatternBlock, VariableDecl};
use sift_core::*;
use std::collections::BTreeMap;

pub fn types() -> Vec<TypeDefinition> {
    vec![
        TypeDefinition::new("Person").field("name", "string").field("age", "number"),
        TypeDefinition::new("Order").field("personId", "string").field("amount", "number"),
        TypeDefinition::new("Department").field("name", "string"),
        TypeDefinition::new("Employee").field("deptId", "string").field("salary", "number"),
        TypeDefinition::new("Project").field("employeeId", "string").field("budget", "number"),
        TypeDefinition::new("Author").field("name", "string"),
        TypeDefinition::new("Book").field("authorId", "string").field("title", "string"),
        TypeDefinition::new("Review").field("deptId", "string").field("score", "number"),
    ]
}

/// A network with every test type declared
pub fn network() -> ReteNetwork {
    network_with(EngineConfig::default())
}

pub fn network_with(config: EngineConfig) -> ReteNetwork {
    let mut network = ReteNetwork::with_config(config);
    for definition in types() {
        network.add_type(definition).unwrap();
    }
    network
}

pub fn rule(id: &str, variables: Vec<VariableDecl>, constraints: Option<Expr>) -> RuleExpression {
    RuleExpression {
        rule_id: id.to_string(),
        patterns: vec![PatternBlock { variables }],
        constraints,
        action: Action::job("notify"),
    }
}

pub fn var(name: &str, type_name: &str) -> VariableDecl {
    VariableDecl::typed(name, type_name)
}

pub fn cmp(object: &str, field: &str, op: &str, value: f64) -> Expr {
    Expr::compare(Expr::field(object, field), op, Expr::number(value))
}

pub fn eq_fields(a: (&str, &str), b: (&str, &str)) -> Expr {
    Expr::compare(Expr::field(a.0, a.1), "==", Expr::field(b.0, b.1))
}

pub fn person(id: &str, age: i64) -> Fact {
    Fact::new(id, "Person").with_field("age", age).with_field("name", id)
}

pub fn order(id: &str, person_id: &str, amount: f64) -> Fact {
    Fact::new(id, "Order").with_field("personId", person_id).with_field("amount", amount)
}

pub fn employee(id: &str, dept: &str, salary: f64) -> Fact {
    Fact::new(id, "Employee").with_field("deptId", dept).with_field("salary", salary)
}

pub fn review(id: &str, dept: &str, score: f64) -> Fact {
    Fact::new(id, "Review").with_field("deptId", dept).with_field("score", score)
}

pub fn department(id: &str) -> Fact {
    Fact::new(id, "Department").with_field("name", id)
}

/// Sorted fact ids of every activation of a rule
pub fn activation_ids(network: &ReteNetwork, rule_id: &str) -> Vec<Vec<String>> {
    let mut ids: Vec<Vec<String>> =
        network.activations(rule_id).iter().map(|t| t.id().fact_ids().to_vec()).collect();
    ids.sort();
    ids
}

/// Working memory of every live node, keyed by node id
pub fn memories(network: &ReteNetwork) -> BTreeMap<NodeId, WorkingMemory> {
    network.node_ids().filter_map(|id| network.node(id).map(|n| (id, n.working_memory()))).collect()
}
