mod common;

use common::*;
use sift_core::ast::{Action, Expr, PatternBlock, VariableDecl};
use sift_core::rete_nodes::ROOT_NODE_ID;
use sift_core::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn network_on(store: Arc<dyn MemoryStore>) -> ReteNetwork {
    let mut network = ReteNetwork::new().with_store(store);
    for definition in types() {
        network.add_type(definition).unwrap();
    }
    network.add_rule(&rule("adults", vec![var("p", "Person")], Some(cmp("p", "age", ">=", 18.0)))).unwrap();
    network
}

#[test]
fn test_snapshots_are_written_for_touched_nodes() {
    let store = Arc::new(InMemoryStore::new());
    let mut network = network_on(store.clone());
    network.submit_fact(person("p1", 30)).unwrap();

    let person_node = network.type_node("Person").unwrap();
    let stored = store.load_memory(person_node).unwrap().unwrap();
    assert!(stored.contains_fact("p1"));
    assert!(network.node_memory(ROOT_NODE_ID).unwrap().unwrap().contains_fact("p1"));

    let terminal = *network.rule_nodes("adults").unwrap().last().unwrap();
    assert_eq!(network.node_memory(terminal).unwrap().unwrap().token_count(), 1);

    network.retract_fact("p1").unwrap();
    assert!(store.load_memory(person_node).unwrap().unwrap().is_empty());
}

#[test]
fn test_failed_save_rolls_the_submission_back() {
    let store = Arc::new(InMemoryStore::new());
    let mut network = network_on(store.clone());
    network.submit_fact(person("p1", 30)).unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&delivered);
    network.set_activation_handler(move |a: &Activation| log.lock().unwrap().push(a.token.id().to_string()));

    let before = memories(&network);
    store.fail_saves(true);
    let err = network.submit_fact(person("p2", 40)).unwrap_err();
    assert!(matches!(err, SiftError::Store { .. }));
    assert_eq!(err.category(), ErrorCategory::Propagation);

    assert_eq!(memories(&network), before);
    assert!(network.fact("p2").is_none());
    assert_eq!(network.activations("adults").len(), 1);
    assert!(delivered.lock().unwrap().is_empty());

    store.fail_saves(false);
    network.submit_fact(person("p2", 40)).unwrap();
    assert_eq!(*delivered.lock().unwrap(), vec!["[p2]".to_string()]);
}

#[test]
fn test_failed_save_restores_a_replaced_fact() {
    let store = Arc::new(InMemoryStore::new());
    let mut network = network_on(store.clone());
    network.submit_fact(person("p1", 30)).unwrap();

    store.fail_saves(true);
    assert!(network.submit_fact(person("p1", 10)).is_err());
    store.fail_saves(false);

    assert_eq!(network.fact("p1"), Some(&person("p1", 30)));
    assert_eq!(network.activations("adults").len(), 1);
}

#[test]
fn test_failed_retraction_keeps_the_fact() {
    let store = Arc::new(InMemoryStore::new());
    let mut network = network_on(store.clone());
    network.submit_fact(person("p1", 30)).unwrap();

    store.fail_saves(true);
    assert!(network.retract_fact("p1").is_err());
    store.fail_saves(false);

    assert!(network.fact("p1").is_some());
    assert_eq!(network.activations("adults").len(), 1);
}

#[test]
fn test_rule_added_during_store_failure_still_reports_activations() {
    let store = Arc::new(InMemoryStore::new());
    let mut network = network_on(store.clone());
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&delivered);
    network.set_activation_handler(move |a: &Activation| {
        log.lock().unwrap().push(format!("{} {}", a.rule_id, a.token.id()))
    });
    network.submit_fact(person("p1", 70)).unwrap();
    delivered.lock().unwrap().clear();

    store.fail_saves(true);
    let seniors = rule("seniors", vec![var("p", "Person")], Some(cmp("p", "age", ">=", 60.0)));
    assert!(matches!(network.add_rule(&seniors), Err(SiftError::Store { .. })));
    assert_eq!(*delivered.lock().unwrap(), vec!["seniors [p1]".to_string()]);

    assert!(network.submit_fact(person("p2", 80)).is_err());
    assert_eq!(delivered.lock().unwrap().len(), 1);

    store.fail_saves(false);
    network.submit_fact(person("p2", 80)).unwrap();
    let mut later = delivered.lock().unwrap().split_off(1);
    later.sort();
    assert_eq!(later, vec!["adults [p2]".to_string(), "seniors [p2]".to_string()]);
    assert_eq!(network.activations("seniors").len(), 2);
}

#[test]
fn test_removed_rules_drop_their_snapshots() {
    let store = Arc::new(InMemoryStore::new());
    let mut network = network_on(store.clone());
    network.submit_fact(person("p1", 30)).unwrap();
    let nodes = network.rule_nodes("adults").unwrap().to_vec();
    for id in &nodes {
        assert!(store.load_memory(*id).unwrap().is_some());
    }

    network.remove_rule("adults").unwrap();
    for id in &nodes {
        assert!(store.load_memory(*id).unwrap().is_none());
    }
    let listed = store.list_nodes().unwrap();
    assert!(listed.contains(&ROOT_NODE_ID));
    assert!(nodes.iter().all(|id| !listed.contains(id)));
}

/// Counts the writes reaching an in-memory store and the entries they carry
#[derive(Default)]
struct CountingStore {
    inner: InMemoryStore,
    writes: AtomicUsize,
    entries: AtomicUsize,
}

impl CountingStore {
    fn take(&self) -> (usize, usize) {
        (self.writes.swap(0, Ordering::SeqCst), self.entries.swap(0, Ordering::SeqCst))
    }
}

impl MemoryStore for CountingStore {
    fn save_memory(&self, node_id: NodeId, memory: &WorkingMemory) -> SiftResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.fetch_add(memory.fact_count() + memory.token_count(), Ordering::SeqCst);
        self.inner.save_memory(node_id, memory)
    }

    fn load_memory(&self, node_id: NodeId) -> SiftResult<Option<WorkingMemory>> {
        self.inner.load_memory(node_id)
    }

    fn delete_memory(&self, node_id: NodeId) -> SiftResult<()> {
        self.inner.delete_memory(node_id)
    }

    fn list_nodes(&self) -> SiftResult<Vec<NodeId>> {
        self.inner.list_nodes()
    }

    fn apply_change(&self, node_id: NodeId, change: &MemoryChange) -> SiftResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.fetch_add(change.len(), Ordering::SeqCst);
        self.inner.apply_change(node_id, change)
    }
}

fn written_by_one_submission(population: usize) -> (usize, usize) {
    let store = Arc::new(CountingStore::default());
    let mut network = network_on(store.clone());
    network
        .add_rule(&rule(
            "big_orders",
            vec![var("p", "Person"), var("o", "Order")],
            Some(Expr::and(eq_fields(("p", "id"), ("o", "personId")), [cmp("o", "amount", ">", 500.0)])),
        ))
        .unwrap();
    for i in 0..population {
        network.submit_fact(person(&format!("p{i}"), 30)).unwrap();
        network.submit_fact(order(&format!("o{i}"), &format!("p{i}"), 900.0)).unwrap();
    }

    store.take();
    network.submit_fact(order("extra", "p0", 900.0)).unwrap();
    store.take()
}

#[test]
fn test_writes_do_not_grow_with_the_working_set() {
    let small = written_by_one_submission(10);
    let large = written_by_one_submission(1_000);
    assert_eq!(small, large);
    let (writes, entries) = large;
    assert!(writes > 0 && entries < 10, "{writes} writes carrying {entries} entries");
}

#[test]
fn test_stored_memories_follow_live_memories() {
    let store = Arc::new(InMemoryStore::new());
    let mut network = network_on(store.clone());
    network
        .add_rule(&rule(
            "customers",
            vec![var("p", "Person")],
            Some(Expr::exists("o", "Order", eq_fields(("o", "personId"), ("p", "id")))),
        ))
        .unwrap();
    network
        .add_rule(&RuleExpression {
            rule_id: "payroll".into(),
            patterns: vec![
                PatternBlock {
                    variables: vec![var("d", "Department"), VariableDecl::aggregation("total", "SUM", "e", "salary")],
                },
                PatternBlock { variables: vec![var("e", "Employee")] },
            ],
            constraints: Some(Expr::and(
                eq_fields(("e", "deptId"), ("d", "id")),
                [Expr::compare(Expr::Variable { name: "total".into() }, ">", Expr::number(50.0))],
            )),
            action: Action::job("alert"),
        })
        .unwrap();

    network.submit_fact(person("p1", 30)).unwrap();
    network.submit_fact(person("p2", 17)).unwrap();
    network.submit_fact(order("o1", "p1", 20.0)).unwrap();
    network.submit_fact(order("o2", "p1", 40.0)).unwrap();
    network.submit_fact(department("d1")).unwrap();
    network.submit_fact(employee("e1", "d1", 40.0)).unwrap();
    network.submit_fact(employee("e2", "d1", 30.0)).unwrap();
    network.submit_fact(person("p1", 12)).unwrap();
    network.retract_fact("o1").unwrap();
    network.retract_fact("e2").unwrap();
    network.submit_fact(employee("e1", "d1", 90.0)).unwrap();

    for (node_id, live) in memories(&network) {
        assert_eq!(store.load_memory(node_id).unwrap(), Some(live), "node {node_id}");
    }
    let root = store.load_memory(ROOT_NODE_ID).unwrap().unwrap();
    assert_eq!(root.fact_count(), network.fact_count());
    assert_eq!(root.facts["p1"].as_ref(), &person("p1", 12));
}
