mod common;

use common::*;
use sift_core::ast::Expr;
use sift_core::*;

fn adults(id: &str, min_age: f64) -> RuleExpression {
    rule(id, vec![var("p", "Person")], Some(cmp("p", "age", ">=", min_age)))
}

#[test]
fn test_sharing_statistics() {
    let mut network = network();
    network.add_rule(&adults("a", 18.0)).unwrap();
    network.add_rule(&adults("b", 18.0)).unwrap();
    network.add_rule(&adults("c", 18.0)).unwrap();
    network.add_rule(&adults("d", 65.0)).unwrap();

    let stats = network.stats();
    assert_eq!(stats.alpha_nodes, 2);
    assert_eq!(stats.sharing_total_shared_alpha_nodes, 2);
    assert_eq!(stats.sharing_total_rule_references, 4);
    assert!((stats.sharing_average_sharing_ratio - 2.0).abs() < f64::EPSILON);

    let sharing = network.sharing_stats();
    assert_eq!(sharing.alpha_shares_found, 2);
    assert_eq!(sharing.beta_shares_found, 0);
    assert_eq!(sharing.alpha_nodes_created, 2);
    assert_eq!(sharing.beta_nodes_created, 0);
}

#[test]
fn test_empty_network_statistics() {
    let network = ReteNetwork::new();
    let stats = network.stats();
    assert_eq!(stats, NetworkStats::default());
}

#[test]
fn test_disabled_alpha_sharing_gives_private_chains() {
    let config = EngineConfig { enable_alpha_sharing: false, ..EngineConfig::default() };
    let mut network = network_with(config);
    network.add_rule(&adults("a", 18.0)).unwrap();
    network.add_rule(&adults("b", 18.0)).unwrap();
    assert_eq!(network.stats().alpha_nodes, 2);
    assert_eq!(network.sharing_stats().alpha_shares_found, 0);

    network.submit_fact(person("p1", 20)).unwrap();
    assert_eq!(network.activations("a").len(), 1);
    assert_eq!(network.activations("b").len(), 1);
}

#[test]
fn test_disabled_beta_sharing_keeps_alpha_sharing() {
    let config = EngineConfig { enable_beta_sharing: false, ..EngineConfig::default() };
    let mut network = network_with(config);
    let orders = |id: &str| {
        rule(id, vec![var("p", "Person"), var("o", "Order")], Some(eq_fields(("p", "id"), ("o", "personId"))))
    };
    network.add_rule(&orders("a")).unwrap();
    network.add_rule(&orders("b")).unwrap();

    let stats = network.stats();
    assert_eq!(stats.alpha_nodes, 2);
    assert_eq!(stats.beta_nodes, 2);
    let sharing = network.sharing_stats();
    assert_eq!(sharing.beta_nodes_created, 2);
    assert_eq!(sharing.beta_shares_found, 0);
}

#[test]
fn test_disjunctions_share_when_identical() {
    let mut network = network();
    let either = |id: &str| {
        rule(
            id,
            vec![var("p", "Person")],
            Some(Expr::or(cmp("p", "age", "<", 18.0), [cmp("p", "age", ">", 65.0)])),
        )
    };
    network.add_rule(&either("a")).unwrap();
    network.add_rule(&either("b")).unwrap();
    assert_eq!(network.stats().alpha_nodes, 1);

    network.submit_fact(person("young", 10)).unwrap();
    network.submit_fact(person("mid", 40)).unwrap();
    network.submit_fact(person("old", 70)).unwrap();
    assert_eq!(activation_ids(&network, "a"), vec![vec!["old".to_string()], vec!["young".to_string()]]);
}

#[test]
fn test_negated_filter() {
    let mut network = network();
    network
        .add_rule(&rule("not_adult", vec![var("p", "Person")], Some(Expr::not(cmp("p", "age", ">=", 18.0)))))
        .unwrap();
    network.submit_fact(person("p1", 10)).unwrap();
    network.submit_fact(person("p2", 30)).unwrap();
    // a missing field is unknown, and unknown never matches even under NOT
    network.submit_fact(Fact::new("p3", "Person")).unwrap();
    assert_eq!(activation_ids(&network, "not_adult"), vec![vec!["p1".to_string()]]);
}
