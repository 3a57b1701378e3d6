//! Exists and not-exists stages
//!
//! An existential stage filters the tokens of the main cascade by the
//! presence (or absence) of a matching fact. Conditions on the quantified
//! variable alone are planned as its alpha chain; everything else becomes
//! the stage predicate, reading the main token followed by the candidate.

use std::collections::HashMap;

use crate::rete_nodes::Port;
use crate::types::Condition;

use super::{Blueprint, Compiler, ExistsClause, Stage, predicate_key};

impl Compiler<'_> {
    pub(super) fn exists_stage(&mut self, left: Stage, order: &[usize], clause: ExistsClause) -> Stage {
        let type_name = self.variables[clause.variable].type_name.clone();
        let right = self.alpha_chain(&type_name, &clause.filters);

        let mut positions: HashMap<usize, usize> = order.iter().enumerate().map(|(pos, &var)| (var, pos)).collect();
        positions.insert(clause.variable, order.len());
        let predicate = Condition::all(clause.predicate.iter().map(|c| c.remap(&positions)).collect());

        let kind = if clause.negated { "not_exists" } else { "exists" };
        let signature = self
            .beta_hasher(kind)
            .parent(left.signature)
            .parent(right.signature)
            .part(predicate_key(predicate.as_ref()))
            .finish();
        self.plan.push(
            signature,
            vec![(left.upstream(), Port::Left), (right.upstream(), Port::Right(0))],
            Blueprint::Exists { negated: clause.negated, predicate },
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Action, Expr, PatternBlock, RuleExpression, TypeDefinition, VariableDecl};
    use crate::builder::{Blueprint, compile_rule};
    use crate::config::EngineConfig;
    use crate::rete_nodes::NodeKind;
    use std::collections::HashMap;

    fn authors_with_books(id: &str, negated: bool) -> RuleExpression {
        let exists = Expr::exists(
            "b",
            "Book",
            Expr::and(
                Expr::compare(Expr::field("b", "authorId"), "==", Expr::field("a", "id")),
                [Expr::compare(Expr::field("b", "pages"), ">", Expr::number(100.0))],
            ),
        );
        RuleExpression {
            rule_id: id.to_string(),
            patterns: vec![PatternBlock { variables: vec![VariableDecl::typed("a", "Author")] }],
            constraints: Some(if negated { Expr::not(exists) } else { exists }),
            action: Action::job("notify"),
        }
    }

    fn schema() -> HashMap<String, TypeDefinition> {
        [
            TypeDefinition::new("Author").field("name", "string"),
            TypeDefinition::new("Book").field("authorId", "string").field("pages", "number"),
        ]
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect()
    }

    #[test]
    fn candidate_filters_move_to_the_alpha_chain() {
        let plan = compile_rule(&authors_with_books("r", false), &schema(), &EngineConfig::default()).unwrap();
        // Author pass-through, Book pages filter, exists, terminal
        assert_eq!(plan.nodes.len(), 4);
        let Some(Blueprint::Exists { negated, predicate }) =
            plan.nodes.iter().map(|n| &n.blueprint).find(|b| b.kind() == NodeKind::Exists)
        else {
            panic!("no exists stage planned");
        };
        assert!(!negated);
        assert!(predicate.as_ref().and_then(|p| p.as_equi_join()).is_some());
    }

    #[test]
    fn exists_and_not_exists_are_distinct_nodes() {
        let config = EngineConfig::default();
        let exists = compile_rule(&authors_with_books("a", false), &schema(), &config).unwrap();
        let absent = compile_rule(&authors_with_books("b", true), &schema(), &config).unwrap();
        assert_eq!(exists.signatures(NodeKind::Alpha), absent.signatures(NodeKind::Alpha));
        assert_ne!(exists.signatures(NodeKind::Exists), absent.signatures(NodeKind::Exists));
    }
}
