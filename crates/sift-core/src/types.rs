//! Predicates evaluated by alpha, join, exists and aggregation nodes.
//!
//! A [`Condition`] addresses facts by *slot*: the position of the fact inside
//! the token being tested. Alpha conditions only ever read slot 0; join
//! conditions read slots `0..n` of the left token plus slot `n` for the
//! incoming right fact. Slots, rather than variable names, keep node
//! signatures independent of how a rule happens to name its variables.
//!
//! Evaluation is three-valued internally. A missing field or a comparison
//! between incompatible values is *unknown*, and unknown never matches, not
//! even under negation.

use serde::{Deserialize, Serialize};
use sift_types::{Fact, FactValue};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Comparison operators available in constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Operator {
    /// Parse the operator spellings accepted in the AST
    pub fn parse(symbol: &str) -> Option<Self> {
        match symbol {
            "==" | "=" => Some(Operator::Equal),
            "!=" | "<>" => Some(Operator::NotEqual),
            "<" => Some(Operator::LessThan),
            "<=" => Some(Operator::LessThanOrEqual),
            ">" => Some(Operator::GreaterThan),
            ">=" => Some(Operator::GreaterThanOrEqual),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
        }
    }

    /// Operator to use when the two operands trade places (`a < b` ⇔ `b > a`)
    pub fn mirrored(self) -> Self {
        match self {
            Operator::LessThan => Operator::GreaterThan,
            Operator::LessThanOrEqual => Operator::GreaterThanOrEqual,
            Operator::GreaterThan => Operator::LessThan,
            Operator::GreaterThanOrEqual => Operator::LessThanOrEqual,
            other => other,
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Operator::Equal => ordering == Ordering::Equal,
            Operator::NotEqual => ordering != Ordering::Equal,
            Operator::LessThan => ordering == Ordering::Less,
            Operator::LessThanOrEqual => ordering != Ordering::Greater,
            Operator::GreaterThan => ordering == Ordering::Greater,
            Operator::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }

    fn is_equality(self) -> bool {
        matches!(self, Operator::Equal | Operator::NotEqual)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Compare two values. `None` means the comparison is undefined: the values
/// have different types, or the operator orders values that have no order
/// (booleans, null, lists).
pub fn compare_values(left: &FactValue, operator: Operator, right: &FactValue) -> Option<bool> {
    let ordering = match (left, right) {
        (FactValue::Number(a), FactValue::Number(b)) => a.partial_cmp(b),
        (FactValue::String(a), FactValue::String(b)) => Some(a.cmp(b)),
        (FactValue::Boolean(a), FactValue::Boolean(b)) if operator.is_equality() => Some(a.cmp(b)),
        (FactValue::Null, FactValue::Null) if operator.is_equality() => Some(Ordering::Equal),
        (FactValue::List(a), FactValue::List(b)) if operator.is_equality() => {
            return Some((a == b) == (operator == Operator::Equal));
        }
        _ => return None,
    };
    match ordering {
        Some(ordering) => Some(operator.accepts(ordering)),
        // NaN is unequal to everything, itself included
        None => Some(operator == Operator::NotEqual),
    }
}

/// One side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// Field of the fact bound at `slot`
    Field { slot: usize, field: String },
    Literal(FactValue),
}

impl Operand {
    fn resolve<'s, 'f: 's>(
        &'s self,
        facts: &dyn Fn(usize) -> Option<&'f Fact>,
    ) -> Option<Cow<'s, FactValue>> {
        match self {
            Operand::Field { slot, field } => facts(*slot).and_then(|fact| fact.resolve_field(field)),
            Operand::Literal(value) => Some(Cow::Borrowed(value)),
        }
    }

    fn canonical_key(&self) -> String {
        match self {
            Operand::Field { slot, field } => format!("${slot}.{field}"),
            Operand::Literal(value) => value.canonical_key(),
        }
    }
}

/// A boolean predicate over the facts of a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Compare { left: Operand, operator: Operator, right: Operand },
    Not(Box<Condition>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn compare(left: Operand, operator: Operator, right: Operand) -> Self {
        Condition::Compare { left, operator, right }
    }

    /// Shorthand for `field <op> literal` on slot 0
    pub fn field(field: impl Into<String>, operator: Operator, value: impl Into<FactValue>) -> Self {
        Condition::Compare {
            left: Operand::Field { slot: 0, field: field.into() },
            operator,
            right: Operand::Literal(value.into()),
        }
    }

    /// Combine conjuncts; a single conjunct is returned unwrapped
    pub fn all(mut conjuncts: Vec<Condition>) -> Option<Condition> {
        match conjuncts.len() {
            0 => None,
            1 => conjuncts.pop(),
            _ => Some(Condition::And(conjuncts)),
        }
    }

    /// Evaluate against the facts returned by `facts(slot)`. Unknown results
    /// (missing field, incompatible types) count as a non-match.
    pub fn evaluate<'f>(&self, facts: &dyn Fn(usize) -> Option<&'f Fact>) -> bool {
        self.evaluate_kleene(facts).unwrap_or(false)
    }

    /// Evaluate against a single fact bound to slot 0
    pub fn matches_fact(&self, fact: &Fact) -> bool {
        self.evaluate(&|slot| (slot == 0).then_some(fact))
    }

    fn evaluate_kleene<'f>(&self, facts: &dyn Fn(usize) -> Option<&'f Fact>) -> Option<bool> {
        match self {
            Condition::Compare { left, operator, right } => {
                let left = left.resolve(facts)?;
                let right = right.resolve(facts)?;
                compare_values(&left, *operator, &right)
            }
            Condition::Not(inner) => inner.evaluate_kleene(facts).map(|v| !v),
            Condition::And(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.evaluate_kleene(facts) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown { None } else { Some(true) }
            }
            Condition::Or(parts) => {
                let mut unknown = false;
                for part in parts {
                    match part.evaluate_kleene(facts) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown { None } else { Some(false) }
            }
        }
    }

    /// Slots this condition reads
    pub fn slots(&self) -> BTreeSet<usize> {
        let mut slots = BTreeSet::new();
        self.collect_slots(&mut slots);
        slots
    }

    fn collect_slots(&self, slots: &mut BTreeSet<usize>) {
        match self {
            Condition::Compare { left, right, .. } => {
                for operand in [left, right] {
                    if let Operand::Field { slot, .. } = operand {
                        slots.insert(*slot);
                    }
                }
            }
            Condition::Not(inner) => inner.collect_slots(slots),
            Condition::And(parts) | Condition::Or(parts) => {
                parts.iter().for_each(|p| p.collect_slots(slots));
            }
        }
    }

    /// Rewrite every slot through `map`
    pub fn remap_slots(&self, map: &dyn Fn(usize) -> usize) -> Condition {
        match self {
            Condition::Compare { left, operator, right } => Condition::Compare {
                left: remap_operand(left, map),
                operator: *operator,
                right: remap_operand(right, map),
            },
            Condition::Not(inner) => Condition::Not(Box::new(inner.remap_slots(map))),
            Condition::And(parts) => Condition::And(parts.iter().map(|p| p.remap_slots(map)).collect()),
            Condition::Or(parts) => Condition::Or(parts.iter().map(|p| p.remap_slots(map)).collect()),
        }
    }

    /// If this is `slot_a.field_a == slot_b.field_b`, return both sides
    pub fn as_equi_join(&self) -> Option<((usize, &str), (usize, &str))> {
        match self {
            Condition::Compare {
                left: Operand::Field { slot: ls, field: lf },
                operator: Operator::Equal,
                right: Operand::Field { slot: rs, field: rf },
            } if ls != rs => Some(((*ls, lf.as_str()), (*rs, rf.as_str()))),
            _ => None,
        }
    }

    /// Deterministic textual key; literals are canonicalised numerically.
    /// Commutative conjunctions are ordered by their own keys so that
    /// `a AND b` and `b AND a` produce the same key. Disjunctions keep their
    /// textual order: an OR is opaque.
    pub fn canonical_key(&self) -> String {
        match self {
            Condition::Compare { left, operator, right } => {
                format!("({} {} {})", left.canonical_key(), operator.symbol(), right.canonical_key())
            }
            Condition::Not(inner) => format!("not{}", inner.canonical_key()),
            Condition::And(parts) => {
                let mut keys: Vec<String> = parts.iter().map(Condition::canonical_key).collect();
                keys.sort();
                keys.dedup();
                format!("and[{}]", keys.join(","))
            }
            Condition::Or(parts) => {
                let keys: Vec<String> = parts.iter().map(Condition::canonical_key).collect();
                format!("or[{}]", keys.join(","))
            }
        }
    }
}

fn remap_operand(operand: &Operand, map: &dyn Fn(usize) -> usize) -> Operand {
    match operand {
        Operand::Field { slot, field } => Operand::Field { slot: map(*slot), field: field.clone() },
        Operand::Literal(value) => Operand::Literal(value.clone()),
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(age: impl Into<FactValue>) -> Fact {
        Fact::new("p1", "Person").with_field("age", age).with_field("name", "Alice")
    }

    #[test]
    fn numeric_comparisons() {
        let fact = person(25);
        assert!(Condition::field("age", Operator::GreaterThanOrEqual, 18).matches_fact(&fact));
        assert!(Condition::field("age", Operator::Equal, 25.0).matches_fact(&fact));
        assert!(!Condition::field("age", Operator::LessThan, 25).matches_fact(&fact));
    }

    #[test]
    fn cross_type_comparison_is_false() {
        let fact = person("25");
        assert!(!Condition::field("age", Operator::Equal, 25).matches_fact(&fact));
        assert!(!Condition::field("age", Operator::NotEqual, 25).matches_fact(&fact));
    }

    #[test]
    fn missing_field_never_matches_even_when_negated() {
        let fact = person(25);
        let cond = Condition::field("salary", Operator::GreaterThan, 10);
        assert!(!cond.matches_fact(&fact));
        assert!(!Condition::Not(Box::new(cond)).matches_fact(&fact));
    }

    #[test]
    fn strings_order_lexicographically_and_booleans_do_not() {
        let fact = person(25).with_field("active", true);
        assert!(Condition::field("name", Operator::LessThan, "Bob").matches_fact(&fact));
        assert!(Condition::field("active", Operator::Equal, true).matches_fact(&fact));
        assert!(!Condition::field("active", Operator::GreaterThan, false).matches_fact(&fact));
    }

    #[test]
    fn disjunction_with_unknown_branch() {
        let fact = person(25);
        let or = Condition::Or(vec![
            Condition::field("salary", Operator::GreaterThan, 10),
            Condition::field("age", Operator::GreaterThan, 18),
        ]);
        assert!(or.matches_fact(&fact));
    }

    #[test]
    fn conjunction_key_ignores_order() {
        let a = Condition::field("age", Operator::GreaterThan, 18);
        let b = Condition::field("name", Operator::Equal, "x");
        let ab = Condition::And(vec![a.clone(), b.clone()]);
        let ba = Condition::And(vec![b, a]);
        assert_eq!(ab.canonical_key(), ba.canonical_key());
    }

    #[test]
    fn join_condition_reads_both_slots() {
        let person = Fact::new("p1", "Person");
        let order = Fact::new("o1", "Order").with_field("personId", "p1");
        let cond = Condition::compare(
            Operand::Field { slot: 0, field: "id".into() },
            Operator::Equal,
            Operand::Field { slot: 1, field: "personId".into() },
        );
        let facts = [&person, &order];
        assert!(cond.evaluate(&|slot| facts.get(slot).copied()));
        assert_eq!(cond.slots().into_iter().collect::<Vec<_>>(), vec![0, 1]);
        assert!(cond.as_equi_join().is_some());

        let shifted = cond.remap_slots(&|slot| slot + 2);
        assert_eq!(shifted.slots().into_iter().collect::<Vec<_>>(), vec![2, 3]);
    }
}
