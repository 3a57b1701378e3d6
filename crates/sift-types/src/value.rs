use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// Possible values that can be stored in a fact field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FactValue {
    /// Null value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Numeric value; every number is a 64-bit float
    Number(f64),
    /// String value
    String(String),
    /// Ordered list of values
    List(Vec<FactValue>),
}

// -------------------------------------------------------------------------------------------------
// Conversions between `FactValue` and `serde_json::Value`.
// -------------------------------------------------------------------------------------------------

impl From<&FactValue> for serde_json::Value {
    fn from(value: &FactValue) -> Self {
        match value {
            FactValue::Null => Self::Null,
            FactValue::Boolean(b) => Self::Bool(*b),
            FactValue::Number(n) => serde_json::Number::from_f64(*n).map_or(Self::Null, Self::Number),
            FactValue::String(s) => Self::String(s.clone()),
            FactValue::List(items) => Self::Array(items.iter().map(Into::into).collect()),
        }
    }
}

impl From<FactValue> for serde_json::Value {
    fn from(value: FactValue) -> Self {
        Self::from(&value)
    }
}

impl TryFrom<&serde_json::Value> for FactValue {
    type Error = anyhow::Error;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Ok(match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Boolean(*b),
            serde_json::Value::Number(n) => {
                Self::Number(n.as_f64().ok_or_else(|| anyhow!("Unsupported number value: {n}"))?)
            }
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::List(items.iter().map(Self::try_from).collect::<Result<Vec<_>, _>>()?)
            }
            serde_json::Value::Object(_) => {
                return Err(anyhow!("Object values are not part of the fact value domain"));
            }
        })
    }
}

impl FactValue {
    /// `false` for NaN or an infinite number, at any depth. JSON has no
    /// encoding for those, so they cannot survive a round trip.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Number(n) => n.is_finite(),
            Self::List(items) => items.iter().all(Self::is_finite),
            Self::Null | Self::Boolean(_) | Self::String(_) => true,
        }
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for FactValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for FactValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl<T: Into<FactValue>> From<Vec<T>> for FactValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl FactValue {
    /// Get the type name as a string
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
        }
    }

    /// Numeric view of the value. Only `Number` qualifies; no coercion from
    /// strings or booleans.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Deterministic, type-tagged rendering used wherever a value takes part in
    /// a hash key. Numbers are normalised so that `-0` and `0` collide and
    /// `25` and `25.0` render identically.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        match self {
            Self::Null => "n:".to_string(),
            Self::Boolean(b) => format!("b:{b}"),
            Self::Number(n) => format!("f:{}", normalise_number(*n)),
            Self::String(s) => format!("s:{}:{s}", s.len()),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Self::canonical_key).collect();
                format!("l:[{}]", inner.join(","))
            }
        }
    }
}

fn normalise_number(n: f64) -> f64 {
    if n == 0.0 { 0.0 } else { n }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_conversion_keeps_nested_lists() {
        let json = serde_json::json!({"tags": ["a", 1.5, [true, null]]});
        let value = FactValue::try_from(&json["tags"]).unwrap();
        assert_eq!(
            value,
            FactValue::List(vec![
                FactValue::from("a"),
                FactValue::Number(1.5),
                FactValue::List(vec![FactValue::Boolean(true), FactValue::Null]),
            ])
        );
        assert_eq!(serde_json::Value::from(&value), json["tags"]);
    }

    #[test]
    fn objects_are_rejected() {
        let json = serde_json::json!({"nested": {"a": 1}});
        assert!(FactValue::try_from(&json["nested"]).is_err());
    }

    #[test]
    fn canonical_key_normalises_numbers() {
        assert_eq!(FactValue::Number(-0.0).canonical_key(), FactValue::Number(0.0).canonical_key());
        assert_eq!(FactValue::from(25).canonical_key(), FactValue::Number(25.0).canonical_key());
        assert_ne!(FactValue::from("25").canonical_key(), FactValue::from(25).canonical_key());
    }

    #[test]
    fn untagged_serde_matches_plain_json() {
        let value = FactValue::List(vec![FactValue::from(1), FactValue::from("x")]);
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"[1.0,"x"]"#);
        let back: FactValue = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }
}
