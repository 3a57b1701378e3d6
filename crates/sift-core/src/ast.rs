//! Serde model of the rule program consumed by the builder.
//!
//! The shape mirrors the JSON produced by the surface parser: a program with
//! `types`, `expressions`, optional inline `facts` and `ruleRemovals`.
//! Constraint trees are tagged by their `type` key.

use serde::{Deserialize, Serialize};
use sift_types::{Fact, FactValue};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::error::{SiftError, SiftResult};
use crate::terminal::{ActionDescriptor, JobCall};

/// A complete rule program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    #[serde(default)]
    pub types: Vec<TypeDefinition>,
    #[serde(default)]
    pub expressions: Vec<RuleExpression>,
    #[serde(default)]
    pub facts: Vec<FactEntry>,
    #[serde(default)]
    pub rule_removals: Vec<RuleRemoval>,
}

impl Program {
    pub fn from_json(text: &str) -> SiftResult<Self> {
        serde_json::from_str(text).map_err(|e| SiftError::malformed(e.to_string()))
    }
}

/// A declared record schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: Vec::new() }
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field_type: impl Into<String>) -> Self {
        self.fields.push(FieldDefinition { name: name.into(), field_type: field_type.into() });
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        name == sift_types::ID_FIELD || self.fields.iter().any(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// One rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleExpression {
    pub rule_id: String,
    pub patterns: Vec<PatternBlock>,
    #[serde(default)]
    pub constraints: Option<Expr>,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternBlock {
    pub variables: Vec<VariableDecl>,
}

/// A pattern variable. Aggregation variables carry either `function` and
/// `field`, or a nested `value` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDecl {
    pub name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AggregationCall>,
}

impl VariableDecl {
    pub fn typed(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            tag: Some("typedVariable".into()),
            function: None,
            field: None,
            value: None,
        }
    }

    pub fn aggregation(
        name: impl Into<String>,
        function: impl Into<String>,
        object: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: "number".into(),
            tag: Some("aggregationVariable".into()),
            function: Some(function.into()),
            field: Some(FieldRef { object: object.into(), field: field.into() }),
            value: None,
        }
    }

    pub fn is_aggregation(&self) -> bool {
        self.tag.as_deref() == Some("aggregationVariable")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub object: String,
    pub field: String,
}

/// `{type: functionCall|aggregationCall, function, arguments}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationCall {
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: String,
    #[serde(default)]
    pub arguments: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalOperation {
    pub op: String,
    pub right: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedVariable {
    pub name: String,
    #[serde(rename = "dataType")]
    pub data_type: String,
}

/// Constraint tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    #[serde(rename = "comparison")]
    Comparison { operator: String, left: Box<Expr>, right: Box<Expr> },
    #[serde(rename = "logicalExpr")]
    Logical {
        left: Box<Expr>,
        #[serde(default)]
        operations: Vec<LogicalOperation>,
    },
    #[serde(rename = "notConstraint")]
    Not {
        #[serde(alias = "constraint")]
        expression: Box<Expr>,
    },
    #[serde(rename = "existsConstraint")]
    Exists {
        variable: TypedVariable,
        #[serde(default)]
        condition: Option<Box<Expr>>,
    },
    #[serde(rename = "fieldAccess")]
    FieldAccess { object: String, field: String },
    #[serde(rename = "variable")]
    Variable { name: String },
    #[serde(rename = "number", alias = "numberLiteral")]
    Number { value: f64 },
    #[serde(rename = "string", alias = "stringLiteral")]
    String { value: String },
    #[serde(rename = "boolean", alias = "booleanLiteral", alias = "bool")]
    Boolean { value: bool },
    #[serde(rename = "null", alias = "nullLiteral")]
    Null,
}

impl Expr {
    pub fn field(object: impl Into<String>, field: impl Into<String>) -> Self {
        Expr::FieldAccess { object: object.into(), field: field.into() }
    }

    pub fn number(value: f64) -> Self {
        Expr::Number { value }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::String { value: value.into() }
    }

    pub fn compare(left: Expr, operator: impl Into<String>, right: Expr) -> Self {
        Expr::Comparison { operator: operator.into(), left: Box::new(left), right: Box::new(right) }
    }

    /// `first AND rest[0] AND rest[1] ...`
    pub fn and(first: Expr, rest: impl IntoIterator<Item = Expr>) -> Self {
        Self::logical(first, "AND", rest)
    }

    pub fn or(first: Expr, rest: impl IntoIterator<Item = Expr>) -> Self {
        Self::logical(first, "OR", rest)
    }

    fn logical(first: Expr, op: &str, rest: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Logical {
            left: Box::new(first),
            operations: rest.into_iter().map(|right| LogicalOperation { op: op.to_string(), right }).collect(),
        }
    }

    pub fn not(expression: Expr) -> Self {
        Expr::Not { expression: Box::new(expression) }
    }

    pub fn exists(name: impl Into<String>, data_type: impl Into<String>, condition: Expr) -> Self {
        Expr::Exists {
            variable: TypedVariable { name: name.into(), data_type: data_type.into() },
            condition: Some(Box::new(condition)),
        }
    }

    /// Literal value, if this node is one
    pub fn literal(&self) -> Option<FactValue> {
        match self {
            Expr::Number { value } => Some(FactValue::Number(*value)),
            Expr::String { value } => Some(FactValue::String(value.clone())),
            Expr::Boolean { value } => Some(FactValue::Boolean(*value)),
            Expr::Null => Some(FactValue::Null),
            _ => None,
        }
    }

    /// Name of the AST node kind, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Comparison { .. } => "comparison",
            Expr::Logical { .. } => "logicalExpr",
            Expr::Not { .. } => "notConstraint",
            Expr::Exists { .. } => "existsConstraint",
            Expr::FieldAccess { .. } => "fieldAccess",
            Expr::Variable { .. } => "variable",
            Expr::Number { .. } => "number",
            Expr::String { .. } => "string",
            Expr::Boolean { .. } => "boolean",
            Expr::Null => "null",
        }
    }
}

/// `{job: {...}}` or `{jobs: [...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<JobCall>,
}

impl Action {
    pub fn job(name: impl Into<String>) -> Self {
        Self { job: Some(JobCall { name: name.into(), args: Vec::new() }), jobs: Vec::new() }
    }

    /// Normalise into a descriptor; an action without any job is malformed
    pub fn to_descriptor(&self) -> SiftResult<ActionDescriptor> {
        let jobs: Vec<JobCall> = self.job.iter().chain(self.jobs.iter()).cloned().collect();
        if jobs.is_empty() {
            return Err(SiftError::malformed("action declares no job"));
        }
        Ok(ActionDescriptor { jobs })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRemoval {
    #[serde(rename = "ruleID", alias = "ruleId")]
    pub rule_id: String,
}

/// Inline fact of a program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactEntry {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub fields: Vec<FactFieldEntry>,
}

/// `value` is either a typed literal node (`{type: "number", value: 3}`) or a
/// plain JSON scalar/list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactFieldEntry {
    pub name: String,
    pub value: serde_json::Value,
}

impl FactEntry {
    /// Build the fact. Without an explicit id the id is derived from the type
    /// and field values, so resubmitting the same entry replaces itself.
    pub fn to_fact(&self) -> SiftResult<Fact> {
        let mut fields = BTreeMap::new();
        for entry in &self.fields {
            fields.insert(entry.name.clone(), literal_value(&entry.value)?);
        }
        let id = match &self.id {
            Some(id) => id.clone(),
            None => {
                let mut hasher = fnv::FnvHasher::default();
                self.type_name.hash(&mut hasher);
                for (name, value) in &fields {
                    name.hash(&mut hasher);
                    value.canonical_key().hash(&mut hasher);
                }
                format!("{}_{:016x}", self.type_name, hasher.finish())
            }
        };
        Ok(Fact { id, type_name: self.type_name.clone(), fields })
    }
}

fn literal_value(value: &serde_json::Value) -> SiftResult<FactValue> {
    if let serde_json::Value::Object(map) = value {
        if map.contains_key("type") {
            let expr: Expr = serde_json::from_value(value.clone())
                .map_err(|e| SiftError::malformed(format!("invalid fact value: {e}")))?;
            return expr
                .literal()
                .ok_or_else(|| SiftError::malformed(format!("fact value must be a literal, got {}", expr.kind())));
        }
    }
    FactValue::try_from(value).map_err(|e| SiftError::malformed(e.to_string()))
}
