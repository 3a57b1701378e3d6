//! Error handling for the Sift engine
//!
//! Errors fall into two families. Construction errors are raised while a
//! program or rule is compiled into the network, or when a submitted fact
//! cannot be represented; they leave the network untouched. Propagation errors are
//! raised only by the memory store while a submission is being committed.
//! Every other runtime anomaly (unknown fact type, missing field, unknown
//! retraction) is logged and never surfaces as an error.

use std::fmt;
use thiserror::Error;

use crate::rete_nodes::NodeId;

/// Error type for Sift engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SiftError {
    /// A rule or fact pattern references a type that was never declared
    #[error("Unknown type '{type_name}'")]
    UnknownType { type_name: String, rule_id: Option<String> },

    /// A field access names a field the declared type does not have
    #[error("Type '{type_name}' has no field '{field}'")]
    UnknownField { type_name: String, field: String, rule_id: Option<String> },

    /// A constraint references a variable no pattern binds
    #[error("Unknown variable '{variable}'")]
    UnknownVariable { variable: String, rule_id: Option<String> },

    /// The AST is missing a required element or uses an unsupported construct
    #[error("Malformed AST: {message}")]
    MalformedAst { message: String, rule_id: Option<String> },

    /// A rule with the same id is already part of the network
    #[error("Rule '{rule_id}' already exists")]
    DuplicateRule { rule_id: String },

    /// A submitted fact cannot be stored losslessly
    #[error("Invalid fact '{fact_id}': {message}")]
    InvalidFact { fact_id: String, message: String },

    /// The memory store rejected a read or write
    #[error("Memory store error on node {node_id:?}: {message}")]
    Store { node_id: Option<NodeId>, message: String },

    /// JSON or TOML decoding failed
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Invalid engine configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Coarse classification of a [`SiftError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Construction,
    Propagation,
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Construction => write!(f, "construction"),
            ErrorCategory::Propagation => write!(f, "propagation"),
            ErrorCategory::Configuration => write!(f, "configuration"),
        }
    }
}

impl SiftError {
    pub fn unknown_type(type_name: impl Into<String>) -> Self {
        Self::UnknownType { type_name: type_name.into(), rule_id: None }
    }

    pub fn unknown_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField { type_name: type_name.into(), field: field.into(), rule_id: None }
    }

    pub fn unknown_variable(variable: impl Into<String>) -> Self {
        Self::UnknownVariable { variable: variable.into(), rule_id: None }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedAst { message: message.into(), rule_id: None }
    }

    pub fn store(node_id: Option<NodeId>, message: impl Into<String>) -> Self {
        Self::Store { node_id, message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Attach the id of the rule being compiled, unless one is already set
    #[must_use]
    pub fn in_rule(mut self, id: &str) -> Self {
        match &mut self {
            Self::UnknownType { rule_id, .. }
            | Self::UnknownField { rule_id, .. }
            | Self::UnknownVariable { rule_id, .. }
            | Self::MalformedAst { rule_id, .. } => {
                if rule_id.is_none() {
                    *rule_id = Some(id.to_string());
                }
            }
            _ => {}
        }
        self
    }

    /// Rule the error was raised for, when known
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Self::UnknownType { rule_id, .. }
            | Self::UnknownField { rule_id, .. }
            | Self::UnknownVariable { rule_id, .. }
            | Self::MalformedAst { rule_id, .. } => rule_id.as_deref(),
            Self::DuplicateRule { rule_id } => Some(rule_id),
            _ => None,
        }
    }

    /// Get the error category for grouping and metrics
    pub fn category(&self) -> ErrorCategory {
        match self {
            SiftError::UnknownType { .. }
            | SiftError::UnknownField { .. }
            | SiftError::UnknownVariable { .. }
            | SiftError::MalformedAst { .. }
            | SiftError::DuplicateRule { .. }
            | SiftError::InvalidFact { .. }
            | SiftError::Serialization { .. } => ErrorCategory::Construction,
            SiftError::Store { .. } => ErrorCategory::Propagation,
            SiftError::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn is_construction(&self) -> bool {
        self.category() == ErrorCategory::Construction
    }

    /// Whether the caller can keep using the network after this error.
    /// Construction errors never touch the network and store failures are
    /// rolled back, so only configuration problems are terminal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SiftError::Configuration { .. })
    }
}

impl From<serde_json::Error> for SiftError {
    fn from(err: serde_json::Error) -> Self {
        SiftError::Serialization { message: err.to_string() }
    }
}

impl From<toml::de::Error> for SiftError {
    fn from(err: toml::de::Error) -> Self {
        SiftError::Configuration { message: err.to_string() }
    }
}

/// Result type alias for Sift operations
pub type SiftResult<T> = Result<T, SiftError>;
