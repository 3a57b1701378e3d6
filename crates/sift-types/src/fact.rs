use crate::FactValue;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Identifier of a fact. Unique per network; resubmitting an id replaces the
/// previous fact.
pub type FactId = String;

/// Name of the implicit identity field. Rules may read `id` even when the
/// record type does not declare it.
pub const ID_FIELD: &str = "id";

/// An immutable typed record submitted to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub type_name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FactValue>,
}

impl Fact {
    pub fn new(id: impl Into<FactId>, type_name: impl Into<String>) -> Self {
        Self { id: id.into(), type_name: type_name.into(), fields: BTreeMap::new() }
    }

    /// Builder-style field assignment
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FactValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Get a declared field value
    pub fn get_field(&self, field: &str) -> Option<&FactValue> {
        self.fields.get(field)
    }

    /// First field holding NaN or an infinite number
    pub fn non_finite_field(&self) -> Option<&str> {
        self.fields.iter().find(|(_, value)| !value.is_finite()).map(|(name, _)| name.as_str())
    }

    /// Resolve a field for predicate evaluation. `id` falls back to the fact
    /// identifier when the record carries no explicit `id` field.
    pub fn resolve_field(&self, field: &str) -> Option<Cow<'_, FactValue>> {
        match self.fields.get(field) {
            Some(value) => Some(Cow::Borrowed(value)),
            None if field == ID_FIELD => Some(Cow::Owned(FactValue::String(self.id.clone()))),
            None => None,
        }
    }
}
