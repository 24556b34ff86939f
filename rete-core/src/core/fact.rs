//! Fact model and fact-id conventions.
//!
//! A fact is identified by a stable opaque `fact_id` plus a nominal
//! `fact_type`; its body is an unordered mapping from field name to
//! [`Value`]. Two facts with the same `fact_id` represent the same logical
//! entity across versions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::Value;

/// Separator used by the `"<Type>~<natural-key>"` fact-id convention.
pub const FACT_ID_SEPARATOR: char = '~';

/// Unordered field-name to value mapping forming a fact body.
pub type FieldMap = HashMap<String, Value>;

/// A single typed record in working memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// Stable opaque identifier, conventionally `"<Type>~<natural-key>"`.
    pub fact_id: String,
    /// Nominal type name.
    pub fact_type: String,
    /// Field-name to value body.
    pub fields: FieldMap,
    /// When this version of the fact was observed.
    pub updated_at: DateTime<Utc>,
}

impl Fact {
    /// Creates a fact from a type name, natural key, and body.
    pub fn new(fact_type: impl Into<String>, natural_key: &str, fields: FieldMap) -> Self {
        let fact_type = fact_type.into();
        Self {
            fact_id: compose_fact_id(&fact_type, natural_key),
            fact_type,
            fields,
            updated_at: Utc::now(),
        }
    }

    /// Number of fields in the body.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// Composes the idiomatic `"<Type>~<natural-key>"` fact id.
pub fn compose_fact_id(fact_type: &str, natural_key: &str) -> String {
    format!("{fact_type}{FACT_ID_SEPARATOR}{natural_key}")
}

/// Splits a fact id at the first `~` into `(type, natural_key)`.
///
/// The engine itself treats fact ids as opaque; this helper exists for
/// downstream consumers that follow the convention.
pub fn split_fact_id(fact_id: &str) -> Option<(&str, &str)> {
    fact_id.split_once(FACT_ID_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_id_roundtrip() {
        let id = compose_fact_id("Product", "p123");
        assert_eq!(id, "Product~p123");
        assert_eq!(split_fact_id(&id), Some(("Product", "p123")));
    }

    #[test]
    fn test_split_opaque_id() {
        assert_eq!(split_fact_id("no-separator"), None);
        // Only the first separator splits; keys may contain `~`.
        assert_eq!(split_fact_id("A~b~c"), Some(("A", "b~c")));
    }

    #[test]
    fn test_fact_construction() {
        let mut fields = FieldMap::new();
        fields.insert("price".to_string(), Value::Float(100.0));
        let fact = Fact::new("Product", "p123", fields);
        assert_eq!(fact.fact_id, "Product~p123");
        assert_eq!(fact.fact_type, "Product");
        assert_eq!(fact.field_count(), 1);
    }
}
