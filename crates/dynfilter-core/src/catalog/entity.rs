//! Entity definitions.

use serde::{Deserialize, Serialize};

/// An entity type known to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within the model).
    pub name: String,
    /// Name of the identity field.
    pub identity_field: String,
    /// Scalar field names.
    pub fields: Vec<String>,
}

impl EntityDef {
    /// Create a new entity definition. The identity field is registered as a
    /// field as well.
    pub fn new(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        let identity_field = identity_field.into();
        Self {
            name: name.into(),
            fields: vec![identity_field.clone()],
            identity_field,
        }
    }

    /// Add a scalar field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.fields.contains(&field) {
            self.fields.push(field);
        }
        self
    }

    /// Add multiple scalar fields.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            self = self.with_field(field);
        }
        self
    }

    /// Check whether the entity declares a field.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }
}
