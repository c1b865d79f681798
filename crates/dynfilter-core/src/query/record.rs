//! In-memory entity records.

use dynfilter_proto::Value;
use std::collections::HashMap;

/// One entity instance with its scalar fields and loaded collections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityRecord {
    /// Entity type name.
    pub entity: String,
    /// Scalar field values.
    pub fields: Vec<(String, Value)>,
    /// Loaded collection navigations, keyed by navigation name.
    pub collections: HashMap<String, Vec<EntityRecord>>,
}

impl EntityRecord {
    /// Create an empty record of an entity type.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Self::default()
        }
    }

    /// Set a scalar field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
        self
    }

    /// Attach a loaded collection.
    pub fn with_collection(mut self, name: impl Into<String>, records: Vec<EntityRecord>) -> Self {
        self.collections.insert(name.into(), records);
        self
    }

    /// Get a field value by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Get a loaded collection. A collection that was never loaded is empty.
    pub fn collection(&self, name: &str) -> &[EntityRecord] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}
