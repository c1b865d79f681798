//! Navigation definitions between entities.

use serde::{Deserialize, Serialize};

/// Cardinality of a navigation, seen from its source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// Single related entity (reference navigation).
    One,
    /// Collection of related entities.
    Many,
}

/// A named navigation from one entity type to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationDef {
    /// Navigation name, unique per source entity.
    pub name: String,
    /// Source entity name.
    pub from_entity: String,
    /// Target entity name.
    pub to_entity: String,
    /// Navigation cardinality.
    pub cardinality: Cardinality,
}

impl NavigationDef {
    /// Create a collection navigation (`parent.children`).
    pub fn many(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        to_entity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            cardinality: Cardinality::Many,
        }
    }

    /// Create a reference navigation (`child.parent`).
    pub fn one(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        to_entity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            cardinality: Cardinality::One,
        }
    }

    /// Check if this navigation yields a collection.
    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}
