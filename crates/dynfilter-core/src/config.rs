//! Filter configuration.
//!
//! A `FilterConfig` carries rewrite limits and a list of global filter
//! toggles. It is usually loaded from JSON at startup and applied to the
//! registry once every filter has been registered:
//!
//! ```json
//! {
//!   "rewrite": { "max_depth": 16 },
//!   "filters": [
//!     { "entity": "Order", "name": "soft_delete", "enabled": false },
//!     { "entity": "Invoice", "enabled": true }
//!   ]
//! }
//! ```
//!
//! A toggle without a `name` applies to every filter of its entity.

use crate::error::{FilterError, FilterResult};
use crate::filter::FilterRegistry;
use crate::rewrite::RewriteOptions;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Global enabled state for one filter, or for all filters of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterToggle {
    /// Entity type.
    pub entity: String,
    /// Filter name; `None` toggles every filter of the entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// State to set.
    pub enabled: bool,
}

/// Startup configuration for the filter engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Rewrite limits.
    pub rewrite: RewriteOptions,
    /// Global toggles, applied in order.
    pub filters: Vec<FilterToggle>,
}

impl FilterConfig {
    /// Create a configuration with default limits and no toggles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration.
    pub fn from_json_str(json: &str) -> FilterResult<Self> {
        serde_json::from_str(json).map_err(|e| FilterError::Config(e.to_string()))
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> FilterResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| FilterError::Config(e.to_string()))
    }

    /// Set the maximum quantifier nesting depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.rewrite.max_depth = max_depth;
        self
    }

    /// Add a toggle for one filter.
    pub fn with_filter(
        mut self,
        entity: impl Into<String>,
        name: impl Into<String>,
        enabled: bool,
    ) -> Self {
        self.filters.push(FilterToggle {
            entity: entity.into(),
            name: Some(name.into()),
            enabled,
        });
        self
    }

    /// Add a toggle for every filter of an entity.
    pub fn with_entity(mut self, entity: impl Into<String>, enabled: bool) -> Self {
        self.filters.push(FilterToggle {
            entity: entity.into(),
            name: None,
            enabled,
        });
        self
    }

    /// Check the limits are usable.
    pub fn validate(&self) -> FilterResult<()> {
        if self.rewrite.max_depth == 0 {
            return Err(FilterError::Config("rewrite.max_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Apply the toggles to a registry, in order.
    ///
    /// A toggle naming an unknown filter or an entity without filters fails
    /// the whole call, and no toggle is applied.
    pub fn apply(&self, registry: &FilterRegistry) -> FilterResult<()> {
        self.validate()?;
        registry.apply_toggles(&self.filters)?;
        info!(
            toggles = self.filters.len(),
            max_depth = self.rewrite.max_depth,
            "applied filter config"
        );
        Ok(())
    }
}
