//! Filter definitions.

use super::params::{FilterParameter, SharedProvider};
use crate::error::{FilterError, FilterResult};
use dynfilter_proto::{FilterKey, PredicateExpr, ValueKind};

/// A named predicate template applied to every query against one entity type.
///
/// Definitions are immutable once registered. The template is evaluated
/// against the entity instance (`SubjectRef` names its fields) and may
/// reference declared parameters with `ParamRef`.
#[derive(Debug, Clone)]
pub struct FilterDefinition {
    /// Filter identity.
    pub key: FilterKey,
    /// Predicate template.
    pub template: PredicateExpr,
    /// Declared parameters, in declaration order.
    pub parameters: Vec<FilterParameter>,
    /// Global default state before any `set_enabled` call.
    pub enabled_by_default: bool,
}

impl FilterDefinition {
    /// Create an unparameterized filter, enabled by default.
    pub fn new(
        entity: impl Into<String>,
        name: impl Into<String>,
        template: PredicateExpr,
    ) -> Self {
        Self {
            key: FilterKey::new(entity, name),
            template,
            parameters: Vec::new(),
            enabled_by_default: true,
        }
    }

    /// Create an unparameterized filter from a JSON-encoded template.
    pub fn from_json(
        entity: impl Into<String>,
        name: impl Into<String>,
        template_json: &str,
    ) -> FilterResult<Self> {
        let template = PredicateExpr::from_json(template_json)?;
        Ok(Self::new(entity, name, template))
    }

    /// Declare a parameter that accepts any non-null value.
    pub fn with_parameter(self, name: impl Into<String>, provider: SharedProvider) -> Self {
        self.with_typed_parameter(name, ValueKind::Any, provider)
    }

    /// Declare a parameter whose value must be of `kind`.
    pub fn with_typed_parameter(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        provider: SharedProvider,
    ) -> Self {
        self.parameters.push(FilterParameter::new(name, kind, provider));
        self
    }

    /// Register the filter disabled; it stays inactive until enabled globally
    /// or in a scope.
    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    /// Entity type this filter applies to.
    pub fn entity(&self) -> &str {
        &self.key.entity
    }

    /// Filter name.
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Look up a declared parameter.
    pub fn parameter(&self, name: &str) -> Option<&FilterParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Check the template is closed over its declared parameters and that
    /// parameter names are unique.
    pub fn validate(&self) -> FilterResult<()> {
        let invalid = |reason: String| FilterError::InvalidTemplate {
            entity: self.key.entity.clone(),
            name: self.key.name.clone(),
            reason,
        };

        if self.key.name.is_empty() {
            return Err(invalid("filter name is empty".to_string()));
        }

        for (i, p) in self.parameters.iter().enumerate() {
            if self.parameters[..i].iter().any(|q| q.name == p.name) {
                return Err(invalid(format!("parameter '{}' declared twice", p.name)));
            }
        }

        for name in self.template.param_refs() {
            if self.parameter(name).is_none() {
                return Err(invalid(format!("undeclared parameter '{}'", name)));
            }
        }

        Ok(())
    }
}
