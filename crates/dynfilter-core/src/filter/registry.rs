//! Process-wide filter registry.
//!
//! The registry owns every [`FilterDefinition`] together with its global
//! enabled state and global parameter overrides. It is built during model
//! configuration and shared read-mostly (`Arc<FilterRegistry>`) by every
//! unit of work afterwards.

use super::definition::FilterDefinition;
use super::params::SharedProvider;
use crate::catalog::EntityModel;
use crate::config::FilterToggle;
use crate::error::{FilterError, FilterResult};
use dynfilter_proto::FilterKey;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Read access to the filters in effect, as seen by the rewriter.
///
/// Implemented by [`FilterRegistry`] (global state only) and by
/// [`FilterSession`](super::FilterSession) (global state plus the session's
/// scope overrides).
pub trait FilterView {
    /// Filters registered for `entity` that are currently enabled, in
    /// registration order.
    fn active_filters_for(&self, entity: &str) -> Vec<Arc<FilterDefinition>>;

    /// Provider overriding the definition's own provider for one parameter.
    fn parameter_override(&self, key: &FilterKey, parameter: &str) -> Option<SharedProvider>;
}

#[derive(Default)]
struct RegistryState {
    definitions: HashMap<FilterKey, Arc<FilterDefinition>>,
    /// Per-entity definitions in registration order.
    by_entity: HashMap<String, Vec<Arc<FilterDefinition>>>,
    enabled: HashMap<FilterKey, bool>,
    parameters: HashMap<(FilterKey, String), SharedProvider>,
}

impl RegistryState {
    fn require(&self, entity: &str, name: &str) -> FilterResult<&Arc<FilterDefinition>> {
        self.definitions
            .get(&FilterKey::new(entity, name))
            .ok_or_else(|| FilterError::unknown_filter(entity, name))
    }

    fn require_entity(&self, entity: &str) -> FilterResult<()> {
        if self.by_entity.contains_key(entity) {
            Ok(())
        } else {
            Err(FilterError::UnknownEntity {
                entity: entity.to_string(),
            })
        }
    }

    fn set_all(&mut self, entity: Option<&str>, enabled: bool) {
        for (key, value) in self.enabled.iter_mut() {
            if entity.map_or(true, |e| key.entity == e) {
                *value = enabled;
            }
        }
    }
}

/// Registry of all filter definitions.
#[derive(Default)]
pub struct FilterRegistry {
    state: RwLock<RegistryState>,
}

impl FilterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter definition.
    ///
    /// Fails with `DuplicateFilter` if the `(entity, name)` pair is taken and
    /// with `InvalidTemplate` if the template references undeclared
    /// parameters. A failed call leaves the registry unchanged.
    pub fn register(&self, definition: FilterDefinition) -> FilterResult<()> {
        definition.validate()?;

        let mut state = self.state.write();
        if state.definitions.contains_key(&definition.key) {
            return Err(FilterError::DuplicateFilter {
                entity: definition.key.entity.clone(),
                name: definition.key.name.clone(),
            });
        }

        let definition = Arc::new(definition);
        let key = definition.key.clone();
        info!(
            filter = %key,
            parameters = definition.parameters.len(),
            enabled = definition.enabled_by_default,
            "registered filter"
        );

        state.enabled.insert(key.clone(), definition.enabled_by_default);
        state
            .by_entity
            .entry(key.entity.clone())
            .or_default()
            .push(definition.clone());
        state.definitions.insert(key, definition);
        Ok(())
    }

    /// Register a filter after checking its template against the model
    /// (fields exist, quantifiers range over collection navigations).
    pub fn register_checked(
        &self,
        definition: FilterDefinition,
        model: &EntityModel,
    ) -> FilterResult<()> {
        model
            .check_predicate(definition.entity(), &definition.template)
            .map_err(|reason| FilterError::InvalidTemplate {
                entity: definition.key.entity.clone(),
                name: definition.key.name.clone(),
                reason,
            })?;
        self.register(definition)
    }

    /// Set the global default state of a filter.
    pub fn set_enabled(&self, entity: &str, name: &str, enabled: bool) -> FilterResult<()> {
        let mut state = self.state.write();
        let key = state.require(entity, name)?.key.clone();
        info!(filter = %key, enabled, "set global filter state");
        state.enabled.insert(key, enabled);
        Ok(())
    }

    /// Enable a filter globally.
    pub fn enable(&self, entity: &str, name: &str) -> FilterResult<()> {
        self.set_enabled(entity, name, true)
    }

    /// Disable a filter globally.
    pub fn disable(&self, entity: &str, name: &str) -> FilterResult<()> {
        self.set_enabled(entity, name, false)
    }

    /// Enable every registered filter, or every filter of one entity type.
    ///
    /// Fails with `UnknownEntity` if no filter is registered for `entity`.
    pub fn enable_all(&self, entity: Option<&str>) -> FilterResult<()> {
        self.set_all(entity, true)
    }

    /// Disable every registered filter, or every filter of one entity type.
    pub fn disable_all(&self, entity: Option<&str>) -> FilterResult<()> {
        self.set_all(entity, false)
    }

    fn set_all(&self, entity: Option<&str>, enabled: bool) -> FilterResult<()> {
        let mut state = self.state.write();
        if let Some(entity) = entity {
            state.require_entity(entity)?;
        }
        info!(entity = entity.unwrap_or("*"), enabled, "set global state for all filters");
        state.set_all(entity, enabled);
        Ok(())
    }

    /// Apply configured toggles in order under a single lock.
    ///
    /// Every toggle is checked before any is applied, so an unknown filter
    /// or entity leaves the registry unchanged.
    pub fn apply_toggles(&self, toggles: &[FilterToggle]) -> FilterResult<()> {
        let mut state = self.state.write();
        for toggle in toggles {
            match &toggle.name {
                Some(name) => {
                    state.require(&toggle.entity, name)?;
                }
                None => state.require_entity(&toggle.entity)?,
            }
        }
        for toggle in toggles {
            match &toggle.name {
                Some(name) => {
                    let key = FilterKey::new(toggle.entity.as_str(), name.as_str());
                    state.enabled.insert(key, toggle.enabled);
                }
                None => state.set_all(Some(toggle.entity.as_str()), toggle.enabled),
            }
        }
        Ok(())
    }

    /// Global state of a filter.
    pub fn is_enabled(&self, entity: &str, name: &str) -> FilterResult<bool> {
        let state = self.state.read();
        let key = &state.require(entity, name)?.key;
        Ok(state.enabled.get(key).copied().unwrap_or(false))
    }

    /// Replace the provider of one parameter for every query.
    pub fn set_parameter(
        &self,
        entity: &str,
        name: &str,
        parameter: &str,
        provider: SharedProvider,
    ) -> FilterResult<()> {
        let mut state = self.state.write();
        let key = Self::require_parameter(&state, entity, name, parameter)?;
        debug!(filter = %key, parameter, "set global parameter override");
        state.parameters.insert((key, parameter.to_string()), provider);
        Ok(())
    }

    /// Revert a parameter to the definition's own provider.
    pub fn clear_parameter(&self, entity: &str, name: &str, parameter: &str) -> FilterResult<()> {
        let mut state = self.state.write();
        let key = Self::require_parameter(&state, entity, name, parameter)?;
        state.parameters.remove(&(key, parameter.to_string()));
        Ok(())
    }

    fn require_parameter(
        state: &RegistryState,
        entity: &str,
        name: &str,
        parameter: &str,
    ) -> FilterResult<FilterKey> {
        let def = state.require(entity, name)?;
        if def.parameter(parameter).is_none() {
            return Err(FilterError::UnknownParameter {
                entity: entity.to_string(),
                name: name.to_string(),
                parameter: parameter.to_string(),
            });
        }
        Ok(def.key.clone())
    }

    /// Look up a definition.
    pub fn definition(&self, entity: &str, name: &str) -> Option<Arc<FilterDefinition>> {
        self.state.read().definitions.get(&FilterKey::new(entity, name)).cloned()
    }

    /// All definitions for an entity, in registration order.
    pub fn definitions_for(&self, entity: &str) -> Vec<Arc<FilterDefinition>> {
        self.state.read().by_entity.get(entity).cloned().unwrap_or_default()
    }

    /// All definitions for an entity paired with their global state, in
    /// registration order. Taken under a single lock.
    pub fn states_for(&self, entity: &str) -> Vec<(Arc<FilterDefinition>, bool)> {
        let state = self.state.read();
        state
            .by_entity
            .get(entity)
            .map(|defs| {
                defs.iter()
                    .map(|d| (d.clone(), state.enabled.get(&d.key).copied().unwrap_or(false)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check whether a filter is registered.
    pub fn contains(&self, entity: &str, name: &str) -> bool {
        self.state.read().definitions.contains_key(&FilterKey::new(entity, name))
    }

    /// Number of registered filters.
    pub fn len(&self) -> usize {
        self.state.read().definitions.len()
    }

    /// Check if no filters are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FilterView for FilterRegistry {
    fn active_filters_for(&self, entity: &str) -> Vec<Arc<FilterDefinition>> {
        self.states_for(entity)
            .into_iter()
            .filter_map(|(def, enabled)| enabled.then_some(def))
            .collect()
    }

    fn parameter_override(&self, key: &FilterKey, parameter: &str) -> Option<SharedProvider> {
        self.state
            .read()
            .parameters
            .get(&(key.clone(), parameter.to_string()))
            .cloned()
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        let mut keys: Vec<_> = state.definitions.keys().map(|k| k.to_string()).collect();
        keys.sort();
        f.debug_struct("FilterRegistry").field("filters", &keys).finish()
    }
}
