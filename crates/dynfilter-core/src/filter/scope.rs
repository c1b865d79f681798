//! Per-unit-of-work filter overrides.
//!
//! A [`FilterSession`] layers overrides on top of the shared registry:
//! a session frame that lives as long as the session, and a stack of
//! temporary frames pushed with [`FilterSession::push_scope`]. The effective
//! state of a filter is the innermost override, else the registry's global
//! default. Frames are restored in push order when their [`ScopeGuard`] is
//! released or dropped.
//!
//! A session is confined to one unit of work. It is `Send` but not `Sync`,
//! so the scope stack can never be shared by concurrent query builds.

use super::definition::FilterDefinition;
use super::params::SharedProvider;
use super::registry::{FilterRegistry, FilterView};
use crate::error::{FilterError, FilterResult};
use dynfilter_proto::FilterKey;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const SESSION_FRAME: u64 = 0;

#[derive(Default)]
struct ScopeFrame {
    id: u64,
    all: Option<bool>,
    entities: HashMap<String, bool>,
    filters: HashMap<FilterKey, bool>,
    parameters: HashMap<(FilterKey, String), SharedProvider>,
}

impl ScopeFrame {
    fn new(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    fn lookup(&self, key: &FilterKey) -> Option<bool> {
        self.filters
            .get(key)
            .or_else(|| self.entities.get(&key.entity))
            .copied()
            .or(self.all)
    }

    /// A later "all" toggle supersedes earlier, narrower toggles in the same
    /// frame.
    fn set_all(&mut self, entity: Option<&str>, enabled: bool) {
        match entity {
            Some(entity) => {
                self.filters.retain(|key, _| key.entity != entity);
                self.entities.insert(entity.to_string(), enabled);
            }
            None => {
                self.filters.clear();
                self.entities.clear();
                self.all = Some(enabled);
            }
        }
    }
}

struct ScopeStack {
    frames: Vec<ScopeFrame>,
    next_id: u64,
}

impl ScopeStack {
    fn new() -> Self {
        Self {
            frames: vec![ScopeFrame::new(SESSION_FRAME)],
            next_id: SESSION_FRAME + 1,
        }
    }

    fn frame_mut(&mut self, id: u64) -> Option<&mut ScopeFrame> {
        self.frames.iter_mut().find(|f| f.id == id)
    }

    fn push(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.frames.push(ScopeFrame::new(id));
        id
    }

    /// Remove frame `id`. A frame that is not innermost is still removed so
    /// its overrides never outlive it, but the call reports `ScopeOrder`.
    fn pop(&mut self, id: u64) -> FilterResult<()> {
        let top = self.frames.last().map(|f| f.id).unwrap_or(SESSION_FRAME);
        if top == id && id != SESSION_FRAME {
            self.frames.pop();
            return Ok(());
        }
        if let Some(pos) = self.frames.iter().position(|f| f.id == id && id != SESSION_FRAME) {
            self.frames.remove(pos);
        }
        Err(FilterError::ScopeOrder {
            expected: top,
            found: id,
        })
    }

    fn effective(&self, key: &FilterKey, global: bool) -> bool {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.lookup(key))
            .unwrap_or(global)
    }

    fn parameter(&self, key: &FilterKey, parameter: &str) -> Option<SharedProvider> {
        let lookup = (key.clone(), parameter.to_string());
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.parameters.get(&lookup).cloned())
    }
}

/// Filter state for one unit of work (a request, a job, a test).
pub struct FilterSession {
    registry: Arc<FilterRegistry>,
    stack: RefCell<ScopeStack>,
}

impl FilterSession {
    /// Start a session over a shared registry.
    pub fn new(registry: Arc<FilterRegistry>) -> Self {
        Self {
            registry,
            stack: RefCell::new(ScopeStack::new()),
        }
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<FilterRegistry> {
        &self.registry
    }

    /// Override a filter's state for the rest of this session.
    pub fn set_enabled(&self, entity: &str, name: &str, enabled: bool) -> FilterResult<()> {
        self.set_frame_enabled(SESSION_FRAME, entity, name, enabled)
    }

    /// Enable a filter for the rest of this session.
    pub fn enable(&self, entity: &str, name: &str) -> FilterResult<()> {
        self.set_enabled(entity, name, true)
    }

    /// Disable a filter for the rest of this session.
    pub fn disable(&self, entity: &str, name: &str) -> FilterResult<()> {
        self.set_enabled(entity, name, false)
    }

    /// Enable every filter (or every filter of one entity) for this session.
    pub fn enable_all(&self, entity: Option<&str>) {
        self.set_frame_all(SESSION_FRAME, entity, true);
    }

    /// Disable every filter (or every filter of one entity) for this session.
    pub fn disable_all(&self, entity: Option<&str>) {
        self.set_frame_all(SESSION_FRAME, entity, false);
    }

    /// Override a parameter provider for the rest of this session.
    pub fn set_parameter(
        &self,
        entity: &str,
        name: &str,
        parameter: &str,
        provider: SharedProvider,
    ) -> FilterResult<()> {
        self.set_frame_parameter(SESSION_FRAME, entity, name, parameter, provider)
    }

    /// Drop every session-level override. Open scopes are not affected.
    pub fn clear_overrides(&self) {
        let mut stack = self.stack.borrow_mut();
        if let Some(frame) = stack.frame_mut(SESSION_FRAME) {
            *frame = ScopeFrame::new(SESSION_FRAME);
        }
    }

    /// Push a temporary override frame.
    pub fn push_scope(&self) -> ScopeGuard<'_> {
        let id = self.stack.borrow_mut().push();
        debug!(scope = id, "pushed filter scope");
        ScopeGuard {
            session: self,
            id,
            released: false,
        }
    }

    /// Run `f` inside a fresh scope and release it afterwards.
    ///
    /// The scope is released even when `f` returns an error or panics.
    pub fn with_scope<R>(
        &self,
        f: impl FnOnce(&ScopeGuard<'_>) -> FilterResult<R>,
    ) -> FilterResult<R> {
        let scope = self.push_scope();
        let result = f(&scope);
        scope.release()?;
        result
    }

    /// Number of open scopes, not counting the session frame.
    pub fn depth(&self) -> usize {
        self.stack.borrow().frames.len() - 1
    }

    /// Effective state of a filter under the current stack.
    pub fn is_enabled(&self, entity: &str, name: &str) -> FilterResult<bool> {
        let global = self.registry.is_enabled(entity, name)?;
        Ok(self
            .stack
            .borrow()
            .effective(&FilterKey::new(entity, name), global))
    }

    fn require(&self, entity: &str, name: &str) -> FilterResult<Arc<FilterDefinition>> {
        self.registry
            .definition(entity, name)
            .ok_or_else(|| FilterError::unknown_filter(entity, name))
    }

    fn set_frame_enabled(
        &self,
        frame: u64,
        entity: &str,
        name: &str,
        enabled: bool,
    ) -> FilterResult<()> {
        let def = self.require(entity, name)?;
        debug!(scope = frame, filter = %def.key, enabled, "override filter state");
        if let Some(f) = self.stack.borrow_mut().frame_mut(frame) {
            f.filters.insert(def.key.clone(), enabled);
        }
        Ok(())
    }

    fn set_frame_all(&self, frame: u64, entity: Option<&str>, enabled: bool) {
        debug!(scope = frame, entity = entity.unwrap_or("*"), enabled, "override all filters");
        if let Some(f) = self.stack.borrow_mut().frame_mut(frame) {
            f.set_all(entity, enabled);
        }
    }

    fn set_frame_parameter(
        &self,
        frame: u64,
        entity: &str,
        name: &str,
        parameter: &str,
        provider: SharedProvider,
    ) -> FilterResult<()> {
        let def = self.require(entity, name)?;
        if def.parameter(parameter).is_none() {
            return Err(FilterError::UnknownParameter {
                entity: entity.to_string(),
                name: name.to_string(),
                parameter: parameter.to_string(),
            });
        }
        debug!(scope = frame, filter = %def.key, parameter, "override parameter");
        if let Some(f) = self.stack.borrow_mut().frame_mut(frame) {
            f.parameters
                .insert((def.key.clone(), parameter.to_string()), provider);
        }
        Ok(())
    }
}

impl FilterView for FilterSession {
    fn active_filters_for(&self, entity: &str) -> Vec<Arc<FilterDefinition>> {
        let states = self.registry.states_for(entity);
        let stack = self.stack.borrow();
        states
            .into_iter()
            .filter(|(def, global)| stack.effective(&def.key, *global))
            .map(|(def, _)| def)
            .collect()
    }

    fn parameter_override(&self, key: &FilterKey, parameter: &str) -> Option<SharedProvider> {
        let scoped = self.stack.borrow().parameter(key, parameter);
        scoped.or_else(|| self.registry.parameter_override(key, parameter))
    }
}

impl std::fmt::Debug for FilterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterSession")
            .field("registry", &self.registry)
            .field("depth", &self.depth())
            .finish()
    }
}

/// Handle to one temporary override frame.
///
/// Overrides set through the guard are visible while the frame is open,
/// including to frames pushed after it. The frame is popped by
/// [`ScopeGuard::release`] or, failing that, when the guard is dropped.
pub struct ScopeGuard<'s> {
    session: &'s FilterSession,
    id: u64,
    released: bool,
}

impl ScopeGuard<'_> {
    /// Frame id, as reported in `ScopeOrder` errors.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Override a filter's state inside this scope.
    pub fn set_enabled(&self, entity: &str, name: &str, enabled: bool) -> FilterResult<()> {
        self.session.set_frame_enabled(self.id, entity, name, enabled)
    }

    /// Enable a filter inside this scope.
    pub fn enable(&self, entity: &str, name: &str) -> FilterResult<()> {
        self.set_enabled(entity, name, true)
    }

    /// Disable a filter inside this scope.
    pub fn disable(&self, entity: &str, name: &str) -> FilterResult<()> {
        self.set_enabled(entity, name, false)
    }

    /// Enable every filter (or every filter of one entity) inside this scope.
    pub fn enable_all(&self, entity: Option<&str>) {
        self.session.set_frame_all(self.id, entity, true);
    }

    /// Disable every filter (or every filter of one entity) inside this scope.
    pub fn disable_all(&self, entity: Option<&str>) {
        self.session.set_frame_all(self.id, entity, false);
    }

    /// Override a parameter provider inside this scope.
    pub fn set_parameter(
        &self,
        entity: &str,
        name: &str,
        parameter: &str,
        provider: SharedProvider,
    ) -> FilterResult<()> {
        self.session
            .set_frame_parameter(self.id, entity, name, parameter, provider)
    }

    /// Pop this frame.
    ///
    /// Fails with `ScopeOrder` when frames pushed after this one are still
    /// open. The frame's overrides are discarded either way.
    pub fn release(mut self) -> FilterResult<()> {
        self.released = true;
        let result = self.session.stack.borrow_mut().pop(self.id);
        debug!(scope = self.id, ok = result.is_ok(), "released filter scope");
        result
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.session.stack.borrow_mut().pop(self.id) {
            warn!(scope = self.id, error = %e, "filter scope dropped out of order");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::params::constant;
    use dynfilter_proto::{field, lit, param, Value};

    fn registry() -> Arc<FilterRegistry> {
        let registry = FilterRegistry::new();
        registry
            .register(FilterDefinition::new(
                "Order",
                "soft_delete",
                field("deleted").eq(lit(false)),
            ))
            .unwrap();
        registry
            .register(
                FilterDefinition::new("Order", "tenant", field("tenant").eq(param("tenant")))
                    .with_parameter("tenant", constant("acme")),
            )
            .unwrap();
        registry
            .register(FilterDefinition::new(
                "Invoice",
                "soft_delete",
                field("deleted").eq(lit(false)),
            ))
            .unwrap();
        Arc::new(registry)
    }

    fn active(session: &FilterSession, entity: &str) -> Vec<String> {
        session
            .active_filters_for(entity)
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    #[test]
    fn test_scope_restores_default() {
        for default in [true, false] {
            let registry = registry();
            registry.set_enabled("Order", "soft_delete", default).unwrap();
            let session = FilterSession::new(registry);

            let scope = session.push_scope();
            scope.set_enabled("Order", "soft_delete", !default).unwrap();
            assert_eq!(session.is_enabled("Order", "soft_delete").unwrap(), !default);
            scope.release().unwrap();

            assert_eq!(session.is_enabled("Order", "soft_delete").unwrap(), default);
            assert_eq!(session.depth(), 0);
        }
    }

    #[test]
    fn test_scope_restores_on_drop() {
        let session = FilterSession::new(registry());
        {
            let scope = session.push_scope();
            scope.disable("Order", "soft_delete").unwrap();
            assert!(!session.is_enabled("Order", "soft_delete").unwrap());
        }
        assert!(session.is_enabled("Order", "soft_delete").unwrap());
        assert_eq!(session.depth(), 0);
    }

    #[test]
    fn test_nested_scopes_innermost_wins() {
        let session = FilterSession::new(registry());
        let outer = session.push_scope();
        outer.disable("Order", "soft_delete").unwrap();

        let inner = session.push_scope();
        assert!(!session.is_enabled("Order", "soft_delete").unwrap());
        inner.enable("Order", "soft_delete").unwrap();
        assert!(session.is_enabled("Order", "soft_delete").unwrap());

        inner.release().unwrap();
        assert!(!session.is_enabled("Order", "soft_delete").unwrap());
        outer.release().unwrap();
        assert!(session.is_enabled("Order", "soft_delete").unwrap());
    }

    #[test]
    fn test_out_of_order_release() {
        let session = FilterSession::new(registry());
        let outer = session.push_scope();
        outer.disable("Order", "soft_delete").unwrap();
        let inner = session.push_scope();
        let (outer_id, inner_id) = (outer.id(), inner.id());

        match outer.release() {
            Err(FilterError::ScopeOrder { expected, found }) => {
                assert_eq!(expected, inner_id);
                assert_eq!(found, outer_id);
            }
            other => panic!("Expected ScopeOrder, got {:?}", other),
        }
        // The outer frame's overrides are gone; the inner frame is still open.
        assert!(session.is_enabled("Order", "soft_delete").unwrap());
        assert_eq!(session.depth(), 1);

        inner.release().unwrap();
        assert_eq!(session.depth(), 0);
    }

    #[test]
    fn test_session_override_below_scopes() {
        let session = FilterSession::new(registry());
        session.disable("Order", "soft_delete").unwrap();
        assert!(!session.is_enabled("Order", "soft_delete").unwrap());

        session
            .with_scope(|scope| {
                scope.enable("Order", "soft_delete")?;
                assert!(session.is_enabled("Order", "soft_delete")?);
                Ok(())
            })
            .unwrap();

        assert!(!session.is_enabled("Order", "soft_delete").unwrap());
        // The registry itself is untouched.
        assert!(session.registry().is_enabled("Order", "soft_delete").unwrap());

        session.clear_overrides();
        assert!(session.is_enabled("Order", "soft_delete").unwrap());
    }

    #[test]
    fn test_with_scope_releases_on_error() {
        let session = FilterSession::new(registry());
        let result: FilterResult<()> = session.with_scope(|scope| {
            scope.disable("Order", "soft_delete")?;
            scope.disable("Order", "missing")
        });
        assert!(matches!(result, Err(FilterError::UnknownFilter { .. })));
        assert_eq!(session.depth(), 0);
        assert!(session.is_enabled("Order", "soft_delete").unwrap());
    }

    #[test]
    fn test_disable_all_then_enable_one() {
        let session = FilterSession::new(registry());
        let scope = session.push_scope();
        scope.disable_all(None);
        assert!(active(&session, "Order").is_empty());
        assert!(active(&session, "Invoice").is_empty());

        scope.enable("Order", "tenant").unwrap();
        assert_eq!(active(&session, "Order"), vec!["tenant"]);

        // A later entity-wide toggle supersedes the single-filter override.
        scope.disable_all(Some("Order"));
        assert!(active(&session, "Order").is_empty());
        scope.release().unwrap();

        assert_eq!(active(&session, "Order"), vec!["soft_delete", "tenant"]);
    }

    #[test]
    fn test_scoped_parameter_override() {
        let session = FilterSession::new(registry());
        let key = FilterKey::new("Order", "tenant");
        assert!(session.parameter_override(&key, "tenant").is_none());

        session
            .registry()
            .set_parameter("Order", "tenant", "tenant", constant("global"))
            .unwrap();
        let scope = session.push_scope();
        scope
            .set_parameter("Order", "tenant", "tenant", constant("scoped"))
            .unwrap();
        let provider = session.parameter_override(&key, "tenant").unwrap();
        assert_eq!(provider.provide().unwrap(), Value::from("scoped"));
        scope.release().unwrap();

        let provider = session.parameter_override(&key, "tenant").unwrap();
        assert_eq!(provider.provide().unwrap(), Value::from("global"));
    }

    #[test]
    fn test_unknown_filter_and_parameter() {
        let session = FilterSession::new(registry());
        assert!(matches!(
            session.set_enabled("Order", "missing", true),
            Err(FilterError::UnknownFilter { .. })
        ));
        assert!(matches!(
            session.set_parameter("Order", "soft_delete", "x", constant(1)),
            Err(FilterError::UnknownParameter { .. })
        ));
        assert!(session.is_enabled("Order", "missing").is_err());
    }
}
