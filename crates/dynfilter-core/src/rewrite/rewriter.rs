//! Quantifier-aware predicate rewriting.
//!
//! The rewriter conjoins the active filters of an entity type with a base
//! predicate, then walks the result and rewrites every `Any` / `All`
//! quantifier so that the filters of the child entity type apply to the
//! collection elements the quantifier ranges over:
//!
//! - `Any(P)` over a filtered child becomes `Any(C AND P)` (or `Any(C)` with
//!   no `P`): only visible elements can witness the predicate.
//! - `All(P)` over a filtered child becomes `All(NOT C OR P)`: hidden
//!   elements satisfy the body vacuously. `All()` with no body is unchanged.
//!
//! Every instantiated clause is wrapped in `PredicateExpr::Injected`, which
//! lets a second rewrite recognise it and skip the filter without calling
//! its parameter providers again. A marker only counts when its clause is
//! the filter's template with every parameter bound to a literal; any other
//! clause under the same key is treated as part of the base predicate.

use crate::catalog::NavigationResolver;
use crate::error::{FilterError, FilterResult};
use crate::filter::{FilterDefinition, FilterView};
use dynfilter_proto::{FilterKey, PredicateExpr, QuantifierKind, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

/// Default maximum quantifier nesting depth.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Rewrite limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteOptions {
    /// Maximum quantifier nesting, counting quantifiers introduced by
    /// injected filters. Mutually recursive filters over navigations hit
    /// this limit.
    pub max_depth: usize,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl RewriteOptions {
    /// Set the maximum quantifier nesting depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Combines filter predicates into queries.
///
/// A rewrite is a pure read of the filter view: it never changes registry or
/// scope state, so an aborted rewrite leaves nothing to undo.
pub struct PredicateRewriter<'a, V: ?Sized, R: ?Sized> {
    view: &'a V,
    model: &'a R,
    options: RewriteOptions,
}

impl<'a, V, R> PredicateRewriter<'a, V, R>
where
    V: FilterView + ?Sized,
    R: NavigationResolver + ?Sized,
{
    /// Create a rewriter reading filters from `view` and navigations from
    /// `model`.
    pub fn new(view: &'a V, model: &'a R) -> Self {
        Self {
            view,
            model,
            options: RewriteOptions::default(),
        }
    }

    /// Replace the rewrite limits.
    pub fn with_options(mut self, options: RewriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Current rewrite limits.
    pub fn options(&self) -> &RewriteOptions {
        &self.options
    }

    /// Rewrite the predicate of a query rooted at `entity`.
    ///
    /// Produces `((f1 AND ... AND fN) AND base)` with filters in registration
    /// order, then rewrites every quantifier in the result. Returns `None`
    /// when there is neither a filter nor a base predicate.
    #[instrument(level = "debug", skip(self, base))]
    pub fn rewrite_root(
        &self,
        entity: &str,
        base: Option<PredicateExpr>,
    ) -> FilterResult<Option<PredicateExpr>> {
        let applied = base.as_ref().map(applied_conjuncts).unwrap_or_default();
        let clauses = self.instantiate_active(entity, &applied)?;

        let combined = match (PredicateExpr::conjoin_all(clauses), base) {
            (Some(filters), Some(base)) => Some(filters.and(base)),
            (filters, base) => filters.or(base),
        };

        combined.map(|expr| self.walk(entity, expr, 0)).transpose()
    }

    /// Rewrite the body of a quantifier over a collection of `child_entity`.
    ///
    /// Only the body is returned, and quantifiers inside it are left alone;
    /// [`rewrite_nested`](Self::rewrite_nested) walks into them.
    pub fn rewrite_quantifier(
        &self,
        kind: QuantifierKind,
        child_entity: &str,
        inner: Option<PredicateExpr>,
    ) -> FilterResult<Option<PredicateExpr>> {
        match kind {
            QuantifierKind::Any => {
                let applied = inner.as_ref().map(applied_conjuncts).unwrap_or_default();
                let clauses = self.instantiate_active(child_entity, &applied)?;
                Ok(match PredicateExpr::conjoin_all(clauses) {
                    None => inner,
                    Some(filters) => Some(match inner {
                        Some(inner) => filters.and(inner),
                        None => filters,
                    }),
                })
            }
            QuantifierKind::All => {
                // All() over any subset of elements is still true.
                let Some(inner) = inner else {
                    return Ok(None);
                };
                let applied = applied_implications(&inner);
                let clauses = self.instantiate_active(child_entity, &applied)?;
                Ok(Some(match PredicateExpr::conjoin_all(clauses) {
                    None => inner,
                    Some(filters) => (!filters).or(inner),
                }))
            }
        }
    }

    /// Rewrite a quantifier expression whose collection is a navigation of
    /// `entity`, including every quantifier nested in its body.
    pub fn rewrite_quantifier_expr(
        &self,
        entity: &str,
        expr: PredicateExpr,
    ) -> FilterResult<PredicateExpr> {
        match expr {
            PredicateExpr::QuantifierAny { .. } | PredicateExpr::QuantifierAll { .. } => {
                self.walk(entity, expr, 0)
            }
            other => Err(FilterError::UnsupportedPredicateShape(format!(
                "expected a quantifier, got '{}'",
                other
            ))),
        }
    }

    /// Rewrite every quantifier in a predicate evaluated against `entity`,
    /// without injecting the filters of `entity` itself.
    pub fn rewrite_nested(&self, entity: &str, expr: PredicateExpr) -> FilterResult<PredicateExpr> {
        self.walk(entity, expr, 0)
    }

    fn walk(&self, entity: &str, expr: PredicateExpr, depth: usize) -> FilterResult<PredicateExpr> {
        Ok(match expr {
            PredicateExpr::Conjunction(l, r) => PredicateExpr::Conjunction(
                Box::new(self.walk(entity, *l, depth)?),
                Box::new(self.walk(entity, *r, depth)?),
            ),
            PredicateExpr::Disjunction(l, r) => PredicateExpr::Disjunction(
                Box::new(self.walk(entity, *l, depth)?),
                Box::new(self.walk(entity, *r, depth)?),
            ),
            PredicateExpr::Negation(inner) => {
                PredicateExpr::Negation(Box::new(self.walk(entity, *inner, depth)?))
            }
            PredicateExpr::Injected { key, predicate } => PredicateExpr::Injected {
                key,
                predicate: Box::new(self.walk(entity, *predicate, depth)?),
            },
            PredicateExpr::QuantifierAny {
                collection,
                predicate,
            } => self.quantifier(entity, QuantifierKind::Any, collection, predicate, depth)?,
            PredicateExpr::QuantifierAll {
                collection,
                predicate,
            } => self.quantifier(entity, QuantifierKind::All, collection, predicate, depth)?,
            leaf @ (PredicateExpr::Comparison { .. }
            | PredicateExpr::Literal(_)
            | PredicateExpr::SubjectRef(_)
            | PredicateExpr::ParamRef(_)) => leaf,
        })
    }

    fn quantifier(
        &self,
        entity: &str,
        kind: QuantifierKind,
        collection: String,
        body: Option<Box<PredicateExpr>>,
        depth: usize,
    ) -> FilterResult<PredicateExpr> {
        let depth = depth + 1;
        if depth > self.options.max_depth {
            return Err(FilterError::RecursionLimit {
                depth: self.options.max_depth,
            });
        }

        let child = self.collection_target(entity, &collection)?;
        let body = self.rewrite_quantifier(kind, &child, body.map(|b| *b))?;
        let body = body
            .map(|b| self.walk(&child, b, depth).map(Box::new))
            .transpose()?;

        Ok(match kind {
            QuantifierKind::Any => PredicateExpr::QuantifierAny {
                collection,
                predicate: body,
            },
            QuantifierKind::All => PredicateExpr::QuantifierAll {
                collection,
                predicate: body,
            },
        })
    }

    fn collection_target(&self, entity: &str, collection: &str) -> FilterResult<String> {
        match self.model.navigation(entity, collection) {
            Some(nav) if nav.is_collection() => Ok(nav.to_entity.clone()),
            Some(nav) => Err(FilterError::UnsupportedPredicateShape(format!(
                "quantifier over '{}' on {}: {} is a single reference",
                collection, entity, nav.to_entity
            ))),
            None => Err(FilterError::UnsupportedPredicateShape(format!(
                "quantifier over '{}': not a navigation of {}",
                collection, entity
            ))),
        }
    }

    fn instantiate_active(
        &self,
        entity: &str,
        applied: &[(&FilterKey, &PredicateExpr)],
    ) -> FilterResult<Vec<PredicateExpr>> {
        let mut clauses = Vec::new();
        for def in self.view.active_filters_for(entity) {
            let mut marked = applied.iter().filter(|(key, _)| **key == def.key).peekable();
            if marked.peek().is_some() {
                if marked.any(|(_, clause)| is_instance_of(&def, clause)) {
                    debug!(filter = %def.key, "filter already applied");
                    continue;
                }
                warn!(filter = %def.key, "marker does not match filter template");
            }
            clauses.push(self.instantiate(&def)?);
        }
        Ok(clauses)
    }

    /// Bind the template's parameters to fresh provider values.
    fn instantiate(&self, def: &FilterDefinition) -> FilterResult<PredicateExpr> {
        let referenced = def.template.param_refs();
        let mut bindings = Vec::with_capacity(referenced.len());

        for parameter in def.parameters.iter().filter(|p| referenced.contains(p.name.as_str())) {
            let resolution = |reason: String| FilterError::ParameterResolution {
                entity: def.key.entity.clone(),
                name: def.key.name.clone(),
                parameter: parameter.name.clone(),
                reason,
            };

            let provider = self
                .view
                .parameter_override(&def.key, &parameter.name)
                .unwrap_or_else(|| parameter.provider.clone());
            let value = provider.provide().map_err(|e| resolution(e.to_string()))?;
            if !parameter.kind.accepts(&value) {
                return Err(resolution(format!(
                    "expected {} value, got {}",
                    parameter.kind,
                    value.type_name()
                )));
            }
            bindings.push((parameter.name.clone(), value));
        }

        debug!(filter = %def.key, parameters = bindings.len(), "instantiated filter");
        Ok(def.template.bind_params(&bindings).injected(def.key.clone()))
    }
}

/// Injected clauses among the conjuncts of `expr`.
fn applied_conjuncts(expr: &PredicateExpr) -> Vec<(&FilterKey, &PredicateExpr)> {
    expr.conjuncts()
        .into_iter()
        .filter_map(|conjunct| match conjunct {
            PredicateExpr::Injected { key, predicate } => Some((key, &**predicate)),
            _ => None,
        })
        .collect()
}

/// Injected clauses already guarding an `All` body, found in the `NOT (...)`
/// operands of the disjunction chain `NOT C2 OR (NOT C1 OR P)`.
fn applied_implications(expr: &PredicateExpr) -> Vec<(&FilterKey, &PredicateExpr)> {
    let mut applied = Vec::new();
    let mut current = expr;
    while let PredicateExpr::Disjunction(left, right) = current {
        let PredicateExpr::Negation(guard) = &**left else {
            break;
        };
        applied.extend(applied_conjuncts(guard));
        current = &**right;
    }
    applied
}

/// Whether `clause` is the template of `def` with every parameter bound to
/// a literal of its declared kind. Quantifier bodies may carry the guards a
/// rewrite injected for their element type.
fn is_instance_of(def: &FilterDefinition, clause: &PredicateExpr) -> bool {
    let mut bindings = HashMap::new();
    if !template_matches(&def.template, clause, &mut bindings) {
        return false;
    }
    bindings.iter().all(|(name, value)| {
        def.parameters
            .iter()
            .find(|p| p.name == *name)
            .is_some_and(|p| p.kind.accepts(value))
    })
}

fn template_matches<'t, 'c>(
    template: &'t PredicateExpr,
    clause: &'c PredicateExpr,
    bindings: &mut HashMap<&'t str, &'c Value>,
) -> bool {
    use PredicateExpr as P;
    match (template, clause) {
        (P::ParamRef(name), P::Literal(value)) => match bindings.get(name.as_str()) {
            Some(bound) => *bound == value,
            None => {
                bindings.insert(name.as_str(), value);
                true
            }
        },
        (
            P::Comparison { op, left, right },
            P::Comparison {
                op: other_op,
                left: other_left,
                right: other_right,
            },
        ) => {
            op == other_op
                && template_matches(left, other_left, bindings)
                && template_matches(right, other_right, bindings)
        }
        (P::Conjunction(a, b), P::Conjunction(c, d))
        | (P::Disjunction(a, b), P::Disjunction(c, d)) => {
            template_matches(a, c, bindings) && template_matches(b, d, bindings)
        }
        (P::Negation(a), P::Negation(b)) => template_matches(a, b, bindings),
        (
            P::Injected { key, predicate },
            P::Injected {
                key: other_key,
                predicate: other,
            },
        ) => key == other_key && template_matches(predicate, other, bindings),
        (
            P::QuantifierAny {
                collection,
                predicate,
            },
            P::QuantifierAny {
                collection: other_collection,
                predicate: other,
            },
        ) => {
            collection == other_collection
                && bodies_match(
                    predicate.as_deref(),
                    strip_any_guards(other.as_deref()),
                    bindings,
                )
        }
        (
            P::QuantifierAll {
                collection,
                predicate,
            },
            P::QuantifierAll {
                collection: other_collection,
                predicate: other,
            },
        ) => {
            collection == other_collection
                && bodies_match(
                    predicate.as_deref(),
                    strip_all_guards(other.as_deref()),
                    bindings,
                )
        }
        (P::Literal(a), P::Literal(b)) => a == b,
        (P::SubjectRef(a), P::SubjectRef(b)) => a == b,
        _ => false,
    }
}

fn bodies_match<'t, 'c>(
    template: Option<&'t PredicateExpr>,
    clause: Option<&'c PredicateExpr>,
    bindings: &mut HashMap<&'t str, &'c Value>,
) -> bool {
    match (template, clause) {
        (None, None) => true,
        (Some(template), Some(clause)) => template_matches(template, clause, bindings),
        _ => false,
    }
}

/// True when every conjunct of `expr` is an injected clause.
fn is_guard(expr: &PredicateExpr) -> bool {
    expr.conjuncts().iter().all(|c| c.injected_key().is_some())
}

/// The user part of an `Any` body shaped `C AND P` (or `C` alone).
fn strip_any_guards(body: Option<&PredicateExpr>) -> Option<&PredicateExpr> {
    let body = body?;
    if is_guard(body) {
        return None;
    }
    match body {
        PredicateExpr::Conjunction(guards, rest) if is_guard(guards) => Some(&**rest),
        other => Some(other),
    }
}

/// The user part of an `All` body shaped `NOT C2 OR (NOT C1 OR P)`.
fn strip_all_guards(body: Option<&PredicateExpr>) -> Option<&PredicateExpr> {
    let mut current = body?;
    while let PredicateExpr::Disjunction(left, right) = current {
        match &**left {
            PredicateExpr::Negation(guards) if is_guard(guards) => current = &**right,
            _ => break,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, EntityModel, NavigationDef};
    use crate::filter::{constant, from_fn, FilterRegistry, FilterSession};
    use crate::query::{EntityRecord, PredicateEvaluator};
    use dynfilter_proto::{all, any, field, lit, param, ValueKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn model() -> EntityModel {
        EntityModel::new()
            .with_entity(EntityDef::new("Parent", "id"))
            .with_entity(EntityDef::new("Child", "id").with_field("child_value"))
            .with_entity(EntityDef::new("Toy", "id"))
            .with_navigation(NavigationDef::many("children", "Parent", "Child"))
            .with_navigation(NavigationDef::one("parent", "Child", "Parent"))
            .with_navigation(NavigationDef::many("toys", "Child", "Toy"))
    }

    fn child_filter() -> PredicateExpr {
        field("child_value").le(lit(2)).injected(FilterKey::new("Child", "visible"))
    }

    fn registry_with_child_filter() -> FilterRegistry {
        let registry = FilterRegistry::new();
        registry
            .register(
                FilterDefinition::new("Child", "visible", field("child_value").le(param("max")))
                    .with_typed_parameter("max", ValueKind::Integer, constant(2)),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_no_filters_is_identity() {
        let registry = FilterRegistry::new();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let base = field("id")
            .eq(lit(1))
            .and(any("children", Some(field("child_value").eq(lit(1)))));
        assert_eq!(rewriter.rewrite_root("Parent", Some(base.clone())).unwrap(), Some(base));
        assert_eq!(rewriter.rewrite_root("Parent", None).unwrap(), None);
    }

    #[test]
    fn test_root_conjunction_order() {
        let registry = FilterRegistry::new();
        registry
            .register(FilterDefinition::new("Parent", "a", field("a").eq(lit(1))))
            .unwrap();
        registry
            .register(FilterDefinition::new("Parent", "b", field("b").eq(lit(2))))
            .unwrap();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let base = field("id").gt(lit(10));
        let expected = field("a")
            .eq(lit(1))
            .injected(FilterKey::new("Parent", "a"))
            .and(field("b").eq(lit(2)).injected(FilterKey::new("Parent", "b")))
            .and(base.clone());
        assert_eq!(rewriter.rewrite_root("Parent", Some(base)).unwrap(), Some(expected));

        let without_base = rewriter.rewrite_root("Parent", None).unwrap().unwrap();
        assert_eq!(without_base.to_string(), "([Parent.a: a == 1] AND [Parent.b: b == 2])");
    }

    #[test]
    fn test_any_over_filtered_child() {
        let registry = registry_with_child_filter();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let predicate = field("child_value").eq(lit(1));
        let rewritten = rewriter
            .rewrite_root("Parent", Some(any("children", Some(predicate.clone()))))
            .unwrap();
        assert_eq!(rewritten, Some(any("children", Some(child_filter().and(predicate)))));

        let rewritten = rewriter.rewrite_root("Parent", Some(any("children", None))).unwrap();
        assert_eq!(rewritten, Some(any("children", Some(child_filter()))));
    }

    #[test]
    fn test_all_over_filtered_child() {
        let registry = registry_with_child_filter();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let predicate = field("child_value").eq(lit(1));
        let rewritten = rewriter
            .rewrite_root("Parent", Some(all("children", Some(predicate.clone()))))
            .unwrap();
        assert_eq!(rewritten, Some(all("children", Some((!child_filter()).or(predicate)))));
    }

    #[test]
    fn test_vacuous_all_skips_providers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = FilterRegistry::new();
        registry
            .register(
                FilterDefinition::new("Child", "visible", field("child_value").le(param("max")))
                    .with_parameter("max", from_fn(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        2
                    })),
            )
            .unwrap();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let rewritten = rewriter.rewrite_root("Parent", Some(all("children", None))).unwrap();
        assert_eq!(rewritten, Some(all("children", None)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = FilterRegistry::new();
        registry
            .register(FilterDefinition::new("Parent", "has_children", any("children", None)))
            .unwrap();
        registry
            .register(
                FilterDefinition::new("Child", "visible", field("child_value").le(param("max")))
                    .with_parameter("max", from_fn(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        2
                    })),
            )
            .unwrap();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let base = all("children", Some(field("child_value").eq(lit(1))));
        let once = rewriter.rewrite_root("Parent", Some(base)).unwrap().unwrap();
        let calls_after_first = calls.load(Ordering::SeqCst);
        assert_eq!(calls_after_first, 2);

        let twice = rewriter.rewrite_root("Parent", Some(once.clone())).unwrap().unwrap();
        assert_eq!(twice, once);
        assert_eq!(calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[test]
    fn test_root_filter_quantifier_is_rewritten() {
        let registry = registry_with_child_filter();
        registry
            .register(FilterDefinition::new("Parent", "has_children", any("children", None)))
            .unwrap();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let rewritten = rewriter.rewrite_root("Parent", None).unwrap().unwrap();
        assert_eq!(
            rewritten,
            any("children", Some(child_filter())).injected(FilterKey::new("Parent", "has_children"))
        );
    }

    #[test]
    fn test_grandchild_rewritten_without_child_filter() {
        let registry = FilterRegistry::new();
        registry
            .register(FilterDefinition::new("Toy", "unbroken", field("broken").eq(lit(false))))
            .unwrap();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let base = all("children", Some(any("toys", None)));
        let rewritten = rewriter.rewrite_root("Parent", Some(base)).unwrap().unwrap();
        assert_eq!(
            rewritten.to_string(),
            "children.all(toys.any([Toy.unbroken: broken == false]))"
        );
    }

    #[test]
    fn test_quantifier_over_reference_is_rejected() {
        let registry = FilterRegistry::new();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let err = rewriter
            .rewrite_root("Child", Some(any("parent", None)))
            .unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedPredicateShape(_)));

        let err = rewriter
            .rewrite_root("Child", Some(all("siblings", None)))
            .unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedPredicateShape(_)));
    }

    #[test]
    fn test_mutually_recursive_filters_hit_limit() {
        let model = EntityModel::new()
            .with_navigation(NavigationDef::many("posts", "Tag", "Post"))
            .with_navigation(NavigationDef::many("tags", "Post", "Tag"));
        let registry = FilterRegistry::new();
        registry
            .register(FilterDefinition::new("Tag", "used", any("posts", None)))
            .unwrap();
        registry
            .register(FilterDefinition::new("Post", "tagged", any("tags", None)))
            .unwrap();
        let rewriter = PredicateRewriter::new(&registry, &model)
            .with_options(RewriteOptions::default().with_max_depth(4));

        match rewriter.rewrite_root("Tag", None) {
            Err(FilterError::RecursionLimit { depth }) => assert_eq!(depth, 4),
            other => panic!("Expected RecursionLimit, got {:?}", other),
        }
    }

    #[test]
    fn test_parameter_kind_mismatch() {
        let registry = FilterRegistry::new();
        registry
            .register(
                FilterDefinition::new("Child", "visible", field("child_value").le(param("max")))
                    .with_typed_parameter("max", ValueKind::Integer, constant("two")),
            )
            .unwrap();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        match rewriter.rewrite_root("Child", None) {
            Err(FilterError::ParameterResolution { parameter, reason, .. }) => {
                assert_eq!(parameter, "max");
                assert!(reason.contains("integer"));
            }
            other => panic!("Expected ParameterResolution, got {:?}", other),
        }
    }

    #[test]
    fn test_failing_provider() {
        let registry = FilterRegistry::new();
        let provider: crate::filter::SharedProvider = Arc::new(|| Err::<i32, _>("no tenant"));
        registry
            .register(
                FilterDefinition::new("Child", "tenant", field("tenant").eq(param("tenant")))
                    .with_parameter("tenant", provider),
            )
            .unwrap();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let err = rewriter
            .rewrite_root("Parent", Some(any("children", None)))
            .unwrap_err();
        assert!(err.to_string().contains("no tenant"));
    }

    #[test]
    fn test_scope_disabled_child_filter_is_absent() {
        let registry = Arc::new(registry_with_child_filter());
        let session = FilterSession::new(registry);
        let model = model();
        let base = any("children", Some(field("child_value").eq(lit(1))));

        let scope = session.push_scope();
        scope.disable("Child", "visible").unwrap();
        let rewriter = PredicateRewriter::new(&session, &model);
        assert_eq!(
            rewriter.rewrite_root("Parent", Some(base.clone())).unwrap(),
            Some(base.clone())
        );
        scope.release().unwrap();

        let rewritten = rewriter.rewrite_root("Parent", Some(base)).unwrap().unwrap();
        assert!(rewritten.to_string().contains("[Child.visible: child_value <= 2]"));
    }

    #[test]
    fn test_scoped_parameter_value_is_bound() {
        let registry = Arc::new(registry_with_child_filter());
        let session = FilterSession::new(registry);
        let model = model();
        let rewriter = PredicateRewriter::new(&session, &model);

        let rewritten = session
            .with_scope(|scope| {
                scope.set_parameter("Child", "visible", "max", constant(7))?;
                rewriter.rewrite_root("Child", None)
            })
            .unwrap();
        assert_eq!(
            rewritten,
            Some(field("child_value").le(lit(7)).injected(FilterKey::new("Child", "visible")))
        );
    }

    #[test]
    fn test_rewrite_quantifier_body_only() {
        let registry = registry_with_child_filter();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let body = rewriter
            .rewrite_quantifier(QuantifierKind::Any, "Child", None)
            .unwrap();
        assert_eq!(body, Some(child_filter()));

        let body = rewriter
            .rewrite_quantifier(QuantifierKind::All, "Child", Some(field("child_value").eq(lit(1))))
            .unwrap();
        assert_eq!(body, Some((!child_filter()).or(field("child_value").eq(lit(1)))));

        let err = rewriter
            .rewrite_quantifier_expr("Parent", field("id").eq(lit(1)))
            .unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedPredicateShape(_)));
    }
    fn visible_key() -> FilterKey {
        FilterKey::new("Child", "visible")
    }

    #[test]
    fn test_marker_with_foreign_clause_is_not_applied() {
        let registry = registry_with_child_filter();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);
        let forged = PredicateExpr::always().injected(visible_key());

        let rewritten = rewriter
            .rewrite_root("Child", Some(forged.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(rewritten, child_filter().and(forged.clone()));

        let hidden = EntityRecord::new("Child").with_field("child_value", 9);
        assert!(!PredicateEvaluator::evaluate(&rewritten, &hidden).unwrap());

        let rewritten = rewriter
            .rewrite_root("Parent", Some(any("children", Some(forged.clone()))))
            .unwrap()
            .unwrap();
        assert_eq!(rewritten, any("children", Some(child_filter().and(forged.clone()))));
        let parent = EntityRecord::new("Parent").with_collection("children", vec![hidden]);
        assert!(!PredicateEvaluator::evaluate(&rewritten, &parent).unwrap());

        let body = (!forged).or(field("child_value").eq(lit(1)));
        let rewritten = rewriter
            .rewrite_root("Parent", Some(all("children", Some(body.clone()))))
            .unwrap();
        assert_eq!(rewritten, Some(all("children", Some((!child_filter()).or(body)))));
    }

    #[test]
    fn test_marker_with_wrong_literal_kind_is_not_applied() {
        let registry = registry_with_child_filter();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);
        let marker = field("child_value").le(lit("all")).injected(visible_key());

        let rewritten = rewriter.rewrite_root("Child", Some(marker.clone())).unwrap();
        assert_eq!(rewritten, Some(child_filter().and(marker)));
    }

    #[test]
    fn test_marker_matching_template_is_kept() {
        let registry = registry_with_child_filter();
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);
        let marker = field("child_value").le(lit(5)).injected(visible_key());

        let rewritten = rewriter.rewrite_root("Child", Some(marker.clone())).unwrap();
        assert_eq!(rewritten, Some(marker));
    }
}
