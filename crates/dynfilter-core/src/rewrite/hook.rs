//! Injection hook for host query pipelines.
//!
//! The host calls [`FilterInjector::on_entity_occurrence`] once for every
//! place an entity type appears while a query is being built: as the root,
//! as an eager-loaded include, or as the element type of a quantifier. The
//! returned predicate is attached as an additional `AND` condition at that
//! position.
//!
//! [`EntityQuery`] is a minimal query shape (root plus dot-path includes)
//! that [`FilterInjector::apply`] rewrites in one call.

use super::rewriter::{PredicateRewriter, RewriteOptions};
use crate::catalog::{resolve_path, NavigationResolver};
use crate::error::FilterResult;
use crate::filter::FilterView;
use dynfilter_proto::{PredicateExpr, QuantifierKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Where an entity type occurs in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OccurrenceRole {
    /// The entity set the query selects from.
    Root,
    /// A related entity set loaded alongside the root.
    Include,
    /// Element type of an `Any` quantifier.
    Any,
    /// Element type of an `All` quantifier.
    All,
}

/// An eager-loaded relation, addressed by a dot-separated navigation path
/// from the query root (`"posts"`, `"posts.comments"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludePath {
    /// Navigation path from the root entity.
    pub path: String,
    /// Optional predicate on the included entities.
    pub filter: Option<PredicateExpr>,
}

impl IncludePath {
    /// Include a relation without a predicate.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            filter: None,
        }
    }

    /// Set the predicate on the included entities.
    pub fn with_filter(mut self, filter: PredicateExpr) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// A query rooted at one entity type, with optional eager-loaded relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityQuery {
    /// Entity type the query selects from.
    pub root_entity: String,
    /// Predicate on the root entities.
    pub filter: Option<PredicateExpr>,
    /// Relations loaded alongside the root.
    pub includes: Vec<IncludePath>,
}

impl EntityQuery {
    /// Select every entity of a type.
    pub fn new(root_entity: impl Into<String>) -> Self {
        Self {
            root_entity: root_entity.into(),
            filter: None,
            includes: Vec::new(),
        }
    }

    /// Set the root predicate.
    pub fn with_filter(mut self, filter: PredicateExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add an include.
    pub fn include(mut self, include: IncludePath) -> Self {
        self.includes.push(include);
        self
    }
}

/// The integration point between a host query pipeline and the filters.
pub struct FilterInjector<'a, V: ?Sized, R: ?Sized> {
    rewriter: PredicateRewriter<'a, V, R>,
    model: &'a R,
}

impl<'a, V, R> FilterInjector<'a, V, R>
where
    V: FilterView + ?Sized,
    R: NavigationResolver + ?Sized,
{
    /// Create an injector over a filter view (a registry or a session) and a
    /// navigation model.
    pub fn new(view: &'a V, model: &'a R) -> Self {
        Self {
            rewriter: PredicateRewriter::new(view, model),
            model,
        }
    }

    /// Replace the rewrite limits.
    pub fn with_options(mut self, options: RewriteOptions) -> Self {
        self.rewriter = self.rewriter.with_options(options);
        self
    }

    /// The underlying rewriter.
    pub fn rewriter(&self) -> &PredicateRewriter<'a, V, R> {
        &self.rewriter
    }

    /// Compute the predicate to attach for one occurrence of `entity`.
    ///
    /// For `Root` and `Include`, `existing` is the host's predicate on that
    /// entity set. For `Any` and `All`, `entity` is the collection's element
    /// type and `existing` is the quantifier body; the result is the new
    /// body. Returns `None` when nothing needs to be attached.
    pub fn on_entity_occurrence(
        &self,
        entity: &str,
        role: OccurrenceRole,
        existing: Option<PredicateExpr>,
    ) -> FilterResult<Option<PredicateExpr>> {
        debug!(entity, ?role, "entity occurrence");
        let kind = match role {
            OccurrenceRole::Root | OccurrenceRole::Include => {
                return self.rewriter.rewrite_root(entity, existing);
            }
            OccurrenceRole::Any => QuantifierKind::Any,
            OccurrenceRole::All => QuantifierKind::All,
        };
        self.rewriter
            .rewrite_quantifier(kind, entity, existing)?
            .map(|body| self.rewriter.rewrite_nested(entity, body))
            .transpose()
    }

    /// Rewrite the root predicate and every include predicate of a query.
    ///
    /// Each intermediate level of a dot path is loaded as well, so a path
    /// without an explicit include for one of its prefixes gets one with
    /// that level's filters.
    pub fn apply(&self, query: &EntityQuery) -> FilterResult<EntityQuery> {
        let filter = self.on_entity_occurrence(
            &query.root_entity,
            OccurrenceRole::Root,
            query.filter.clone(),
        )?;

        let explicit: HashSet<&str> = query.includes.iter().map(|i| i.path.as_str()).collect();
        let mut synthesized = HashSet::new();
        let mut includes = Vec::with_capacity(query.includes.len());
        for include in &query.includes {
            for (end, _) in include.path.match_indices('.') {
                let prefix = &include.path[..end];
                if explicit.contains(prefix) || !synthesized.insert(prefix) {
                    continue;
                }
                debug!(path = prefix, "loading intermediate include");
                includes.push(self.include(&query.root_entity, IncludePath::new(prefix))?);
            }
            includes.push(self.include(&query.root_entity, include.clone())?);
        }

        Ok(EntityQuery {
            root_entity: query.root_entity.clone(),
            filter,
            includes,
        })
    }

    fn include(&self, root: &str, include: IncludePath) -> FilterResult<IncludePath> {
        let target = resolve_path(self.model, root, &include.path)?;
        let filter =
            self.on_entity_occurrence(&target.to_entity, OccurrenceRole::Include, include.filter)?;
        Ok(IncludePath {
            path: include.path,
            filter,
        })
    }
}
