//! In-memory entity model.

use super::{EntityDef, NavigationDef};
use crate::error::{FilterError, FilterResult};
use dynfilter_proto::PredicateExpr;
use std::collections::HashMap;

/// Resolves navigations by `(entity, name)`.
///
/// Hosts with their own metadata implement this directly instead of
/// building an [`EntityModel`].
pub trait NavigationResolver {
    /// Look up a navigation declared on `entity`.
    fn navigation(&self, entity: &str, name: &str) -> Option<&NavigationDef>;
}

/// Entity types and the navigations between them.
#[derive(Debug, Clone, Default)]
pub struct EntityModel {
    entities: HashMap<String, EntityDef>,
    navigations: HashMap<String, HashMap<String, NavigationDef>>,
}

impl EntityModel {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity to the model.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Add a navigation to the model.
    pub fn with_navigation(mut self, navigation: NavigationDef) -> Self {
        self.navigations
            .entry(navigation.from_entity.clone())
            .or_default()
            .insert(navigation.name.clone(), navigation);
        self
    }

    /// Get an entity by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    /// All navigations declared on an entity.
    pub fn navigations_from(&self, entity: &str) -> Vec<&NavigationDef> {
        self.navigations
            .get(entity)
            .map(|navs| navs.values().collect())
            .unwrap_or_default()
    }

    /// List all entity names.
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(|s| s.as_str()).collect()
    }

    /// Resolve a dot-separated navigation path (`"posts.comments"`) starting
    /// at `root`, returning the final navigation.
    pub fn resolve_path(&self, root: &str, path: &str) -> FilterResult<&NavigationDef> {
        resolve_path(self, root, path)
    }

    /// Check that a predicate only references fields of `entity` and only
    /// quantifies over its collection navigations.
    ///
    /// Entities unknown to the model, or declared without fields beyond
    /// their identity, are not field-checked.
    pub fn check_predicate(&self, entity: &str, predicate: &PredicateExpr) -> Result<(), String> {
        match predicate {
            PredicateExpr::SubjectRef(name) => match self.entities.get(entity) {
                Some(def) if def.fields.len() > 1 && !def.has_field(name) => {
                    Err(format!("entity {} has no field '{}'", entity, name))
                }
                _ => Ok(()),
            },
            PredicateExpr::Comparison { left, right, .. } => {
                for operand in [left, right] {
                    match &**operand {
                        PredicateExpr::SubjectRef(_)
                        | PredicateExpr::Literal(_)
                        | PredicateExpr::ParamRef(_) => self.check_predicate(entity, operand)?,
                        other => return Err(format!("'{}' is not a comparison operand", other)),
                    }
                }
                Ok(())
            }
            PredicateExpr::Conjunction(l, r) | PredicateExpr::Disjunction(l, r) => {
                self.check_predicate(entity, l)?;
                self.check_predicate(entity, r)
            }
            PredicateExpr::Negation(inner) | PredicateExpr::Injected { predicate: inner, .. } => {
                self.check_predicate(entity, inner)
            }
            PredicateExpr::QuantifierAny {
                collection,
                predicate,
            }
            | PredicateExpr::QuantifierAll {
                collection,
                predicate,
            } => {
                let nav = self
                    .navigation(entity, collection)
                    .filter(|nav| nav.is_collection())
                    .ok_or_else(|| {
                        format!("'{}' is not a collection navigation of {}", collection, entity)
                    })?;
                match predicate {
                    Some(body) => self.check_predicate(&nav.to_entity, body),
                    None => Ok(()),
                }
            }
            PredicateExpr::Literal(_) | PredicateExpr::ParamRef(_) => Ok(()),
        }
    }
}

impl NavigationResolver for EntityModel {
    fn navigation(&self, entity: &str, name: &str) -> Option<&NavigationDef> {
        self.navigations.get(entity).and_then(|navs| navs.get(name))
    }
}

/// Resolve a dot-separated navigation path through any resolver.
pub(crate) fn resolve_path<'m, R>(
    resolver: &'m R,
    root: &str,
    path: &str,
) -> FilterResult<&'m NavigationDef>
where
    R: NavigationResolver + ?Sized,
{
    let mut entity = root.to_string();
    let mut last = None;
    for segment in path.split('.') {
        let nav = resolver
            .navigation(&entity, segment)
            .ok_or_else(|| FilterError::UnknownNavigation {
                entity: entity.clone(),
                navigation: segment.to_string(),
            })?;
        entity = nav.to_entity.clone();
        last = Some(nav);
    }
    last.ok_or_else(|| FilterError::UnknownNavigation {
        entity: root.to_string(),
        navigation: path.to_string(),
    })
}
