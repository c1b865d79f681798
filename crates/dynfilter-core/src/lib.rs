//! dynfilter core - global dynamic row filters for ORM query pipelines.
//!
//! Filters are named predicates registered per entity type. Once registered
//! they are conjoined to every query against that type, including when the
//! type is reached as a child collection through an `Any` or `All`
//! quantifier, until they are disabled globally, for a session, or for a
//! scope.
//!
//! # Example
//!
//! ```
//! use dynfilter_core::{
//!     constant, EntityDef, EntityModel, FilterDefinition, FilterRegistry, NavigationDef,
//!     PredicateRewriter,
//! };
//! use dynfilter_proto::{all, field, lit, param};
//!
//! let model = EntityModel::new()
//!     .with_entity(EntityDef::new("Parent", "id"))
//!     .with_entity(EntityDef::new("Child", "id").with_field("child_value"))
//!     .with_navigation(NavigationDef::many("children", "Parent", "Child"));
//!
//! let registry = FilterRegistry::new();
//! registry
//!     .register(
//!         FilterDefinition::new("Child", "visible", field("child_value").le(param("max")))
//!             .with_parameter("max", constant(2)),
//!     )
//!     .unwrap();
//!
//! let rewriter = PredicateRewriter::new(&registry, &model);
//! let rewritten = rewriter
//!     .rewrite_root("Parent", Some(all("children", Some(field("child_value").eq(lit(1))))))
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(
//!     rewritten.to_string(),
//!     "children.all((NOT [Child.visible: child_value <= 2] OR child_value == 1))"
//! );
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod query;
pub mod rewrite;

pub use catalog::{Cardinality, EntityDef, EntityModel, NavigationDef, NavigationResolver};
pub use config::{FilterConfig, FilterToggle};
pub use error::{FilterError, FilterResult};
pub use filter::{
    constant, from_fn, ConstantProvider, FilterDefinition, FilterParameter, FilterRegistry,
    FilterSession, FilterView, ParameterProvider, ProviderError, ScopeGuard, SharedProvider,
};
pub use query::{EntityRecord, PredicateEvaluator};
pub use rewrite::{
    EntityQuery, FilterInjector, IncludePath, OccurrenceRole, PredicateRewriter, RewriteOptions,
    DEFAULT_MAX_DEPTH,
};

/// Re-export predicate types.
pub use dynfilter_proto as proto;
