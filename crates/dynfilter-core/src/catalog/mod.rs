//! Entity model consumed by the filter engine.
//!
//! The engine only needs to know which entity types exist and which
//! navigations lead from one type to another. Model loading itself belongs
//! to the host; this module provides the in-process representation and the
//! [`NavigationResolver`] seam the rewriter reads through.

mod entity;
mod model;
mod relation;

pub use entity::EntityDef;
pub(crate) use model::resolve_path;
pub use model::{EntityModel, NavigationResolver};
pub use relation::{Cardinality, NavigationDef};
