//! dynfilter protocol types.
//!
//! This crate defines the types shared between the filter engine and the
//! host query pipeline: runtime values and the predicate AST that filter
//! templates, user predicates and rewritten output are all expressed in.
//!
//! # Modules
//!
//! - [`value`] - Runtime scalar values and value kinds
//! - [`predicate`] - Predicate AST, builders and filter keys
//! - [`error`] - Encoding error types
//!
//! # Example
//!
//! ```
//! use dynfilter_proto::{any, field, lit};
//!
//! let visible = any("children", Some(field("child_value").le(lit(2))));
//! assert_eq!(visible.to_string(), "children.any(child_value <= 2)");
//! ```

pub mod error;
pub mod predicate;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use predicate::{
    all, any, field, lit, param, CompareOp, FilterKey, PredicateExpr, QuantifierKind,
};
pub use value::{Value, ValueKind};
