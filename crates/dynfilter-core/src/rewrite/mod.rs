//! Predicate rewriting and the host injection hook.

mod hook;
mod rewriter;

pub use hook::{EntityQuery, FilterInjector, IncludePath, OccurrenceRole};
pub use rewriter::{PredicateRewriter, RewriteOptions, DEFAULT_MAX_DEPTH};
