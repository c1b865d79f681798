//! In-memory query evaluation.
//!
//! Evaluates rewritten predicates against loaded entity records. Hosts with
//! in-memory collections can run an [`EntityQuery`](crate::rewrite::EntityQuery)
//! directly; the test suites use it to check rewrites by enumeration.

mod filter;
mod record;

pub use filter::PredicateEvaluator;
pub use record::EntityRecord;
