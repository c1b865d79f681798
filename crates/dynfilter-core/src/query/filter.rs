//! Predicate evaluation over in-memory records.
//!
//! `PredicateEvaluator` evaluates a `PredicateExpr` against an
//! [`EntityRecord`] graph. Quantifiers enumerate the record's loaded
//! collections, which makes it possible to check a rewritten predicate
//! against the row-by-row meaning of the filters it carries.

use super::record::EntityRecord;
use crate::error::{FilterError, FilterResult};
use crate::rewrite::EntityQuery;
use dynfilter_proto::{CompareOp, PredicateExpr, Value};
use std::cmp::Ordering;

/// Evaluates predicates against entity records.
pub struct PredicateEvaluator;

impl PredicateEvaluator {
    /// Evaluate a predicate against one record.
    ///
    /// Parameters must already be bound; a remaining `ParamRef` is an error.
    pub fn evaluate(predicate: &PredicateExpr, record: &EntityRecord) -> FilterResult<bool> {
        match predicate {
            PredicateExpr::Comparison { op, left, right } => {
                let left = Self::operand(left, record)?;
                let right = Self::operand(right, record)?;
                match (left, right) {
                    (Some(l), Some(r)) => Ok(Self::compare(*op, l, r)),
                    // Missing field doesn't match
                    _ => Ok(false),
                }
            }
            PredicateExpr::Conjunction(l, r) => {
                Ok(Self::evaluate(l, record)? && Self::evaluate(r, record)?)
            }
            PredicateExpr::Disjunction(l, r) => {
                Ok(Self::evaluate(l, record)? || Self::evaluate(r, record)?)
            }
            PredicateExpr::Negation(inner) => Ok(!Self::evaluate(inner, record)?),
            PredicateExpr::Injected { predicate, .. } => Self::evaluate(predicate, record),
            PredicateExpr::QuantifierAny {
                collection,
                predicate,
            } => {
                let elements = record.collection(collection);
                match predicate {
                    None => Ok(!elements.is_empty()),
                    Some(body) => {
                        for element in elements {
                            if Self::evaluate(body, element)? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                }
            }
            PredicateExpr::QuantifierAll {
                collection,
                predicate,
            } => {
                let Some(body) = predicate else {
                    return Ok(true);
                };
                for element in record.collection(collection) {
                    if !Self::evaluate(body, element)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            PredicateExpr::Literal(Value::Bool(b)) => Ok(*b),
            PredicateExpr::Literal(other) => Err(FilterError::Evaluation(format!(
                "literal {} is not a boolean",
                other
            ))),
            PredicateExpr::SubjectRef(name) => match record.field(name) {
                Some(Value::Bool(b)) => Ok(*b),
                None | Some(Value::Null) => Ok(false),
                Some(other) => Err(FilterError::Evaluation(format!(
                    "field '{}' of {} is {}, not bool",
                    name,
                    record.entity,
                    other.type_name()
                ))),
            },
            PredicateExpr::ParamRef(name) => Err(Self::unbound(name)),
        }
    }

    /// Records of `records` that satisfy `predicate`; all of them when there
    /// is no predicate.
    pub fn select<'r>(
        records: &'r [EntityRecord],
        predicate: Option<&PredicateExpr>,
    ) -> FilterResult<Vec<&'r EntityRecord>> {
        let Some(predicate) = predicate else {
            return Ok(records.iter().collect());
        };
        let mut selected = Vec::new();
        for record in records {
            if Self::evaluate(predicate, record)? {
                selected.push(record);
            }
        }
        Ok(selected)
    }

    /// Run a query against root records: select the roots, then prune every
    /// included collection with its include predicate.
    ///
    /// Shallower includes are pruned first, so a deeper path only descends
    /// through elements its intermediate levels kept.
    pub fn execute(
        query: &EntityQuery,
        records: &[EntityRecord],
    ) -> FilterResult<Vec<EntityRecord>> {
        let mut result: Vec<EntityRecord> = Self::select(records, query.filter.as_ref())?
            .into_iter()
            .cloned()
            .collect();

        let mut includes: Vec<(Vec<&str>, Option<&PredicateExpr>)> = query
            .includes
            .iter()
            .map(|include| (include.path.split('.').collect(), include.filter.as_ref()))
            .collect();
        includes.sort_by_key(|(segments, _)| segments.len());

        for (segments, predicate) in &includes {
            for record in &mut result {
                Self::prune(record, segments, *predicate)?;
            }
        }
        Ok(result)
    }

    fn prune(
        record: &mut EntityRecord,
        segments: &[&str],
        predicate: Option<&PredicateExpr>,
    ) -> FilterResult<()> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(());
        };
        let Some(children) = record.collections.get_mut(*first) else {
            return Ok(());
        };

        if rest.is_empty() {
            if let Some(predicate) = predicate {
                let mut kept = Vec::with_capacity(children.len());
                for child in children.drain(..) {
                    if Self::evaluate(predicate, &child)? {
                        kept.push(child);
                    }
                }
                *children = kept;
            }
            return Ok(());
        }

        for child in children.iter_mut() {
            Self::prune(child, rest, predicate)?;
        }
        Ok(())
    }

    fn operand<'r>(
        expr: &'r PredicateExpr,
        record: &'r EntityRecord,
    ) -> FilterResult<Option<&'r Value>> {
        match expr {
            PredicateExpr::SubjectRef(name) => Ok(record.field(name)),
            PredicateExpr::Literal(value) => Ok(Some(value)),
            PredicateExpr::ParamRef(name) => Err(Self::unbound(name)),
            other => Err(FilterError::Evaluation(format!(
                "'{}' cannot be used as a comparison operand",
                other
            ))),
        }
    }

    fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
        let ordered =
            |accept: fn(Ordering) -> bool| left.compare(right).map(accept).unwrap_or(false);
        match op {
            CompareOp::Eq => left.loose_eq(right),
            CompareOp::Ne => !left.loose_eq(right),
            CompareOp::Lt => ordered(Ordering::is_lt),
            CompareOp::Le => ordered(Ordering::is_le),
            CompareOp::Gt => ordered(Ordering::is_gt),
            CompareOp::Ge => ordered(Ordering::is_ge),
            CompareOp::Like => match (left, right) {
                (Value::String(s), Value::String(pattern)) => Self::like_match(s, pattern),
                _ => false,
            },
        }
    }

    fn unbound(name: &str) -> FilterError {
        FilterError::Evaluation(format!("parameter ${} is not bound", name))
    }

    /// Match a string against a SQL LIKE pattern.
    ///
    /// `%` matches any run of characters, `_` exactly one, and a backslash
    /// makes the next pattern character literal.
    pub fn like_match(value: &str, pattern: &str) -> bool {
        let value: Vec<char> = value.chars().collect();
        let pattern: Vec<char> = pattern.chars().collect();
        Self::like_from(&value, &pattern)
    }

    fn like_from(value: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => value.is_empty(),
            Some(('%', rest)) => {
                if rest.is_empty() {
                    return true;
                }
                (0..=value.len()).any(|skip| Self::like_from(&value[skip..], rest))
            }
            Some(('_', rest)) => !value.is_empty() && Self::like_from(&value[1..], rest),
            Some(('\\', rest)) => match (rest.split_first(), value.split_first()) {
                (Some((p, rest)), Some((c, value))) if p == c => Self::like_from(value, rest),
                _ => false,
            },
            Some((p, rest)) => match value.split_first() {
                Some((c, value)) if c == p => Self::like_from(value, rest),
                _ => false,
            },
        }
    }
}
