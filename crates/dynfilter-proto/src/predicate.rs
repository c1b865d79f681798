//! Predicate AST shared by filter templates, user queries and rewritten output.
//!
//! A predicate is always evaluated against a *subject*: the entity instance
//! the query (or filter) is about. Inside a quantifier body the subject is
//! the collection element, so `SubjectRef` there names a field of the child.

use crate::error::Error;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identity of a registered filter: `(entity type, filter name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilterKey {
    /// Entity type the filter applies to.
    pub entity: String,
    /// Filter name, unique per entity type.
    pub name: String,
}

impl FilterKey {
    /// Create a new filter key.
    pub fn new(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.name)
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// SQL LIKE pattern match (`%` and `_` wildcards).
    Like,
}

impl CompareOp {
    /// Operator symbol used by `Display`.
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
        }
    }
}

/// Quantifier kinds over a navigation collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantifierKind {
    /// Some element satisfies the body.
    Any,
    /// Every element satisfies the body.
    All,
}

/// Predicate expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PredicateExpr {
    /// Binary comparison between two operand expressions.
    Comparison {
        op: CompareOp,
        left: Box<PredicateExpr>,
        right: Box<PredicateExpr>,
    },
    /// Both sides must hold.
    Conjunction(Box<PredicateExpr>, Box<PredicateExpr>),
    /// At least one side must hold.
    Disjunction(Box<PredicateExpr>, Box<PredicateExpr>),
    /// Logical negation.
    Negation(Box<PredicateExpr>),
    /// Some element of `collection` satisfies `predicate` (plain existence
    /// test when absent).
    QuantifierAny {
        collection: String,
        predicate: Option<Box<PredicateExpr>>,
    },
    /// Every element of `collection` satisfies `predicate` (vacuously true
    /// when absent).
    QuantifierAll {
        collection: String,
        predicate: Option<Box<PredicateExpr>>,
    },
    /// Constant value. `Literal(Bool(true))` is the neutral predicate.
    Literal(Value),
    /// Field of the current subject.
    SubjectRef(String),
    /// Late-bound filter parameter.
    ParamRef(String),
    /// A filter clause injected by the rewriter. Evaluates exactly like
    /// `predicate`; the key lets a later rewrite recognise it.
    Injected {
        key: FilterKey,
        predicate: Box<PredicateExpr>,
    },
}

/// Reference a field of the current subject.
pub fn field(name: impl Into<String>) -> PredicateExpr {
    PredicateExpr::SubjectRef(name.into())
}

/// Reference a filter parameter.
pub fn param(name: impl Into<String>) -> PredicateExpr {
    PredicateExpr::ParamRef(name.into())
}

/// A literal value.
pub fn lit(value: impl Into<Value>) -> PredicateExpr {
    PredicateExpr::Literal(value.into())
}

/// `collection.Any()` with an optional body.
pub fn any(collection: impl Into<String>, predicate: Option<PredicateExpr>) -> PredicateExpr {
    PredicateExpr::QuantifierAny {
        collection: collection.into(),
        predicate: predicate.map(Box::new),
    }
}

/// `collection.All(body)` with an optional body.
pub fn all(collection: impl Into<String>, predicate: Option<PredicateExpr>) -> PredicateExpr {
    PredicateExpr::QuantifierAll {
        collection: collection.into(),
        predicate: predicate.map(Box::new),
    }
}

impl PredicateExpr {
    /// The constant `true` predicate.
    pub fn always() -> Self {
        PredicateExpr::Literal(Value::Bool(true))
    }

    fn compare(self, op: CompareOp, right: PredicateExpr) -> Self {
        PredicateExpr::Comparison {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    /// `self == right`
    pub fn eq(self, right: PredicateExpr) -> Self {
        self.compare(CompareOp::Eq, right)
    }

    /// `self != right`
    pub fn ne(self, right: PredicateExpr) -> Self {
        self.compare(CompareOp::Ne, right)
    }

    /// `self < right`
    pub fn lt(self, right: PredicateExpr) -> Self {
        self.compare(CompareOp::Lt, right)
    }

    /// `self <= right`
    pub fn le(self, right: PredicateExpr) -> Self {
        self.compare(CompareOp::Le, right)
    }

    /// `self > right`
    pub fn gt(self, right: PredicateExpr) -> Self {
        self.compare(CompareOp::Gt, right)
    }

    /// `self >= right`
    pub fn ge(self, right: PredicateExpr) -> Self {
        self.compare(CompareOp::Ge, right)
    }

    /// `self LIKE pattern`
    pub fn like(self, pattern: impl Into<String>) -> Self {
        self.compare(CompareOp::Like, lit(pattern.into()))
    }

    /// `self AND other`
    pub fn and(self, other: PredicateExpr) -> Self {
        PredicateExpr::Conjunction(Box::new(self), Box::new(other))
    }

    /// `self OR other`
    pub fn or(self, other: PredicateExpr) -> Self {
        PredicateExpr::Disjunction(Box::new(self), Box::new(other))
    }

    /// Wrap as an injected filter clause.
    pub fn injected(self, key: FilterKey) -> Self {
        PredicateExpr::Injected {
            key,
            predicate: Box::new(self),
        }
    }

    /// Left-fold a sequence with `Conjunction`: `((p1 AND p2) AND p3) ...`.
    ///
    /// Returns `None` for an empty sequence.
    pub fn conjoin_all(parts: impl IntoIterator<Item = PredicateExpr>) -> Option<Self> {
        parts.into_iter().reduce(PredicateExpr::and)
    }

    /// Check if this is the literal `true`.
    pub fn is_always(&self) -> bool {
        matches!(self, PredicateExpr::Literal(Value::Bool(true)))
    }

    /// Flatten nested conjunctions into their operands, left to right.
    pub fn conjuncts(&self) -> Vec<&PredicateExpr> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                PredicateExpr::Conjunction(l, r) => {
                    stack.push(r);
                    stack.push(l);
                }
                other => out.push(other),
            }
        }
        out
    }

    /// Key of an injected filter clause.
    pub fn injected_key(&self) -> Option<&FilterKey> {
        match self {
            PredicateExpr::Injected { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Names of all parameters referenced anywhere in the tree.
    pub fn param_refs(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.collect_params(&mut names);
        names
    }

    fn collect_params<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            PredicateExpr::ParamRef(name) => {
                names.insert(name.as_str());
            }
            PredicateExpr::Comparison { left, right, .. } => {
                left.collect_params(names);
                right.collect_params(names);
            }
            PredicateExpr::Conjunction(l, r) | PredicateExpr::Disjunction(l, r) => {
                l.collect_params(names);
                r.collect_params(names);
            }
            PredicateExpr::Negation(inner) | PredicateExpr::Injected { predicate: inner, .. } => {
                inner.collect_params(names)
            }
            PredicateExpr::QuantifierAny { predicate, .. }
            | PredicateExpr::QuantifierAll { predicate, .. } => {
                if let Some(p) = predicate {
                    p.collect_params(names);
                }
            }
            PredicateExpr::Literal(_) | PredicateExpr::SubjectRef(_) => {}
        }
    }

    /// Replace every `ParamRef` bound in `bindings` by a literal.
    ///
    /// Unbound references are left in place.
    pub fn bind_params(&self, bindings: &[(String, Value)]) -> PredicateExpr {
        match self {
            PredicateExpr::ParamRef(name) => bindings
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| PredicateExpr::Literal(v.clone()))
                .unwrap_or_else(|| self.clone()),
            PredicateExpr::Comparison { op, left, right } => PredicateExpr::Comparison {
                op: *op,
                left: Box::new(left.bind_params(bindings)),
                right: Box::new(right.bind_params(bindings)),
            },
            PredicateExpr::Conjunction(l, r) => PredicateExpr::Conjunction(
                Box::new(l.bind_params(bindings)),
                Box::new(r.bind_params(bindings)),
            ),
            PredicateExpr::Disjunction(l, r) => PredicateExpr::Disjunction(
                Box::new(l.bind_params(bindings)),
                Box::new(r.bind_params(bindings)),
            ),
            PredicateExpr::Negation(inner) => {
                PredicateExpr::Negation(Box::new(inner.bind_params(bindings)))
            }
            PredicateExpr::QuantifierAny {
                collection,
                predicate,
            } => PredicateExpr::QuantifierAny {
                collection: collection.clone(),
                predicate: predicate.as_ref().map(|p| Box::new(p.bind_params(bindings))),
            },
            PredicateExpr::QuantifierAll {
                collection,
                predicate,
            } => PredicateExpr::QuantifierAll {
                collection: collection.clone(),
                predicate: predicate.as_ref().map(|p| Box::new(p.bind_params(bindings))),
            },
            PredicateExpr::Injected { key, predicate } => PredicateExpr::Injected {
                key: key.clone(),
                predicate: Box::new(predicate.bind_params(bindings)),
            },
            PredicateExpr::Literal(_) | PredicateExpr::SubjectRef(_) => self.clone(),
        }
    }

    /// Serialize to JSON, for logging and host-side inspection.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse from JSON produced by [`PredicateExpr::to_json`].
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

impl std::ops::Not for PredicateExpr {
    type Output = PredicateExpr;

    fn not(self) -> Self::Output {
        PredicateExpr::Negation(Box::new(self))
    }
}

impl fmt::Display for PredicateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateExpr::Comparison { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            PredicateExpr::Conjunction(l, r) => write!(f, "({} AND {})", l, r),
            PredicateExpr::Disjunction(l, r) => write!(f, "({} OR {})", l, r),
            PredicateExpr::Negation(inner) => write!(f, "NOT {}", inner),
            PredicateExpr::QuantifierAny {
                collection,
                predicate,
            } => match predicate {
                Some(p) => write!(f, "{}.any({})", collection, p),
                None => write!(f, "{}.any()", collection),
            },
            PredicateExpr::QuantifierAll {
                collection,
                predicate,
            } => match predicate {
                Some(p) => write!(f, "{}.all({})", collection, p),
                None => write!(f, "{}.all()", collection),
            },
            PredicateExpr::Literal(v) => write!(f, "{}", v),
            PredicateExpr::SubjectRef(name) => f.write_str(name),
            PredicateExpr::ParamRef(name) => write!(f, "${}", name),
            PredicateExpr::Injected { key, predicate } => write!(f, "[{}: {}]", key, predicate),
        }
    }
}
