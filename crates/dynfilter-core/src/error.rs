//! Core error types.

use thiserror::Error;

/// Errors raised by filter registration, scoping and predicate rewriting.
///
/// None of these are retried or swallowed: a filter that silently fails to
/// apply exposes rows that should stay hidden.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A filter with the same name is already registered for the entity.
    #[error("filter already registered: {entity}.{name}")]
    DuplicateFilter {
        /// Entity type.
        entity: String,
        /// Filter name.
        name: String,
    },

    /// The filter was never registered.
    #[error("unknown filter: {entity}.{name}")]
    UnknownFilter {
        /// Entity type.
        entity: String,
        /// Filter name.
        name: String,
    },

    /// No filter is registered for the entity type.
    #[error("no filters registered for entity {entity}")]
    UnknownEntity {
        /// Entity type.
        entity: String,
    },

    /// The filter exists but declares no such parameter.
    #[error("unknown parameter '{parameter}' on filter {entity}.{name}")]
    UnknownParameter {
        /// Entity type.
        entity: String,
        /// Filter name.
        name: String,
        /// Parameter name.
        parameter: String,
    },

    /// The predicate template is not well formed.
    #[error("invalid template for filter {entity}.{name}: {reason}")]
    InvalidTemplate {
        /// Entity type.
        entity: String,
        /// Filter name.
        name: String,
        /// What is wrong with the template.
        reason: String,
    },

    /// A scope was released while frames pushed after it were still open.
    #[error("scope released out of order: innermost open scope is #{expected}, got #{found}")]
    ScopeOrder {
        /// Id of the innermost open frame.
        expected: u64,
        /// Id of the frame being released.
        found: u64,
    },

    /// A parameter provider failed or returned a value of the wrong kind.
    #[error("cannot resolve parameter '{parameter}' of filter {entity}.{name}: {reason}")]
    ParameterResolution {
        /// Entity type.
        entity: String,
        /// Filter name.
        name: String,
        /// Parameter name.
        parameter: String,
        /// Provider error or type mismatch description.
        reason: String,
    },

    /// The predicate contains a construct the rewriter cannot descend into.
    #[error("unsupported predicate shape: {0}")]
    UnsupportedPredicateShape(String),

    /// An include path names a navigation that does not exist.
    #[error("unknown navigation '{navigation}' on entity {entity}")]
    UnknownNavigation {
        /// Entity the navigation was looked up on.
        entity: String,
        /// Navigation name.
        navigation: String,
    },

    /// Filter injection nested deeper than the configured limit.
    #[error("filter injection exceeded maximum nesting depth of {depth}")]
    RecursionLimit {
        /// The configured limit.
        depth: usize,
    },

    /// A predicate could not be evaluated against a record.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Configuration could not be parsed or applied.
    #[error("configuration error: {0}")]
    Config(String),

    /// Predicate encoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] dynfilter_proto::Error),
}

impl FilterError {
    /// Build an `UnknownFilter` error.
    pub fn unknown_filter(entity: &str, name: &str) -> Self {
        FilterError::UnknownFilter {
            entity: entity.to_string(),
            name: name.to_string(),
        }
    }

    /// Check if this error is a caller programming error (registry or scope
    /// misuse) as opposed to a failure of a single query build.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            FilterError::DuplicateFilter { .. }
                | FilterError::UnknownFilter { .. }
                | FilterError::UnknownEntity { .. }
                | FilterError::UnknownParameter { .. }
                | FilterError::InvalidTemplate { .. }
                | FilterError::ScopeOrder { .. }
                | FilterError::Config(_)
        )
    }
}

/// Result type for filter operations.
pub type FilterResult<T> = Result<T, FilterError>;
