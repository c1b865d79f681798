//! Late-bound filter parameters.

use dynfilter_proto::{Value, ValueKind};
use std::fmt;
use std::sync::Arc;

/// Error returned by a [`ParameterProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError(pub String);

impl ProviderError {
    /// Create a provider error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        ProviderError(message.into())
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ProviderError {}

/// Supplies the value of one filter parameter at rewrite time.
///
/// A provider is invoked once per rewrite occurrence and its result is never
/// cached across queries, so values like "current tenant" can change between
/// calls. The same filter can occur several times in one composite query
/// (at the root and again inside a quantifier, say); each occurrence calls the
/// provider again, so a non-deterministic provider may bind different values
/// within a single query. That is accepted behavior.
///
/// Closures returning `Result<impl Into<Value>, E>` implement this trait.
pub trait ParameterProvider: Send + Sync {
    /// Produce the parameter value.
    fn provide(&self) -> Result<Value, ProviderError>;
}

impl<F, V, E> ParameterProvider for F
where
    F: Fn() -> Result<V, E> + Send + Sync,
    V: Into<Value>,
    E: fmt::Display,
{
    fn provide(&self) -> Result<Value, ProviderError> {
        self().map(Into::into).map_err(|e| ProviderError(e.to_string()))
    }
}

/// Provider that always returns the same value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantProvider(pub Value);

impl ParameterProvider for ConstantProvider {
    fn provide(&self) -> Result<Value, ProviderError> {
        Ok(self.0.clone())
    }
}

/// Shared handle to a provider.
pub type SharedProvider = Arc<dyn ParameterProvider>;

/// Wrap a fixed value as a shared provider.
pub fn constant(value: impl Into<Value>) -> SharedProvider {
    Arc::new(ConstantProvider(value.into()))
}

/// Wrap an infallible closure as a shared provider.
pub fn from_fn<F, V>(f: F) -> SharedProvider
where
    F: Fn() -> V + Send + Sync + 'static,
    V: Into<Value>,
{
    Arc::new(move || Ok::<Value, ProviderError>(f().into()))
}

/// A declared filter parameter.
#[derive(Clone)]
pub struct FilterParameter {
    /// Name referenced by `ParamRef` in the template.
    pub name: String,
    /// Kind the provider must return.
    pub kind: ValueKind,
    /// Default provider; scopes and the registry may override it.
    pub provider: SharedProvider,
}

impl FilterParameter {
    /// Declare a parameter.
    pub fn new(name: impl Into<String>, kind: ValueKind, provider: SharedProvider) -> Self {
        Self {
            name: name.into(),
            kind,
            provider,
        }
    }
}

impl fmt::Debug for FilterParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterParameter")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
