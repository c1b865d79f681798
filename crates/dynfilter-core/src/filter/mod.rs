//! Filter definitions, the shared registry, and per-session scopes.

mod definition;
mod params;
mod registry;
mod scope;

pub use definition::FilterDefinition;
pub use params::{
    constant, from_fn, ConstantProvider, FilterParameter, ParameterProvider, ProviderError,
    SharedProvider,
};
pub use registry::{FilterRegistry, FilterView};
pub use scope::{FilterSession, ScopeGuard};
