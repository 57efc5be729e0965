pub mod provider;

pub use provider::{
    provider_value, BoxFuture, ConstructFn, ProjectionFn, ProviderActivation, ProviderKind,
    ProviderSpec, ProviderValue, ResolvedDeps, ResourceFn, Teardown,
};
