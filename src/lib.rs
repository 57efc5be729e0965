pub mod config;
pub mod container;
pub mod errors;
pub mod pool;
pub mod providers;

// Re-export key types for convenience
pub use config::{ConfigError, Secret, Settings};
pub use container::{Container, ContainerState, DependencyGraph, InjectionPoint};
pub use errors::{CoreError, ShutdownError, TeardownFailure};
pub use pool::{unit_of_work_provider, Pool, PoolHandle, PoolableConnection, UnitOfWork};
pub use providers::{provider_value, ProviderKind, ProviderSpec, ProviderValue, ResolvedDeps};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get crate version
pub fn version() -> &'static str {
    VERSION
}
