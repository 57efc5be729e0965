use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

/// Core error type for the armature container
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Duplicate provider key: {key}")]
    DuplicateKey { key: String },

    #[error("Circular dependency detected: {path}")]
    CycleDetected { path: String },

    #[error("Provider '{key}' depends on unregistered key '{dependency}'")]
    UnknownDependency { key: String, dependency: String },

    #[error("Provider not found: {key}")]
    ProviderNotFound { key: String },

    #[error("Provider '{key}' did not resolve to the expected type {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Resource '{key}' failed to initialize: {source}")]
    ResourceInitFailed {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Resource '{key}' is not ready: container init has not completed")]
    ResourceNotReady { key: String },

    #[error("Container is not ready: state is {state}")]
    ContainerNotReady { state: String },

    #[error("Pool exhausted: no handle became available within {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Pool error: {message}")]
    Pool { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Lock error on resource: {resource}")]
    LockError { resource: String },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl CoreError {
    /// Create a new provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a new pool error
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool {
            message: message.into(),
        }
    }

    /// Check if the error is transient and the operation may be retried
    /// without operator intervention
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Check if the error indicates a registration-time programmer error
    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateKey { .. } | Self::CycleDetected { .. } | Self::UnknownDependency { .. }
        )
    }
}

/// A single failed teardown, recorded during shutdown
#[derive(Debug, Clone, Serialize)]
pub struct TeardownFailure {
    pub key: String,
    pub message: String,
}

impl TeardownFailure {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Aggregate of every teardown failure collected during shutdown.
///
/// Shutdown never aborts early: every resource gets an attempted teardown
/// and all failures are reported together.
#[derive(Debug, Error)]
#[error("Shutdown completed with {} teardown failure(s): {}", failures.len(), summary(failures))]
pub struct ShutdownError {
    pub failures: Vec<TeardownFailure>,
}

impl ShutdownError {
    pub fn new(failures: Vec<TeardownFailure>) -> Self {
        Self { failures }
    }
}

fn summary(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.key, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}
