use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::container::resolver::{DependencyGraph, GraphError};
use crate::errors::{CoreError, ShutdownError, TeardownFailure};
use crate::providers::provider::BoxFuture;
use crate::providers::{
    ProviderActivation, ProviderKind, ProviderSpec, ProviderValue, ResolvedDeps, Teardown,
};

/// Container lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Providers may be registered; resources are not yet constructed
    Registered,
    /// Init has completed; the container is serving resolutions
    Ready,
    /// Shutdown has begun or completed; no further resolutions are served
    ShutDown,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Registered => "registered",
            ContainerState::Ready => "ready",
            ContainerState::ShutDown => "shut_down",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registry of providers with an explicit init/shutdown lifecycle.
///
/// The container is an explicit value handed to whatever owns the serving
/// loop, never ambient global state. Registration happens on `&mut self`;
/// once the container is shared (`Arc<Container>`), `init`, `resolve`, and
/// `shutdown` all take `&self` and are safe under concurrent callers.
pub struct Container {
    settings: Arc<Settings>,
    specs: HashMap<String, ProviderSpec>,
    registration_order: Vec<String>,
    /// Construct-once cells for singleton and config providers
    cells: HashMap<String, OnceCell<ProviderValue>>,
    /// Realized resource instances, populated during init
    resources: RwLock<HashMap<String, ProviderValue>>,
    /// Teardown callbacks in initialization order
    teardowns: Mutex<Vec<(String, Teardown)>>,
    /// Cached result of graph validation (registration or first resolution)
    graph_check: OnceLock<Result<(), GraphError>>,
    init_lock: tokio::sync::Mutex<()>,
    state: RwLock<ContainerState>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("providers", &self.registration_order)
            .field("state", &self.state.read().map(|s| *s).unwrap_or(ContainerState::ShutDown))
            .finish()
    }
}

impl Container {
    /// Create an empty container over an immutable settings value
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            specs: HashMap::new(),
            registration_order: Vec::new(),
            cells: HashMap::new(),
            resources: RwLock::new(HashMap::new()),
            teardowns: Mutex::new(Vec::new()),
            graph_check: OnceLock::new(),
            init_lock: tokio::sync::Mutex::new(()),
            state: RwLock::new(ContainerState::Registered),
        }
    }

    /// The settings value this container was built over
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Register a provider spec. Fails with `DuplicateKey` if the key is
    /// already taken, and with `ContainerNotReady` once init has run.
    pub fn register(&mut self, spec: ProviderSpec) -> Result<&mut Self, CoreError> {
        let state = self.state()?;
        if state != ContainerState::Registered {
            return Err(CoreError::ContainerNotReady {
                state: state.as_str().to_string(),
            });
        }

        let key = spec.key().to_string();
        if self.specs.contains_key(&key) {
            return Err(CoreError::DuplicateKey { key });
        }

        if matches!(spec.kind(), ProviderKind::Singleton | ProviderKind::ConfigValue) {
            self.cells.insert(key.clone(), OnceCell::new());
        }
        self.registration_order.push(key.clone());
        self.specs.insert(key, spec);
        Ok(self)
    }

    /// Current lifecycle state
    pub fn state(&self) -> Result<ContainerState, CoreError> {
        self.state
            .read()
            .map(|state| *state)
            .map_err(|_| CoreError::LockError {
                resource: "container_state".to_string(),
            })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), Ok(ContainerState::Ready))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.specs.contains_key(key)
    }

    pub fn provider_count(&self) -> usize {
        self.specs.len()
    }

    /// Registered keys in registration order
    pub fn registered_keys(&self) -> &[String] {
        &self.registration_order
    }

    /// Validate the dependency graph: every declared dependency must be
    /// registered and the graph must be acyclic. The result is computed once
    /// and cached; both `init` and the first `resolve` force it.
    pub fn validate(&self) -> Result<(), CoreError> {
        let result = self
            .graph_check
            .get_or_init(|| DependencyGraph::from_specs(self.specs.values()).validate());
        result.clone().map_err(CoreError::from)
    }

    /// Initialize every resource provider in dependency order.
    ///
    /// If any constructor fails, every resource initialized so far is torn
    /// down in reverse order before the error propagates; the container is
    /// never left partially initialized. Idempotent once ready.
    pub async fn init(&self) -> Result<(), CoreError> {
        let _guard = self.init_lock.lock().await;

        match self.state()? {
            ContainerState::Ready => return Ok(()),
            ContainerState::ShutDown => {
                return Err(CoreError::ContainerNotReady {
                    state: ContainerState::ShutDown.as_str().to_string(),
                })
            }
            ContainerState::Registered => {}
        }

        self.validate()?;

        let order = DependencyGraph::from_specs(self.specs.values())
            .topological_sort()
            .map_err(CoreError::from)?;
        let resource_order: Vec<&String> = order
            .iter()
            .filter(|key| {
                self.specs
                    .get(key.as_str())
                    .map(|spec| spec.kind().is_resource())
                    .unwrap_or(false)
            })
            .collect();

        info!(
            resources = resource_order.len(),
            run_id = %self.settings.run_id,
            "initializing container"
        );

        for key in resource_order {
            match self.construct_resource(key).await {
                Ok(()) => debug!(key = %key, "resource initialized"),
                Err(error) => {
                    warn!(key = %key, %error, "resource init failed, rolling back");
                    self.rollback_initialized().await;
                    return Err(CoreError::ResourceInitFailed {
                        key: key.clone(),
                        source: Box::new(error),
                    });
                }
            }
        }

        self.set_state(ContainerState::Ready)?;
        info!("container ready");
        Ok(())
    }

    async fn construct_resource(&self, key: &str) -> Result<(), CoreError> {
        let spec = self
            .specs
            .get(key)
            .ok_or_else(|| CoreError::ProviderNotFound {
                key: key.to_string(),
            })?;

        let deps = self.resolve_deps(spec).await?;
        let construct = match spec.activation() {
            ProviderActivation::Resource(construct) => Arc::clone(construct),
            _ => {
                return Err(CoreError::provider(format!(
                    "provider '{}' is registered as a resource but carries no resource constructor",
                    key
                )))
            }
        };
        let (instance, teardown) = construct(deps).await?;

        self.resources
            .write()
            .map_err(|_| CoreError::LockError {
                resource: "container_resources".to_string(),
            })?
            .insert(key.to_string(), instance);
        self.teardowns
            .lock()
            .map_err(|_| CoreError::LockError {
                resource: "container_teardowns".to_string(),
            })?
            .push((key.to_string(), teardown));
        Ok(())
    }

    /// Tear down every resource initialized so far, in reverse order. Used
    /// when init aborts midway.
    async fn rollback_initialized(&self) {
        let teardowns: Vec<(String, Teardown)> = match self.teardowns.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };

        for (key, teardown) in teardowns.into_iter().rev() {
            debug!(key = %key, "rolling back resource");
            if let Err(error) = teardown().await {
                warn!(key = %key, %error, "rollback teardown failed");
            }
        }

        if let Ok(mut resources) = self.resources.write() {
            resources.clear();
        }
    }

    /// Resolve the value for a provider key.
    ///
    /// Singleton: constructed at most once, concurrent first resolutions
    /// block on a single construction. Resource: realized instance, or
    /// `ResourceNotReady` before init completes. Factory: a brand-new value
    /// every call. Config: cached settings projection. All resolution fails
    /// with `ContainerNotReady` once shutdown has begun.
    pub async fn resolve(&self, key: &str) -> Result<ProviderValue, CoreError> {
        let state = self.state()?;
        if state == ContainerState::ShutDown {
            return Err(CoreError::ContainerNotReady {
                state: state.as_str().to_string(),
            });
        }
        self.validate()?;
        self.resolve_inner(key).await
    }

    /// Resolve a provider and downcast it to its concrete type
    pub async fn resolve_as<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>, CoreError> {
        self.resolve(key)
            .await?
            .downcast::<T>()
            .map_err(|_| CoreError::TypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    fn resolve_inner<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<ProviderValue, CoreError>> {
        Box::pin(async move {
            let spec = self
                .specs
                .get(key)
                .ok_or_else(|| CoreError::ProviderNotFound {
                    key: key.to_string(),
                })?;

            match spec.kind() {
                ProviderKind::ConfigValue => {
                    let cell = self.construct_once_cell(key)?;
                    let value = cell
                        .get_or_try_init(|| async {
                            match spec.activation() {
                                ProviderActivation::Projection(project) => {
                                    project(self.settings.as_ref())
                                }
                                _ => Err(activation_mismatch(key)),
                            }
                        })
                        .await?;
                    Ok(value.clone())
                }
                ProviderKind::Singleton => {
                    let cell = self.construct_once_cell(key)?;
                    let value = cell
                        .get_or_try_init(|| async {
                            let deps = self.resolve_deps(spec).await?;
                            match spec.activation() {
                                ProviderActivation::Construct(construct) => construct(deps).await,
                                _ => Err(activation_mismatch(key)),
                            }
                        })
                        .await?;
                    Ok(value.clone())
                }
                ProviderKind::Factory => {
                    let deps = self.resolve_deps(spec).await?;
                    match spec.activation() {
                        ProviderActivation::Construct(construct) => construct(deps).await,
                        _ => Err(activation_mismatch(key)),
                    }
                }
                ProviderKind::Resource => self
                    .resources
                    .read()
                    .map_err(|_| CoreError::LockError {
                        resource: "container_resources".to_string(),
                    })?
                    .get(key)
                    .cloned()
                    .ok_or_else(|| CoreError::ResourceNotReady {
                        key: key.to_string(),
                    }),
            }
        })
    }

    fn construct_once_cell(&self, key: &str) -> Result<&OnceCell<ProviderValue>, CoreError> {
        self.cells.get(key).ok_or_else(|| {
            CoreError::provider(format!("missing construct-once cell for provider '{}'", key))
        })
    }

    async fn resolve_deps(&self, spec: &ProviderSpec) -> Result<ResolvedDeps, CoreError> {
        let mut values = Vec::with_capacity(spec.dependencies().len());
        for dependency in spec.dependencies() {
            values.push(self.resolve_inner(dependency).await?);
        }
        Ok(ResolvedDeps::new(spec.dependencies().to_vec(), values))
    }

    /// Tear down every resource in exact reverse initialization order.
    ///
    /// Teardown continues through failures and aggregates them; every
    /// resource gets an attempted release. Idempotent: the second call is a
    /// no-op.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(_) => {
                    return Err(ShutdownError::new(vec![TeardownFailure::new(
                        "container",
                        "state lock poisoned",
                    )]))
                }
            };
            if *state == ContainerState::ShutDown {
                return Ok(());
            }
            *state = ContainerState::ShutDown;
        }

        info!(run_id = %self.settings.run_id, "shutting down container");

        let teardowns: Vec<(String, Teardown)> = match self.teardowns.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => {
                return Err(ShutdownError::new(vec![TeardownFailure::new(
                    "container",
                    "teardown registry lock poisoned",
                )]))
            }
        };

        let mut failures = Vec::new();
        for (key, teardown) in teardowns.into_iter().rev() {
            debug!(key = %key, "tearing down resource");
            if let Err(error) = teardown().await {
                warn!(key = %key, %error, "teardown failed");
                failures.push(TeardownFailure::new(key, error.to_string()));
            }
        }

        if let Ok(mut resources) = self.resources.write() {
            resources.clear();
        }

        if failures.is_empty() {
            info!("container shut down");
            Ok(())
        } else {
            Err(ShutdownError::new(failures))
        }
    }

    fn set_state(&self, next: ContainerState) -> Result<(), CoreError> {
        let mut state = self.state.write().map_err(|_| CoreError::LockError {
            resource: "container_state".to_string(),
        })?;
        *state = next;
        Ok(())
    }
}

fn activation_mismatch(key: &str) -> CoreError {
    CoreError::provider(format!(
        "provider '{}' kind does not match its registered constructor",
        key
    ))
}

// Keeps `Arc<dyn Any>` values resolvable across worker threads.
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Container>();
};
