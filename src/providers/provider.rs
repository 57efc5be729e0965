use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::Settings;
use crate::errors::CoreError;

/// Boxed future used by provider constructors and teardown callbacks
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased value produced by a provider
pub type ProviderValue = Arc<dyn Any + Send + Sync>;

/// Teardown callback recorded for a realized resource
pub type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), CoreError>> + Send>;

/// Constructor for singleton and factory providers
pub type ConstructFn =
    Arc<dyn Fn(ResolvedDeps) -> BoxFuture<'static, Result<ProviderValue, CoreError>> + Send + Sync>;

/// Constructor for resource providers: returns the instance together with the
/// callback that releases it
pub type ResourceFn = Arc<
    dyn Fn(ResolvedDeps) -> BoxFuture<'static, Result<(ProviderValue, Teardown), CoreError>>
        + Send
        + Sync,
>;

/// Pure projection from the settings value, used by config providers.
/// No side effects are permitted here.
pub type ProjectionFn = Arc<dyn Fn(&Settings) -> Result<ProviderValue, CoreError> + Send + Sync>;

/// Box a concrete value as a type-erased provider value
pub fn provider_value<T: Send + Sync + 'static>(value: T) -> ProviderValue {
    Arc::new(value)
}

/// Provider lifetime kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Constructed at most once, lazily, and reused for the container's life
    Singleton,
    /// Constructed eagerly during init with an explicit teardown, released in
    /// reverse initialization order during shutdown
    Resource,
    /// Constructed fresh on every resolution
    Factory,
    /// Cached projection from the settings value
    ConfigValue,
}

impl ProviderKind {
    pub fn is_singleton(&self) -> bool {
        matches!(self, ProviderKind::Singleton)
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, ProviderKind::Resource)
    }

    pub fn is_factory(&self) -> bool {
        matches!(self, ProviderKind::Factory)
    }

    pub fn is_config_value(&self) -> bool {
        matches!(self, ProviderKind::ConfigValue)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Singleton => "singleton",
            ProviderKind::Resource => "resource",
            ProviderKind::Factory => "factory",
            ProviderKind::ConfigValue => "config_value",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "singleton" => Ok(ProviderKind::Singleton),
            "resource" => Ok(ProviderKind::Resource),
            "factory" => Ok(ProviderKind::Factory),
            "config_value" | "config" => Ok(ProviderKind::ConfigValue),
            _ => Err(CoreError::provider(format!("invalid provider kind: {}", s))),
        }
    }
}

/// Already-resolved dependency values, in the order the provider declared
/// them. Constructors receive these instead of reaching back into the
/// container, which keeps them testable in isolation.
#[derive(Clone)]
pub struct ResolvedDeps {
    keys: Vec<String>,
    values: Vec<ProviderValue>,
}

impl ResolvedDeps {
    pub fn new(keys: Vec<String>, values: Vec<ProviderValue>) -> Self {
        debug_assert_eq!(keys.len(), values.len());
        Self { keys, values }
    }

    /// Empty dependency list, for providers that declared none
    pub fn empty() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw type-erased value at a declared position
    pub fn value(&self, index: usize) -> Option<&ProviderValue> {
        self.values.get(index)
    }

    /// Downcast the dependency at a declared position to its concrete type
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, CoreError> {
        let value = self.values.get(index).ok_or_else(|| {
            CoreError::provider(format!(
                "dependency index {} out of range ({} declared)",
                index,
                self.values.len()
            ))
        })?;

        value
            .clone()
            .downcast::<T>()
            .map_err(|_| CoreError::TypeMismatch {
                key: self
                    .keys
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| index.to_string()),
                expected: std::any::type_name::<T>(),
            })
    }
}

impl fmt::Debug for ResolvedDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedDeps")
            .field("keys", &self.keys)
            .finish()
    }
}

/// Strategy used to produce the provider's value
#[derive(Clone)]
pub enum ProviderActivation {
    /// Singleton and factory constructors
    Construct(ConstructFn),
    /// Resource constructor returning (instance, teardown)
    Resource(ResourceFn),
    /// Settings projection
    Projection(ProjectionFn),
}

impl fmt::Debug for ProviderActivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategy = match self {
            ProviderActivation::Construct(_) => "Construct",
            ProviderActivation::Resource(_) => "Resource",
            ProviderActivation::Projection(_) => "Projection",
        };
        f.write_str(strategy)
    }
}

/// Declarative recipe for producing a value: identity, lifetime kind,
/// dependency keys, and the constructor. Immutable once registered.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    key: String,
    kind: ProviderKind,
    dependencies: Vec<String>,
    activation: ProviderActivation,
}

impl ProviderSpec {
    /// Declare a singleton provider: constructed at most once, lazily, on
    /// first resolution
    pub fn singleton<F, Fut>(key: impl Into<String>, dependencies: Vec<String>, construct: F) -> Self
    where
        F: Fn(ResolvedDeps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ProviderValue, CoreError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            kind: ProviderKind::Singleton,
            dependencies,
            activation: ProviderActivation::Construct(Arc::new(move |deps| {
                Box::pin(construct(deps))
            })),
        }
    }

    /// Declare a factory provider: constructed fresh on every resolution
    pub fn factory<F, Fut>(key: impl Into<String>, dependencies: Vec<String>, construct: F) -> Self
    where
        F: Fn(ResolvedDeps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ProviderValue, CoreError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            kind: ProviderKind::Factory,
            dependencies,
            activation: ProviderActivation::Construct(Arc::new(move |deps| {
                Box::pin(construct(deps))
            })),
        }
    }

    /// Declare a resource provider: constructed eagerly during init, the
    /// teardown callback is invoked in reverse initialization order during
    /// shutdown
    pub fn resource<F, Fut>(key: impl Into<String>, dependencies: Vec<String>, construct: F) -> Self
    where
        F: Fn(ResolvedDeps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(ProviderValue, Teardown), CoreError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            kind: ProviderKind::Resource,
            dependencies,
            activation: ProviderActivation::Resource(Arc::new(move |deps| {
                Box::pin(construct(deps))
            })),
        }
    }

    /// Declare a config provider: a pure projection from the settings value,
    /// cached after the first resolution
    pub fn config_value<F>(key: impl Into<String>, project: F) -> Self
    where
        F: Fn(&Settings) -> Result<ProviderValue, CoreError> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            kind: ProviderKind::ConfigValue,
            dependencies: Vec::new(),
            activation: ProviderActivation::Projection(Arc::new(project)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub(crate) fn activation(&self) -> &ProviderActivation {
        &self.activation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trip() {
        assert_eq!("singleton".parse::<ProviderKind>().unwrap(), ProviderKind::Singleton);
        assert_eq!("resource".parse::<ProviderKind>().unwrap(), ProviderKind::Resource);
        assert_eq!("factory".parse::<ProviderKind>().unwrap(), ProviderKind::Factory);
        assert_eq!("config".parse::<ProviderKind>().unwrap(), ProviderKind::ConfigValue);
        assert!("scoped".parse::<ProviderKind>().is_err());

        assert_eq!(format!("{}", ProviderKind::Resource), "resource");
    }

    #[test]
    fn test_resolved_deps_typed_access() {
        let deps = ResolvedDeps::new(
            vec!["conn_str".to_string(), "pool_size".to_string()],
            vec![provider_value("mem://test".to_string()), provider_value(8usize)],
        );

        assert_eq!(deps.len(), 2);
        assert_eq!(*deps.get::<String>(0).unwrap(), "mem://test");
        assert_eq!(*deps.get::<usize>(1).unwrap(), 8);
    }

    #[test]
    fn test_resolved_deps_type_mismatch() {
        let deps = ResolvedDeps::new(
            vec!["conn_str".to_string()],
            vec![provider_value("mem://test".to_string())],
        );

        let result = deps.get::<usize>(0);
        assert!(matches!(
            result,
            Err(CoreError::TypeMismatch { key, .. }) if key == "conn_str"
        ));
    }

    #[test]
    fn test_resolved_deps_out_of_range() {
        let deps = ResolvedDeps::empty();
        assert!(deps.is_empty());
        assert!(matches!(deps.get::<String>(0), Err(CoreError::Provider { .. })));
    }

    #[tokio::test]
    async fn test_constructor_receives_resolved_values() {
        let spec = ProviderSpec::factory("greeting", vec!["name".to_string()], |deps| async move {
            let name = deps.get::<String>(0)?;
            Ok(provider_value(format!("hello {}", name)))
        });

        assert_eq!(spec.kind(), ProviderKind::Factory);
        assert_eq!(spec.dependencies(), ["name"]);

        let deps = ResolvedDeps::new(
            vec!["name".to_string()],
            vec![provider_value("ada".to_string())],
        );
        let value = match spec.activation() {
            ProviderActivation::Construct(construct) => construct(deps).await.unwrap(),
            other => panic!("unexpected activation {:?}", other),
        };
        assert_eq!(*value.downcast::<String>().unwrap(), "hello ada");
    }
}
