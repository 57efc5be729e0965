use std::collections::HashMap;
use std::sync::Arc;

use crate::container::{Container, ContainerState};
use crate::errors::CoreError;
use crate::providers::ProviderValue;

/// Boundary adapter between the transport layer and the container.
///
/// The transport layer calls `resolve_all` once per inbound unit of work
/// with the statically declared list of keys its handler needs, and passes
/// the resulting values into its own handler invocation. Resolution is only
/// valid in the window bracketed by `Container::init` and
/// `Container::shutdown`.
#[derive(Debug, Clone)]
pub struct InjectionPoint {
    container: Arc<Container>,
}

impl InjectionPoint {
    pub fn new(container: Arc<Container>) -> Self {
        Self { container }
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Resolve every declared key for one unit of work.
    ///
    /// Fails with `ContainerNotReady` outside the init/shutdown window; any
    /// single resolution failure fails the whole call.
    pub async fn resolve_all(
        &self,
        keys: &[&str],
    ) -> Result<HashMap<String, ProviderValue>, CoreError> {
        let state = self.container.state()?;
        if state != ContainerState::Ready {
            return Err(CoreError::ContainerNotReady {
                state: state.as_str().to_string(),
            });
        }

        let mut resolved = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = self.container.resolve(key).await?;
            resolved.insert(key.to_string(), value);
        }
        Ok(resolved)
    }
}
