#[allow(clippy::module_inception)]
pub mod container;
pub mod injection;
pub mod resolver;

pub use container::{Container, ContainerState};
pub use injection::InjectionPoint;
pub use resolver::{DependencyGraph, GraphError};
