use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::errors::CoreError;
use crate::providers::ProviderSpec;

/// Graph validation error. Cloneable so the result of a one-time validation
/// pass can be cached and replayed to later callers.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("Circular dependency detected: {path}")]
    Cycle { path: String },

    #[error("Provider '{key}' depends on unregistered key '{dependency}'")]
    UnknownDependency { key: String, dependency: String },
}

impl From<GraphError> for CoreError {
    fn from(error: GraphError) -> Self {
        match error {
            GraphError::Cycle { path } => CoreError::CycleDetected { path },
            GraphError::UnknownDependency { key, dependency } => {
                CoreError::UnknownDependency { key, dependency }
            }
        }
    }
}

#[derive(Debug)]
struct DependencyNode {
    dependencies: Vec<String>,
    dependents: Vec<String>,
}

/// Dependency graph over provider keys, used for cycle detection and for
/// computing the resource initialization order
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Build the graph from registered provider specs
    pub fn from_specs<'a, I>(specs: I) -> Self
    where
        I: IntoIterator<Item = &'a ProviderSpec>,
    {
        let mut graph = Self::new();
        for spec in specs {
            graph.add_node(spec.key(), spec.dependencies());
        }
        graph.build_reverse_edges();
        graph
    }

    pub fn add_node(&mut self, key: &str, dependencies: &[String]) {
        self.nodes.insert(
            key.to_string(),
            DependencyNode {
                dependencies: dependencies.to_vec(),
                dependents: Vec::new(),
            },
        );
    }

    fn build_reverse_edges(&mut self) {
        let edges: Vec<(String, Vec<String>)> = self
            .nodes
            .iter()
            .map(|(key, node)| (key.clone(), node.dependencies.clone()))
            .collect();

        for (key, dependencies) in edges {
            for dependency in dependencies {
                if let Some(node) = self.nodes.get_mut(&dependency) {
                    node.dependents.push(key.clone());
                }
            }
        }
    }

    /// Check that every declared dependency is registered and that the graph
    /// is acyclic
    pub fn validate(&self) -> Result<(), GraphError> {
        for (key, node) in &self.nodes {
            for dependency in &node.dependencies {
                if !self.nodes.contains_key(dependency) {
                    return Err(GraphError::UnknownDependency {
                        key: key.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        self.detect_cycles()
    }

    /// DFS cycle detection reporting the offending path
    pub fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut in_progress = HashSet::new();

        // Sorted iteration keeps the reported path deterministic
        let mut keys: Vec<&String> = self.nodes.keys().collect();
        keys.sort();

        for key in keys {
            if !visited.contains(key.as_str()) {
                let mut path = Vec::new();
                self.dfs(key, &mut visited, &mut in_progress, &mut path)?;
            }
        }
        Ok(())
    }

    fn dfs(
        &self,
        key: &str,
        visited: &mut HashSet<String>,
        in_progress: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        if in_progress.contains(key) {
            path.push(key.to_string());
            return Err(GraphError::Cycle {
                path: path.join(" -> "),
            });
        }
        if visited.contains(key) {
            return Ok(());
        }

        in_progress.insert(key.to_string());
        path.push(key.to_string());

        if let Some(node) = self.nodes.get(key) {
            for dependency in &node.dependencies {
                self.dfs(dependency, visited, in_progress, path)?;
            }
        }

        path.pop();
        in_progress.remove(key);
        visited.insert(key.to_string());
        Ok(())
    }

    /// Topological order over all nodes (Kahn's algorithm): every dependency
    /// precedes its dependents
    pub fn topological_sort(&self) -> Result<Vec<String>, GraphError> {
        self.validate()?;

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut queue = VecDeque::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        let mut keys: Vec<&String> = self.nodes.keys().collect();
        keys.sort();

        for key in &keys {
            let node = &self.nodes[key.as_str()];
            in_degree.insert(key.as_str(), node.dependencies.len());
            if node.dependencies.is_empty() {
                queue.push_back(key.as_str());
            }
        }

        while let Some(key) = queue.pop_front() {
            order.push(key.to_string());

            if let Some(node) = self.nodes.get(key) {
                for dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent.as_str());
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(GraphError::Cycle {
                path: "unresolvable dependency cycle".to_string(),
            });
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a", &deps(&["b"]));
        graph.add_node("b", &deps(&["c"]));
        graph.add_node("c", &deps(&["a"]));
        graph.build_reverse_edges();

        let result = graph.detect_cycles();
        match result {
            Err(GraphError::Cycle { path }) => {
                assert!(path.contains("a") && path.contains("b") && path.contains("c"));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_cycle_detection() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a", &deps(&["a"]));
        graph.build_reverse_edges();

        assert!(matches!(graph.detect_cycles(), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_unknown_dependency() {
        let mut graph = DependencyGraph::new();
        graph.add_node("pool", &deps(&["conn_str"]));
        graph.build_reverse_edges();

        assert!(matches!(
            graph.validate(),
            Err(GraphError::UnknownDependency { key, dependency })
                if key == "pool" && dependency == "conn_str"
        ));
    }

    #[test]
    fn test_topological_order() {
        let mut graph = DependencyGraph::new();
        graph.add_node("conn_str", &[]);
        graph.add_node("pool", &deps(&["conn_str"]));
        graph.add_node("repo", &deps(&["pool", "cache"]));
        graph.add_node("cache", &deps(&["conn_str"]));
        graph.build_reverse_edges();

        let order = graph.topological_sort().unwrap();
        let pos = |k: &str| order.iter().position(|o| o == k).unwrap();

        assert!(pos("conn_str") < pos("pool"));
        assert!(pos("conn_str") < pos("cache"));
        assert!(pos("pool") < pos("repo"));
        assert!(pos("cache") < pos("repo"));
    }

    #[test]
    fn test_topological_sort_rejects_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a", &deps(&["b"]));
        graph.add_node("b", &deps(&["a"]));
        graph.build_reverse_edges();

        assert!(graph.topological_sort().is_err());
    }
}
