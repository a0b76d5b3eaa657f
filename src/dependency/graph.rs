//! Module dependency graph and migration ordering

use crate::error::{GuardianError, GuardianResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// `from_module` needs `to_module`'s tables to exist first
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from_module: String,
    pub to_module: String,
    pub table: String,
    pub reference: String,
}

/// Module -> modules it depends on. Every referenced module is a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a DependencyEdge>) -> Self {
        let mut graph = Self::new();
        for edge in edges {
            graph.add_edge(&edge.from_module, &edge.to_module);
        }
        graph
    }

    pub fn add_node(&mut self, module: &str) {
        self.nodes.entry(module.to_string()).or_default();
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(to);
        self.nodes
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    pub fn dependencies_of(&self, module: &str) -> Option<&BTreeSet<String>> {
        self.nodes.get(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Subgraph of `module` and everything it transitively depends on
    pub fn reachable_from(&self, module: &str) -> DependencyGraph {
        let mut sub = DependencyGraph::new();
        let mut queue = VecDeque::from([module.to_string()]);
        sub.add_node(module);

        while let Some(current) = queue.pop_front() {
            for dep in self.nodes.get(&current).into_iter().flatten() {
                if !sub.nodes.contains_key(dep) {
                    queue.push_back(dep.clone());
                }
                sub.add_edge(&current, dep);
            }
        }
        sub
    }

    /// Topological order, dependencies first (Kahn's algorithm).
    ///
    /// Among modules that are ready at the same time the lexicographically
    /// smallest goes first, so the order is stable across runs. Modules that
    /// never become ready (on a cycle or behind one) are reported together.
    pub fn migration_order(&self) -> GuardianResult<Vec<String>> {
        let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (module, deps) in &self.nodes {
            pending.insert(module, deps.len());
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(module);
            }
        }

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(module, _)| *module)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(module) = ready.pop_first() {
            order.push(module.to_string());
            for dependent in dependents.get(module).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let modules = pending
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(module, _)| module.to_string())
                .collect();
            return Err(GuardianError::CyclicDependency { modules });
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dependency_comes_first() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("orders", "customers");

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.migration_order().unwrap(), vec!["customers", "orders"]);
    }

    #[test]
    fn test_lexicographic_tie_break() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("billing", "core");
        graph.add_edge("auth", "core");
        graph.add_node("analytics");

        assert_eq!(
            graph.migration_order().unwrap(),
            vec!["analytics", "core", "auth", "billing"]
        );
    }

    #[test]
    fn test_diamond() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("d", "b");
        graph.add_edge("d", "c");
        graph.add_edge("b", "a");
        graph.add_edge("c", "a");

        assert_eq!(graph.migration_order().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("billing", "orders");
        graph.add_edge("orders", "billing");
        graph.add_edge("reports", "orders");
        graph.add_node("core");

        match graph.migration_order() {
            Err(GuardianError::CyclicDependency { modules }) => {
                assert_eq!(modules, vec!["billing", "orders", "reports"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_reachable_from_keeps_only_dependencies() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("orders", "customers");
        graph.add_edge("customers", "core");
        graph.add_edge("billing", "orders");
        graph.add_edge("audit", "reports");
        graph.add_edge("reports", "audit");

        let sub = graph.reachable_from("orders");
        assert_eq!(sub.modules().collect::<Vec<_>>(), vec!["core", "customers", "orders"]);
        assert_eq!(
            sub.migration_order().unwrap(),
            vec!["core", "customers", "orders"]
        );
        assert_eq!(graph.reachable_from("lonely").len(), 1);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("core", "core");
        assert!(graph.migration_order().is_err());
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("orders", "customers");
        let json = serde_json::to_value(&graph).unwrap();
        assert_eq!(json, serde_json::json!({"customers": [], "orders": ["customers"]}));
    }
}
