//! Cross-Module Dependency Detection
//!
//! Maps every table to the module that declares it, turns foreign keys that
//! point into another module into dependency edges, and orders modules so
//! that referenced tables are migrated first.

pub mod graph;
pub mod ownership;

pub use graph::{DependencyEdge, DependencyGraph};
pub use ownership::OwnershipMap;

use crate::error::GuardianResult;
use crate::models::ChangeSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Dependencies introduced by one `ChangeSet`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyAnalysis {
    pub cross_module: bool,
    pub edges: Vec<DependencyEdge>,
    pub affected_modules: BTreeSet<String>,
    pub graph: DependencyGraph,
    pub migration_order: Vec<String>,
}

/// One module's position in the codebase-wide dependency picture
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDependencies {
    pub tables: Vec<String>,
    pub depends_on: BTreeSet<String>,
    pub depended_by: BTreeSet<String>,
}

/// Codebase-wide dependency report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleReport {
    pub modules: BTreeMap<String, ModuleDependencies>,
}

impl ModuleReport {
    pub fn graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (module, deps) in &self.modules {
            graph.add_node(module);
            for dep in &deps.depends_on {
                graph.add_edge(module, dep);
            }
        }
        graph
    }
}

pub struct DependencyDetector {
    ownership: OwnershipMap,
    enabled: bool,
}

impl DependencyDetector {
    pub fn new(ownership: OwnershipMap, enabled: bool) -> Self {
        Self { ownership, enabled }
    }

    pub fn ownership(&self) -> &OwnershipMap {
        &self.ownership
    }

    /// Resolve the foreign keys in `change_set` and order the affected modules
    pub fn analyze(&self, change_set: &ChangeSet) -> GuardianResult<DependencyAnalysis> {
        let mut analysis = DependencyAnalysis::default();
        if change_set.is_empty() {
            return Ok(analysis);
        }

        let module = change_set.module.as_str();
        analysis.affected_modules.insert(module.to_string());

        if self.enabled {
            for change in &change_set.changes {
                for reference in change.foreign_keys() {
                    let Some((owner, table)) = self.ownership.resolve_reference(reference) else {
                        debug!("Unresolved foreign key reference '{}'", reference);
                        continue;
                    };
                    if owner == module {
                        continue;
                    }

                    let edge = DependencyEdge {
                        from_module: module.to_string(),
                        to_module: owner.to_string(),
                        table,
                        reference: reference.to_string(),
                    };
                    if !analysis.edges.contains(&edge) {
                        analysis.edges.push(edge);
                    }
                }
            }
        }

        // Existing cross-module references, so an edge that closes a loop is caught
        let mut combined = if self.enabled {
            self.codebase_graph()
        } else {
            DependencyGraph::new()
        };
        for edge in &analysis.edges {
            combined.add_edge(&edge.from_module, &edge.to_module);
            analysis.affected_modules.insert(edge.to_module.clone());
        }
        analysis.graph = combined.reachable_from(module);
        analysis.cross_module = !analysis.edges.is_empty();
        analysis.migration_order = analysis.graph.migration_order()?;

        if analysis.cross_module {
            info!(
                "🔗 Module '{}' depends on: {}",
                module,
                analysis
                    .edges
                    .iter()
                    .map(|e| e.to_module.as_str())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Ok(analysis)
    }

    /// Module graph of every cross-module reference found by the scan
    pub fn codebase_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (module, _) in self.ownership.modules() {
            graph.add_node(module);
            for owner in self.owners_referenced_by(module) {
                graph.add_edge(module, &owner);
            }
        }
        graph
    }

    fn owners_referenced_by(&self, module: &str) -> BTreeSet<String> {
        self.ownership
            .references_of(module)
            .filter_map(|reference| self.ownership.resolve_reference(reference))
            .map(|(owner, _)| owner.to_string())
            .filter(|owner| owner != module)
            .collect()
    }

    /// Every module's tables, the modules it depends on, and its dependents
    pub fn module_report(&self) -> ModuleReport {
        let mut report = ModuleReport::default();

        for (module, tables) in self.ownership.modules() {
            let entry = report.modules.entry(module.to_string()).or_default();
            entry.tables = tables.iter().cloned().collect();
        }

        let modules: Vec<String> = report.modules.keys().cloned().collect();
        for module in modules {
            let owners = self.owners_referenced_by(&module);

            for owner in &owners {
                report
                    .modules
                    .entry(owner.clone())
                    .or_default()
                    .depended_by
                    .insert(module.clone());
            }
            report.modules.entry(module).or_default().depends_on = owners;
        }

        report
    }
}
