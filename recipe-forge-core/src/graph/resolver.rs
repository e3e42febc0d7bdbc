//! Resolution of build plans and change impact from a recipe registry

use super::DependencyGraph;
use crate::error::{GraphError, Result};
use crate::recipe::{RecipeRegistry, RecipeUnit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

/// Build order and parallel layering for a target (or the whole registry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub target: Option<String>,
    pub order: Vec<String>,
    pub layers: Vec<Vec<String>>,
}

impl BuildPlan {
    pub fn unit_count(&self) -> usize {
        self.order.len()
    }

    /// Keep only the named units, preserving order and layer structure
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.order.retain(|name| keep(name));
        for layer in &mut self.layers {
            layer.retain(|name| keep(name));
        }
        self.layers.retain(|layer| !layer.is_empty());
    }
}

/// Units affected by a change to one recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub changed: String,
    pub direct_dependents: BTreeSet<String>,
    pub transitive_dependents: BTreeSet<String>,
    /// Rebuild layers for the changed unit and everything downstream of it
    pub rebuild_layers: Vec<Vec<String>>,
}

/// Builds dependency graphs from the registry on demand
pub struct DependencyResolver<'a> {
    registry: &'a RecipeRegistry,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(registry: &'a RecipeRegistry) -> Self {
        Self { registry }
    }

    /// Graph over every recipe in the registry
    pub fn build_graph(&self) -> Result<DependencyGraph> {
        let units: Vec<&RecipeUnit> = self.registry.units().collect();
        Self::graph_from(&units)
    }

    /// Graph over `target` and its transitive dependencies
    pub fn build_graph_for(&self, target: &str) -> Result<DependencyGraph> {
        let closure = self.closure(target)?;
        Self::graph_from(&closure)
    }

    fn graph_from(units: &[&RecipeUnit]) -> Result<DependencyGraph> {
        DependencyGraph::validate_completeness(
            units.iter().map(|unit| (unit.name(), unit.dependencies())),
        )?;

        let mut graph = DependencyGraph::new();
        for unit in units {
            graph.add_node(unit.name(), unit.component_type());
        }
        for unit in units {
            for dep in unit.dependencies() {
                graph.add_edge(unit.name(), dep)?;
            }
        }
        graph.refresh_depths();

        Ok(graph)
    }

    /// Collect the target and everything it needs, failing on unknown names
    fn closure(&self, target: &str) -> Result<Vec<&'a RecipeUnit>> {
        let root = self.registry.require(target)?;
        let mut seen: BTreeSet<&str> = BTreeSet::from([root.name()]);
        let mut queue = VecDeque::from([root]);
        let mut units = Vec::new();
        let mut missing = Vec::new();

        while let Some(unit) = queue.pop_front() {
            units.push(unit);
            for dep in unit.dependencies() {
                match self.registry.get(dep) {
                    Some(dep_unit) => {
                        if seen.insert(dep_unit.name()) {
                            queue.push_back(dep_unit);
                        }
                    }
                    None => missing.push((unit.name().to_string(), dep.clone())),
                }
            }
        }

        if !missing.is_empty() {
            return Err(GraphError::MissingDependency { missing }.into());
        }

        units.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(units)
    }

    /// Plan for building one target after its dependencies
    pub fn resolve(&self, target: &str) -> Result<BuildPlan> {
        let graph = self.build_graph_for(target)?;
        let plan = Self::plan(&graph, Some(target.to_string()))?;
        debug!("Resolved {} units for {}", plan.unit_count(), target);
        Ok(plan)
    }

    /// Plan for building the whole registry
    pub fn resolve_all(&self) -> Result<BuildPlan> {
        let graph = self.build_graph()?;
        Self::plan(&graph, None)
    }

    fn plan(graph: &DependencyGraph, target: Option<String>) -> Result<BuildPlan> {
        let cycles = graph.detect_cycles();
        if !cycles.is_empty() {
            return Err(GraphError::CycleDetected { cycles }.into());
        }

        Ok(BuildPlan { target, order: graph.topological_order()?, layers: graph.build_layers()? })
    }

    /// What has to be rebuilt when `name` changes
    pub fn impact(&self, name: &str) -> Result<ImpactReport> {
        let graph = self.build_graph()?;
        let direct_dependents = graph.dependents(name)?;
        let transitive_dependents = graph.transitive_dependents(name)?;

        let mut affected = transitive_dependents.clone();
        affected.insert(name.to_string());

        let rebuild_layers = graph
            .build_layers()?
            .into_iter()
            .map(|layer| layer.into_iter().filter(|n| affected.contains(n)).collect::<Vec<_>>())
            .filter(|layer| !layer.is_empty())
            .collect();

        Ok(ImpactReport {
            changed: name.to_string(),
            direct_dependents,
            transitive_dependents,
            rebuild_layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use crate::recipe::fixtures::unit;

    fn registry(units: Vec<RecipeUnit>) -> RecipeRegistry {
        units.into_iter().collect()
    }

    #[test]
    fn test_resolve_chain() {
        let reg = registry(vec![unit("A", &[]), unit("B", &["A"]), unit("C", &["B"])]);
        let plan = DependencyResolver::new(&reg).resolve("C").unwrap();

        assert_eq!(plan.order, vec!["A", "B", "C"]);
        assert_eq!(plan.layers.len(), 3);
    }

    #[test]
    fn test_resolve_only_includes_closure() {
        let reg = registry(vec![unit("A", &[]), unit("B", &["A"]), unit("Z", &[])]);
        let plan = DependencyResolver::new(&reg).resolve("B").unwrap();

        assert_eq!(plan.order, vec!["A", "B"]);
        assert!(!plan.order.contains(&"Z".to_string()));
    }

    #[test]
    fn test_cycle_fails_resolution() {
        let reg = registry(vec![unit("A", &["B"]), unit("B", &["A"])]);
        let err = DependencyResolver::new(&reg).resolve("A").unwrap_err();

        assert!(matches!(err, ForgeError::Graph(GraphError::CycleDetected { .. })));
    }

    #[test]
    fn test_missing_dependency_is_reported() {
        let reg = registry(vec![unit("A", &["ghost"])]);
        let err = DependencyResolver::new(&reg).resolve("A").unwrap_err();

        match err {
            ForgeError::Graph(GraphError::MissingDependency { missing }) => {
                assert_eq!(missing, vec![("A".to_string(), "ghost".to_string())]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_impact_analysis() {
        let reg = registry(vec![
            unit("model", &[]),
            unit("graph", &["model"]),
            unit("cache", &["model"]),
            unit("pipeline", &["graph", "cache"]),
            unit("docs", &[]),
        ]);
        let report = DependencyResolver::new(&reg).impact("model").unwrap();

        assert_eq!(report.direct_dependents.len(), 2);
        assert_eq!(report.transitive_dependents.len(), 3);
        assert_eq!(
            report.rebuild_layers,
            vec![
                vec!["model".to_string()],
                vec!["cache".to_string(), "graph".to_string()],
                vec!["pipeline".to_string()],
            ]
        );
    }

    #[test]
    fn test_plan_retain() {
        let reg = registry(vec![unit("A", &[]), unit("B", &["A"]), unit("C", &["B"])]);
        let mut plan = DependencyResolver::new(&reg).resolve_all().unwrap();
        plan.retain(|name| name != "B");

        assert_eq!(plan.order, vec!["A", "C"]);
        assert_eq!(plan.layers, vec![vec!["A".to_string()], vec!["C".to_string()]]);
    }
}
