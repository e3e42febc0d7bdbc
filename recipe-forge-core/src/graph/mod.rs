//! Dependency graph between recipes
//!
//! Nodes live in a petgraph arena and are addressed through a name index.
//! An edge points from the dependant to its dependency, so outgoing
//! neighbours are dependencies and incoming neighbours are dependents.

pub mod resolver;

pub use resolver::{BuildPlan, DependencyResolver, ImpactReport};

use crate::error::GraphError;
use crate::recipe::ComponentType;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

type GraphResult<T> = std::result::Result<T, GraphError>;

/// A recipe in the dependency graph
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub component_type: ComponentType,
    /// Cached by [`DependencyGraph::refresh_depths`]
    pub depth: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node; inserting an existing name is a no-op
    pub fn add_node(&mut self, name: &str, component_type: ComponentType) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }

        let idx = self.graph.add_node(GraphNode {
            name: name.to_string(),
            component_type,
            depth: None,
        });
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Record that `from` depends on `to`; both must already be registered
    pub fn add_edge(&mut self, from: &str, to: &str) -> GraphResult<()> {
        let from_idx = self.node_index(from)?;
        let to_idx = self.node_index(to)?;

        self.graph.update_edge(from_idx, to_idx, ());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.index.get(name).map(|&idx| &self.graph[idx])
    }

    /// Node names in insertion order
    pub fn node_names(&self) -> Vec<String> {
        self.graph.node_indices().map(|idx| self.graph[idx].name.clone()).collect()
    }

    /// All edges as `(dependant, dependency)` pairs
    pub fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(from, to)| (self.graph[from].name.clone(), self.graph[to].name.clone()))
            .collect()
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, name: &str) -> GraphResult<BTreeSet<String>> {
        let idx = self.node_index(name)?;
        Ok(self.neighbors(idx, Direction::Outgoing).map(|n| self.graph[n].name.clone()).collect())
    }

    /// Direct dependents of a node
    pub fn dependents(&self, name: &str) -> GraphResult<BTreeSet<String>> {
        let idx = self.node_index(name)?;
        Ok(self.neighbors(idx, Direction::Incoming).map(|n| self.graph[n].name.clone()).collect())
    }

    /// Find every cycle reachable from any root
    ///
    /// Each cycle is reported as the DFS stack slice starting at the first
    /// occurrence of the revisited node.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        let mut on_stack = HashSet::new();
        let mut cycles = Vec::new();

        for idx in self.graph.node_indices() {
            if !visited.contains(&idx) {
                self.cycle_dfs(idx, &mut visited, &mut stack, &mut on_stack, &mut cycles);
            }
        }

        cycles
    }

    fn cycle_dfs(
        &self,
        idx: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        stack: &mut Vec<NodeIndex>,
        on_stack: &mut HashSet<NodeIndex>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(idx);
        stack.push(idx);
        on_stack.insert(idx);

        for next in self.neighbors(idx, Direction::Outgoing) {
            if on_stack.contains(&next) {
                if let Some(start) = stack.iter().position(|&n| n == next) {
                    cycles.push(stack[start..].iter().map(|&n| self.graph[n].name.clone()).collect());
                }
            } else if !visited.contains(&next) {
                self.cycle_dfs(next, visited, stack, on_stack, cycles);
            }
        }

        stack.pop();
        on_stack.remove(&idx);
    }

    /// Kahn's algorithm: every dependency precedes its dependants
    pub fn topological_order(&self) -> GraphResult<Vec<String>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.neighbors(idx, Direction::Outgoing).count()))
            .collect();

        let mut queue: VecDeque<NodeIndex> =
            self.graph.node_indices().filter(|idx| in_degree[idx] == 0).collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(idx) = queue.pop_front() {
            order.push(self.graph[idx].name.clone());

            for dependent in self.neighbors(idx, Direction::Incoming) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != self.len() {
            return Err(GraphError::CycleDetected { cycles: self.detect_cycles() });
        }

        Ok(order)
    }

    /// Partition nodes into layers of mutually independent recipes
    ///
    /// Layer 0 holds recipes without dependencies; layer k holds recipes whose
    /// dependencies all sit in layers `0..k`.
    pub fn build_layers(&self) -> GraphResult<Vec<Vec<String>>> {
        let mut placed: HashSet<NodeIndex> = HashSet::new();
        let mut remaining: Vec<NodeIndex> = self.graph.node_indices().collect();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<NodeIndex>, Vec<NodeIndex>) =
                remaining.into_iter().partition(|&idx| {
                    self.neighbors(idx, Direction::Outgoing).all(|dep| placed.contains(&dep))
                });

            if ready.is_empty() {
                return Err(GraphError::CycleDetected { cycles: self.detect_cycles() });
            }

            placed.extend(ready.iter().copied());
            layers.push(ready.into_iter().map(|idx| self.graph[idx].name.clone()).collect());
            remaining = blocked;
        }

        Ok(layers)
    }

    /// Longest dependency chain below a node; 0 when it has no dependencies
    ///
    /// Nodes already on the current path count as 0, so cycles terminate.
    pub fn dependency_depth(&self, name: &str) -> GraphResult<usize> {
        let idx = self.node_index(name)?;
        let mut path = HashSet::new();
        let mut memo = HashMap::new();
        Ok(self.depth_of(idx, &mut path, &mut memo))
    }

    fn depth_of(
        &self,
        idx: NodeIndex,
        path: &mut HashSet<NodeIndex>,
        memo: &mut HashMap<NodeIndex, usize>,
    ) -> usize {
        if let Some(&depth) = memo.get(&idx) {
            return depth;
        }
        if !path.insert(idx) {
            return 0;
        }

        let deps: Vec<NodeIndex> = self.neighbors(idx, Direction::Outgoing).collect();
        let depth = deps
            .into_iter()
            .map(|dep| self.depth_of(dep, path, memo) + 1)
            .max()
            .unwrap_or(0);

        path.remove(&idx);
        memo.insert(idx, depth);
        depth
    }

    /// Compute and cache the depth of every node
    pub fn refresh_depths(&mut self) {
        let depths: Vec<(NodeIndex, usize)> = self
            .graph
            .node_indices()
            .map(|idx| {
                let mut path = HashSet::new();
                let mut memo = HashMap::new();
                (idx, self.depth_of(idx, &mut path, &mut memo))
            })
            .collect();

        for (idx, depth) in depths {
            self.graph[idx].depth = Some(depth);
        }
    }

    /// Everything `name` depends on, directly or indirectly
    pub fn transitive_dependencies(&self, name: &str) -> GraphResult<BTreeSet<String>> {
        self.reachable(name, Direction::Outgoing)
    }

    /// Everything that depends on `name`, directly or indirectly
    pub fn transitive_dependents(&self, name: &str) -> GraphResult<BTreeSet<String>> {
        self.reachable(name, Direction::Incoming)
    }

    fn reachable(&self, name: &str, direction: Direction) -> GraphResult<BTreeSet<String>> {
        let start = self.node_index(name)?;
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        let mut result = BTreeSet::new();

        while let Some(idx) = queue.pop_front() {
            for next in self.neighbors(idx, direction) {
                if seen.insert(next) {
                    result.insert(self.graph[next].name.clone());
                    queue.push_back(next);
                }
            }
        }

        Ok(result)
    }

    /// Dependencies referenced by any node but not present as a node
    ///
    /// Fails with [`GraphError::MissingDependency`] listing every
    /// `(referencing node, missing dependency)` pair.
    pub fn validate_completeness<'a, I>(nodes: I) -> GraphResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a BTreeSet<String>)>,
    {
        let nodes: Vec<_> = nodes.into_iter().collect();
        let known: HashSet<&str> = nodes.iter().map(|(name, _)| *name).collect();

        let missing: Vec<(String, String)> = nodes
            .iter()
            .flat_map(|(name, deps)| {
                deps.iter()
                    .filter(|dep| !known.contains(dep.as_str()))
                    .map(move |dep| (name.to_string(), dep.clone()))
            })
            .collect();

        if missing.is_empty() { Ok(()) } else { Err(GraphError::MissingDependency { missing }) }
    }

    fn node_index(&self, name: &str) -> GraphResult<NodeIndex> {
        self.index.get(name).copied().ok_or_else(|| GraphError::MissingNode(name.to_string()))
    }

    /// Neighbours in insertion order (petgraph yields newest edges first)
    fn neighbors(&self, idx: NodeIndex, direction: Direction) -> impl Iterator<Item = NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        nodes.sort();
        nodes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for node in nodes {
            g.add_node(node, ComponentType::Library);
        }
        for (from, to) in edges {
            g.add_edge(from, to).unwrap();
        }
        g
    }

    #[test]
    fn test_chain_order_and_layers() {
        let g = graph(&["A", "B", "C"], &[("B", "A"), ("C", "B")]);

        assert_eq!(g.topological_order().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(
            g.build_layers().unwrap(),
            vec![vec!["A".to_string()], vec!["B".to_string()], vec!["C".to_string()]]
        );
        assert_eq!(g.dependency_depth("C").unwrap(), 2);
    }

    #[test]
    fn test_two_node_cycle() {
        let g = graph(&["A", "B"], &[("A", "B"), ("B", "A")]);

        let cycles = g.detect_cycles();
        assert_eq!(cycles, vec![vec!["A".to_string(), "B".to_string()]]);
        assert!(matches!(g.topological_order(), Err(GraphError::CycleDetected { .. })));
        assert!(g.build_layers().is_err());
        // The revisited node short-circuits at 0, so depth stays finite
        assert_eq!(g.dependency_depth("A").unwrap(), 2);
    }

    #[test]
    fn test_reports_every_cycle() {
        let g = graph(
            &["A", "B", "C", "D", "E"],
            &[("A", "B"), ("B", "A"), ("C", "D"), ("D", "E"), ("E", "C")],
        );

        let cycles = g.detect_cycles();
        assert_eq!(cycles.len(), 2);
        assert!(cycles.contains(&vec!["C".to_string(), "D".to_string(), "E".to_string()]));
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let g = graph(&["A"], &[("A", "A")]);
        assert_eq!(g.detect_cycles(), vec![vec!["A".to_string()]]);
    }

    #[test]
    fn test_edge_requires_registered_nodes() {
        let mut g = graph(&["A"], &[]);
        assert_eq!(g.add_edge("A", "B"), Err(GraphError::MissingNode("B".to_string())));
        assert_eq!(g.add_edge("Z", "A"), Err(GraphError::MissingNode("Z".to_string())));
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let mut g = DependencyGraph::new();
        let first = g.add_node("A", ComponentType::Core);
        let second = g.add_node("A", ComponentType::Tool);
        assert_eq!(first, second);
        assert_eq!(g.len(), 1);
        assert_eq!(g.node("A").unwrap().component_type, ComponentType::Core);
    }

    #[test]
    fn test_diamond_depth_uses_longest_path() {
        let g = graph(
            &["A", "B", "C", "D", "E", "F"],
            &[("A", "B"), ("A", "C"), ("B", "E"), ("C", "D"), ("D", "E"), ("E", "F")],
        );
        assert_eq!(g.dependency_depth("A").unwrap(), 4);
        assert_eq!(g.dependency_depth("F").unwrap(), 0);
    }

    #[test]
    fn test_transitive_queries() {
        let g = graph(&["A", "B", "C", "D"], &[("B", "A"), ("C", "B"), ("D", "A")]);

        let deps = g.transitive_dependencies("C").unwrap();
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);

        let dependents = g.transitive_dependents("A").unwrap();
        assert_eq!(dependents.into_iter().collect::<Vec<_>>(), vec!["B", "C", "D"]);
    }

    #[test]
    fn test_validate_completeness() {
        let a: BTreeSet<String> = BTreeSet::new();
        let b: BTreeSet<String> = ["A".to_string(), "ghost".to_string()].into();

        let err = DependencyGraph::validate_completeness([("A", &a), ("B", &b)]).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingDependency { missing: vec![("B".to_string(), "ghost".to_string())] }
        );
    }

    #[test]
    fn test_refresh_depths_caches_values() {
        let mut g = graph(&["A", "B"], &[("B", "A")]);
        assert!(g.node("B").unwrap().depth.is_none());
        g.refresh_depths();
        assert_eq!(g.node("B").unwrap().depth, Some(1));
        assert_eq!(g.edges(), vec![("B".to_string(), "A".to_string())]);
    }

    /// Random DAG: edges only point from higher to lower index
    fn dag_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (2usize..12).prop_flat_map(|n| {
            let edges = proptest::collection::vec((0..n, 0..n), 0..n * 2).prop_map(|pairs| {
                pairs.into_iter().filter(|(a, b)| a > b).collect::<Vec<_>>()
            });
            (Just(n), edges)
        })
    }

    fn build_dag(n: usize, edges: &[(usize, usize)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for i in 0..n {
            g.add_node(&format!("n{}", i), ComponentType::Library);
        }
        for (a, b) in edges {
            g.add_edge(&format!("n{}", a), &format!("n{}", b)).unwrap();
        }
        g
    }

    proptest! {
        #[test]
        fn prop_topological_order_respects_edges((n, edges) in dag_strategy()) {
            let g = build_dag(n, &edges);
            let order = g.topological_order().unwrap();
            prop_assert_eq!(order.len(), n);

            let position: HashMap<&str, usize> =
                order.iter().enumerate().map(|(i, name)| (name.as_str(), i)).collect();
            for (dependant, dependency) in g.edges() {
                prop_assert!(position[dependency.as_str()] < position[dependant.as_str()]);
            }
        }

        #[test]
        fn prop_layers_partition_nodes((n, edges) in dag_strategy()) {
            let g = build_dag(n, &edges);
            let layers = g.build_layers().unwrap();

            let mut layer_of = HashMap::new();
            for (k, layer) in layers.iter().enumerate() {
                for name in layer {
                    prop_assert!(layer_of.insert(name.clone(), k).is_none());
                }
            }
            prop_assert_eq!(layer_of.len(), n);

            for (dependant, dependency) in g.edges() {
                prop_assert!(layer_of[&dependency] < layer_of[&dependant]);
            }
        }
    }
}
