// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 buildflow contributors

//! DAG (Directed Acyclic Graph) builder for stage dependencies
//!
//! A stage depends on the stage it is based on and on every stage it copies
//! from. Edges point from a dependency to its dependent. The graph is built
//! once, checked for cycles, and resolved into a deterministic execution
//! order.

use petgraph::algo::{has_path_connecting, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::descriptor::{lookup, BaseRef, StageDescriptor};
use super::ReferencePolicy;
use crate::errors::{BuildError, BuildResult};

/// Why one stage depends on another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// `FROM <stage>`
    Base,
    /// `COPY --from=<stage>`
    Copy,
}

/// Builder for stage dependency DAGs
pub struct DagBuilder {
    graph: DiGraph<usize, EdgeKind>,
    name_to_index: HashMap<String, NodeIndex>,
    index_to_name: HashMap<NodeIndex, String>,
}

impl DagBuilder {
    /// Create a new DAG builder
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_index: HashMap::new(),
            index_to_name: HashMap::new(),
        }
    }

    /// Build a DAG from stage descriptors
    ///
    /// Copy references are checked against `policy`; the result is
    /// guaranteed to be acyclic.
    pub fn build(descriptors: &[StageDescriptor], policy: ReferencePolicy) -> BuildResult<Self> {
        let mut builder = Self::new();

        // Add all stages as nodes, in declaration order
        for descriptor in descriptors {
            let node = builder.graph.add_node(descriptor.index());
            builder.name_to_index.insert(descriptor.name().to_string(), node);
            builder.index_to_name.insert(node, descriptor.name().to_string());
        }

        for descriptor in descriptors {
            let stage_node = builder.name_to_index[descriptor.name()];

            // Base references were checked when the descriptor was built
            if let BaseRef::Stage(parent) = descriptor.base() {
                if let Some(&parent_node) = builder.name_to_index.get(parent) {
                    builder.graph.add_edge(parent_node, stage_node, EdgeKind::Base);
                }
            }

            for (_, reference) in descriptor.copy_references() {
                let dep = Self::check_copy_reference(descriptors, descriptor, reference, policy)?;
                let dep_node = builder.name_to_index[dep.name()];

                // Only add if not already present
                if !builder.graph.contains_edge(dep_node, stage_node) {
                    builder.graph.add_edge(dep_node, stage_node, EdgeKind::Copy);
                }
            }
        }

        // Validate no cycles
        builder.validate_acyclic()?;

        Ok(builder)
    }

    fn check_copy_reference<'a>(
        descriptors: &'a [StageDescriptor],
        stage: &StageDescriptor,
        reference: &str,
        policy: ReferencePolicy,
    ) -> BuildResult<&'a StageDescriptor> {
        let unknown = || BuildError::UnknownStage {
            stage: stage.name().to_string(),
            reference: reference.to_string(),
        };

        let dep = lookup(descriptors, reference).ok_or_else(unknown)?;

        if dep.index() == stage.index() {
            return Err(BuildError::CyclicDependency {
                stages: vec![stage.name().to_string(), stage.name().to_string()],
            });
        }

        if policy == ReferencePolicy::DeclareBeforeUse && dep.index() > stage.index() {
            return Err(unknown());
        }

        Ok(dep)
    }

    /// Validate that the graph is acyclic
    fn validate_acyclic(&self) -> BuildResult<()> {
        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(_) => Err(BuildError::CyclicDependency {
                stages: self.find_cycle_members(),
            }),
        }
    }

    /// Find the stages of the first cycle, closed by repeating its first member
    fn find_cycle_members(&self) -> Vec<String> {
        let mut components: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|c| c.len() > 1)
            .collect();

        for component in &mut components {
            component.sort_by_key(|n| self.graph[*n]);
        }
        components.sort_by_key(|c| self.graph[c[0]]);

        let Some(component) = components.first() else {
            return Vec::new();
        };

        let mut stages: Vec<String> = component
            .iter()
            .map(|n| self.index_to_name[n].clone())
            .collect();
        stages.push(stages[0].clone());
        stages
    }

    /// Get stage indices in execution order
    ///
    /// Every stage comes after all of its dependencies; among stages that
    /// are ready at the same time, the one declared first goes first.
    pub fn topological_order(&self) -> BuildResult<Vec<usize>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();

        let mut ready: BinaryHeap<Reverse<(usize, NodeIndex)>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(n, _)| Reverse((self.graph[*n], *n)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((index, node))) = ready.pop() {
            order.push(index);

            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.graph[dependent], dependent)));
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(BuildError::CyclicDependency {
                stages: self.find_cycle_members(),
            });
        }

        Ok(order)
    }

    /// Get stage names in execution order
    pub fn topological_order_names(&self) -> BuildResult<Vec<String>> {
        Ok(self
            .topological_order()?
            .into_iter()
            .map(|i| self.index_to_name[&NodeIndex::new(i)].clone())
            .collect())
    }

    /// Indices of `target` and every stage it transitively depends on
    pub fn required_for(&self, target: usize) -> HashSet<usize> {
        let mut required = HashSet::new();
        if target >= self.graph.node_count() {
            return required;
        }

        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, NodeIndex::new(target));
        while let Some(node) = dfs.next(reversed) {
            required.insert(self.graph[node]);
        }
        required
    }

    /// Indices of the stages `index` depends on directly
    pub fn dependencies_of(&self, index: usize) -> Vec<usize> {
        self.neighbors(index, Direction::Incoming)
    }

    /// Indices of the stages that depend directly on `index`
    pub fn dependents_of(&self, index: usize) -> Vec<usize> {
        self.neighbors(index, Direction::Outgoing)
    }

    fn neighbors(&self, index: usize, direction: Direction) -> Vec<usize> {
        if index >= self.graph.node_count() {
            return Vec::new();
        }
        let mut indices: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(index), direction)
            .map(|n| self.graph[n])
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Get dependencies for a stage (stages that must run before it)
    pub fn dependencies(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        Some(self.names(self.dependencies_of(self.graph[*node])))
    }

    /// Get dependents for a stage (stages that depend on it)
    pub fn dependents(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        Some(self.names(self.dependents_of(self.graph[*node])))
    }

    fn names(&self, indices: Vec<usize>) -> Vec<String> {
        indices
            .into_iter()
            .map(|i| self.index_to_name[&NodeIndex::new(i)].clone())
            .collect()
    }

    /// Check if stage A depends (directly or transitively) on stage B
    pub fn depends_on(&self, stage_a: &str, stage_b: &str) -> bool {
        let Some(node_a) = self.name_to_index.get(stage_a) else {
            return false;
        };
        let Some(node_b) = self.name_to_index.get(stage_b) else {
            return false;
        };

        node_a != node_b && has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    fn edges(&self) -> impl Iterator<Item = (&str, &str, EdgeKind)> + '_ {
        self.graph.edge_indices().filter_map(|edge| {
            let (from, to) = self.graph.edge_endpoints(edge)?;
            Some((
                self.index_to_name[&from].as_str(),
                self.index_to_name[&to].as_str(),
                self.graph[edge],
            ))
        })
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        // Add nodes
        for node in self.graph.node_indices() {
            out.push_str(&format!(
                "    s{}[{}]\n",
                self.graph[node], self.index_to_name[&node]
            ));
        }

        // Add edges
        for edge in self.graph.edge_indices() {
            let Some((from, to)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            let arrow = match self.graph[edge] {
                EdgeKind::Base => "-->",
                EdgeKind::Copy => "-. copy .->",
            };
            out.push_str(&format!(
                "    s{} {} s{}\n",
                self.graph[from], arrow, self.graph[to]
            ));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph build {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (from, to, kind) in self.edges() {
            match kind {
                EdgeKind::Base => out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to)),
                EdgeKind::Copy => out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [style=dashed, label=\"copy\"];\n",
                    from, to
                )),
            }
        }

        // Add isolated nodes (no edges)
        for node in self.graph.node_indices() {
            if self.graph.neighbors_undirected(node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", self.index_to_name[&node]));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self, descriptors: &[StageDescriptor]) -> BuildResult<String> {
        let order = self.topological_order()?;
        let mut out = String::new();

        for (i, idx) in order.iter().enumerate() {
            let Some(stage) = descriptors.get(*idx) else {
                continue;
            };
            let deps = self.dependencies(stage.name()).unwrap_or_default();

            out.push_str(&format!(
                "{}. {} (from {}, {} instructions)",
                i + 1,
                stage.name(),
                stage.base(),
                stage.instructions().len()
            ));

            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        Ok(out)
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
