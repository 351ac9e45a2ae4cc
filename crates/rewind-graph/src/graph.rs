//! Rewind graph storage
//!
//! An edge `a -> b` means "restarting `a` also requires restarting `b`".
//! Nodes keep their insertion order, so iteration is deterministic and the
//! first node added is conventionally the root.

use crate::error::GraphError;
use crate::key::NodeKey;
use indexmap::IndexMap;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashSet, VecDeque};

/// Structural properties a graph declares about itself
///
/// Graphs produced by rewinding are always directed and loop-free. Graphs
/// supplied by actions are checked against these properties before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphProperties {
    pub directed: bool,
    pub allows_self_loops: bool,
}

impl GraphProperties {
    /// Directed, no self-loops
    pub const REWIND: Self = Self {
        directed: true,
        allows_self_loops: false,
    };
}

impl Default for GraphProperties {
    fn default() -> Self {
        Self::REWIND
    }
}

/// Directed graph of nodes to restart
#[derive(Debug, Clone, Default)]
pub struct RewindGraph {
    properties: GraphProperties,
    inner: DiGraph<NodeKey, ()>,
    index: IndexMap<NodeKey, NodeIndex>,
}

impl RewindGraph {
    /// Create an empty directed, loop-free graph
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph declaring custom properties
    #[inline]
    #[must_use]
    pub fn with_properties(properties: GraphProperties) -> Self {
        Self {
            properties,
            ..Self::default()
        }
    }

    /// Create a graph holding only `root`
    #[must_use]
    pub fn rooted_at(root: impl Into<NodeKey>) -> Self {
        let mut graph = Self::new();
        graph.add_node(root.into());
        graph
    }

    #[inline]
    #[must_use]
    pub fn properties(&self) -> GraphProperties {
        self.properties
    }

    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, node: &NodeKey) -> bool {
        self.index.contains_key(node)
    }

    /// First node added to the graph
    #[must_use]
    pub fn root(&self) -> Option<&NodeKey> {
        self.index.keys().next()
    }

    /// Add `node`, returning `true` if it was not already present
    pub fn add_node(&mut self, node: NodeKey) -> bool {
        if self.index.contains_key(&node) {
            return false;
        }
        let idx = self.inner.add_node(node.clone());
        self.index.insert(node, idx);
        true
    }

    /// Add the edge `from -> to`, adding missing endpoints
    ///
    /// Returns `true` if the edge is new.
    ///
    /// # Errors
    /// `GraphError::SelfLoop` when `from == to` and the graph forbids loops.
    pub fn put_edge(&mut self, from: NodeKey, to: NodeKey) -> Result<bool, GraphError> {
        if from == to && !self.properties.allows_self_loops {
            return Err(GraphError::SelfLoop { node: from });
        }
        self.add_node(from.clone());
        self.add_node(to.clone());
        let a = self.index[&from];
        let b = self.index[&to];
        if self.inner.find_edge(a, b).is_some() {
            return Ok(false);
        }
        self.inner.add_edge(a, b, ());
        Ok(true)
    }

    #[must_use]
    pub fn contains_edge(&self, from: &NodeKey, to: &NodeKey) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => self.inner.find_edge(a, b).is_some(),
            _ => false,
        }
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeKey> + '_ {
        self.index.keys()
    }

    /// Edges as `(source, target)` pairs, in insertion order
    pub fn edges(&self) -> impl Iterator<Item = (&NodeKey, &NodeKey)> + '_ {
        self.inner
            .edge_references()
            .map(|edge| (&self.inner[edge.source()], &self.inner[edge.target()]))
    }

    /// Direct successors of `node`
    pub fn successors<'a>(&'a self, node: &NodeKey) -> impl Iterator<Item = &'a NodeKey> + 'a {
        let idx = self.index.get(node).copied();
        idx.into_iter()
            .flat_map(move |idx| self.inner.neighbors(idx).map(move |n| &self.inner[n]))
    }

    /// All nodes reachable from `start` (inclusive), breadth first
    ///
    /// Undirected graphs are traversed along both edge orientations.
    #[must_use]
    pub fn reachable_from(&self, start: &NodeKey) -> HashSet<&NodeKey> {
        let mut seen = HashSet::new();
        let Some(&start_idx) = self.index.get(start) else {
            return seen;
        };

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start_idx]);
        visited.insert(start_idx);
        while let Some(idx) = queue.pop_front() {
            seen.insert(&self.inner[idx]);
            let neighbors: Vec<NodeIndex> = if self.properties.directed {
                self.inner.neighbors(idx).collect()
            } else {
                self.inner.neighbors_undirected(idx).collect()
            };
            for next in neighbors {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    #[must_use]
    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.inner)
    }

    /// Action nodes, in insertion order
    pub fn action_nodes(&self) -> impl Iterator<Item = &NodeKey> + '_ {
        self.nodes().filter(|node| node.is_action())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{ActionKey, DerivedArtifact};

    fn action(owner: &str) -> NodeKey {
        NodeKey::Action(ActionKey::new(owner, 0))
    }

    #[test]
    fn add_node_reports_novelty() {
        let mut graph = RewindGraph::new();
        assert!(graph.add_node(action("a")));
        assert!(!graph.add_node(action("a")));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn put_edge_adds_endpoints_once() {
        let mut graph = RewindGraph::rooted_at(ActionKey::new("a", 0));
        assert!(graph.put_edge(action("a"), action("b")).unwrap());
        assert!(!graph.put_edge(action("a"), action("b")).unwrap());

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.contains_edge(&action("a"), &action("b")));
        assert_eq!(graph.root(), Some(&action("a")));
    }

    #[test]
    fn put_edge_rejects_self_loop() {
        let mut graph = RewindGraph::new();
        assert!(matches!(
            graph.put_edge(action("a"), action("a")),
            Err(GraphError::SelfLoop { .. })
        ));
        assert!(graph.is_empty());
    }

    #[test]
    fn self_loop_allowed_when_declared() {
        let mut graph = RewindGraph::with_properties(GraphProperties {
            directed: true,
            allows_self_loops: true,
        });
        assert!(graph.put_edge(action("a"), action("a")).is_ok());
        assert!(graph.is_cyclic());
    }

    #[test]
    fn reachability_follows_direction() {
        let mut graph = RewindGraph::new();
        let tree = NodeKey::Artifact(
            DerivedArtifact::tree("out/t", ActionKey::new("gen", 0)).into(),
        );
        graph.put_edge(action("a"), tree.clone()).unwrap();
        graph.put_edge(tree.clone(), action("b")).unwrap();
        graph.add_node(action("c"));

        let reached = graph.reachable_from(&action("a"));
        assert_eq!(reached.len(), 3);
        assert!(!reached.contains(&action("c")));
        assert_eq!(graph.reachable_from(&action("b")).len(), 1);
        assert_eq!(graph.successors(&tree).collect::<Vec<_>>(), vec![&action("b")]);
    }
}
