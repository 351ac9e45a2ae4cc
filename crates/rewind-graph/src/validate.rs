//! Rewinding subgraph validation
//!
//! Actions that depend on more than their declared inputs report the extra
//! structure rewinding must restart as a small graph rooted at their own key.
//! That graph comes from outside the planner and is checked here before it is
//! merged into a rewind plan.

use crate::error::SubgraphViolation;
use crate::graph::RewindGraph;
use crate::key::{ActionKey, Artifact, NodeKey};

/// Check that `graph` is a well-formed rewinding subgraph rooted at `root`
///
/// Checks, in order:
/// 1. the graph is directed and forbids self-loops
/// 2. `root` is a node and every node is reachable from it
/// 3. the graph is acyclic
/// 4. no edge targets a source artifact, and every artifact node is derived
///
/// # Errors
/// The first [`SubgraphViolation`] found.
pub fn validate_subgraph(graph: &RewindGraph, root: &ActionKey) -> Result<(), SubgraphViolation> {
    let properties = graph.properties();
    if !properties.directed {
        return Err(SubgraphViolation::Undirected);
    }
    if properties.allows_self_loops {
        return Err(SubgraphViolation::AllowsSelfLoops);
    }

    let root = NodeKey::Action(root.clone());
    if !graph.contains(&root) {
        return Err(SubgraphViolation::MissingRoot { root });
    }

    let reached = graph.reachable_from(&root);
    if reached.len() != graph.node_count() {
        let unreachable = graph
            .nodes()
            .filter(|node| !reached.contains(node))
            .cloned()
            .collect();
        return Err(SubgraphViolation::Unreachable { unreachable });
    }

    if graph.is_cyclic() {
        return Err(SubgraphViolation::Cyclic);
    }

    for (_, target) in graph.edges() {
        if let NodeKey::Artifact(artifact @ Artifact::Source(_)) = target {
            return Err(SubgraphViolation::SourceArtifactTarget {
                artifact: artifact.clone(),
            });
        }
    }

    // The root is an action, so any remaining source artifact is a node with
    // no incoming edge that still passed reachability.
    if let Some(NodeKey::Artifact(artifact)) = graph
        .nodes()
        .find(|node| matches!(node, NodeKey::Artifact(Artifact::Source(_))))
    {
        return Err(SubgraphViolation::NonDerivedArtifact {
            artifact: artifact.clone(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphProperties;
    use crate::key::{DerivedArtifact, SourceArtifact};

    fn root() -> ActionKey {
        ActionKey::new("//pkg:aware", 0)
    }

    fn tree() -> NodeKey {
        NodeKey::Artifact(DerivedArtifact::tree("out/tree", ActionKey::new("//pkg:gen", 0)).into())
    }

    #[test]
    fn accepts_well_formed_subgraph() {
        let mut graph = RewindGraph::rooted_at(root());
        graph.put_edge(root().into(), tree()).unwrap();
        graph
            .put_edge(tree(), ActionKey::new("//pkg:gen", 0).into())
            .unwrap();

        assert_eq!(validate_subgraph(&graph, &root()), Ok(()));
    }

    #[test]
    fn rejects_undirected() {
        let mut graph = RewindGraph::with_properties(GraphProperties {
            directed: false,
            allows_self_loops: false,
        });
        graph.add_node(root().into());
        assert_eq!(
            validate_subgraph(&graph, &root()),
            Err(SubgraphViolation::Undirected)
        );
    }

    #[test]
    fn rejects_self_loop_permission() {
        let mut graph = RewindGraph::with_properties(GraphProperties {
            directed: true,
            allows_self_loops: true,
        });
        graph.add_node(root().into());
        assert_eq!(
            validate_subgraph(&graph, &root()),
            Err(SubgraphViolation::AllowsSelfLoops)
        );
    }

    #[test]
    fn rejects_missing_root() {
        let graph = RewindGraph::rooted_at(ActionKey::new("//other:x", 0));
        assert!(matches!(
            validate_subgraph(&graph, &root()),
            Err(SubgraphViolation::MissingRoot { .. })
        ));
    }

    #[test]
    fn rejects_unreachable_nodes() {
        let mut graph = RewindGraph::rooted_at(root());
        graph
            .put_edge(tree(), ActionKey::new("//pkg:gen", 0).into())
            .unwrap();

        match validate_subgraph(&graph, &root()) {
            Err(SubgraphViolation::Unreachable { unreachable }) => {
                assert_eq!(unreachable.len(), 2);
            }
            other => panic!("expected unreachable violation, got {other:?}"),
        }
    }

    #[test]
    fn rejects_cycle() {
        let gen: NodeKey = ActionKey::new("//pkg:gen", 0).into();
        let mut graph = RewindGraph::rooted_at(root());
        graph.put_edge(root().into(), tree()).unwrap();
        graph.put_edge(tree(), gen.clone()).unwrap();
        graph.put_edge(gen, tree()).unwrap();

        assert_eq!(
            validate_subgraph(&graph, &root()),
            Err(SubgraphViolation::Cyclic)
        );
    }

    #[test]
    fn rejects_source_artifact_target() {
        let source = Artifact::from(SourceArtifact::new("pkg/BUILD"));
        let mut graph = RewindGraph::rooted_at(root());
        graph
            .put_edge(root().into(), NodeKey::Artifact(source.clone()))
            .unwrap();

        assert_eq!(
            validate_subgraph(&graph, &root()),
            Err(SubgraphViolation::SourceArtifactTarget { artifact: source })
        );
    }
}
