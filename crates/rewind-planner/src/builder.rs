//! Rewind graph construction
//!
//! Starting from the failed action, the builder adds an edge to every owning
//! direct dependency, then from each artifact to the actions generating it.
//! Each newly visited action is then checked for structure that rerunning it
//! alone would miss:
//! - graph-aware actions report a rewinding subgraph of their own
//! - actions insensitive to their input set pass inputs through, so their
//!   derived inputs (and those inputs' generating actions) restart too
//!
//! Checking uses an explicit FIFO worklist. Node presence in the graph is the
//! visited set, so no action is restarted twice for the same loss.
//!
//! A tree artifact owning a lost element restarts only the expanded actions
//! that generated the lost elements. When the lost elements cannot be matched
//! to any of the tree's generating actions, all of them restart.

use crate::engine::{Action, DiagnosticSink, EvaluationEngine, GeneratingActions};
use crate::error::{Anomaly, RewindError};
use indexmap::IndexMap;
use rewind_graph::{validate_subgraph, ActionKey, Artifact, DerivedArtifact, NodeKey, RewindGraph};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Output of [`RewindGraphBuilder::build`]
#[derive(Debug)]
pub struct BuiltRewindGraph {
    pub graph: RewindGraph,
    /// Actions to restart besides the root, in visit order
    pub additional_actions: Vec<Arc<dyn Action>>,
}

/// Grows the rewind graph for one planning call
///
/// State is private to the call; nothing here is shared across threads.
pub struct RewindGraphBuilder<'a> {
    engine: &'a dyn EvaluationEngine,
    diagnostics: &'a dyn DiagnosticSink,
    root: NodeKey,
    lost_generators: HashSet<ActionKey>,
    graph: RewindGraph,
    additional_actions: Vec<Arc<dyn Action>>,
    unchecked: VecDeque<(ActionKey, Arc<dyn Action>)>,
}

impl<'a> RewindGraphBuilder<'a> {
    #[must_use]
    pub fn new(
        root: ActionKey,
        engine: &'a dyn EvaluationEngine,
        diagnostics: &'a dyn DiagnosticSink,
    ) -> Self {
        let root = NodeKey::Action(root);
        Self {
            engine,
            diagnostics,
            graph: RewindGraph::rooted_at(root.clone()),
            root,
            lost_generators: HashSet::new(),
            additional_actions: Vec::new(),
            unchecked: VecDeque::new(),
        }
    }

    /// Generating actions of the lost inputs themselves, used to narrow
    /// owning tree artifacts down to the elements that were lost
    #[must_use]
    pub fn with_lost_generators(mut self, lost_generators: HashSet<ActionKey>) -> Self {
        self.lost_generators = lost_generators;
        self
    }

    /// Build the graph for `owning_deps`, the direct dependencies of the
    /// root responsible for its lost inputs
    ///
    /// # Errors
    /// - `MalformedRewindSubgraph` if a visited action reports an invalid subgraph
    /// - `UnknownAction` if the engine cannot resolve a visited action
    /// - `Interrupted` if an engine query is cancelled
    pub async fn build<I>(mut self, owning_deps: I) -> Result<BuiltRewindGraph, RewindError>
    where
        I: IntoIterator<Item = DerivedArtifact> + Send,
        I::IntoIter: Send,
    {
        for artifact in owning_deps {
            // Edges to the generating actions go in first so that a plain
            // file, keyed by its generating action, still counts as newly
            // visited.
            if self.visit_artifact(&artifact, true).await? {
                self.put_edge(self.root.clone(), artifact.node_key());
            }
        }

        while let Some((key, action)) = self.unchecked.pop_front() {
            self.check_action(&key, action.as_ref()).await?;
        }

        Ok(BuiltRewindGraph {
            graph: self.graph,
            additional_actions: self.additional_actions,
        })
    }

    /// Add `artifact -> generating action` edges and queue new actions
    ///
    /// Returns `false`, without touching the graph, if the generating actions
    /// are not ready; another rewind is then already restarting them.
    async fn visit_artifact(
        &mut self,
        artifact: &DerivedArtifact,
        narrow_to_lost: bool,
    ) -> Result<bool, RewindError> {
        let Some(actions) = self.generating_actions(artifact, narrow_to_lost).await? else {
            tracing::debug!(artifact = %artifact.exec_path(), "generating actions not done, skipping");
            return Ok(false);
        };

        let artifact_key = artifact.node_key();
        for (action_key, action) in actions {
            let action_node = NodeKey::Action(action_key.clone());
            if self.graph.add_node(action_node.clone()) {
                self.additional_actions.push(Arc::clone(&action));
                self.unchecked.push_back((action_key, action));
            }
            if artifact_key != action_node {
                self.put_edge(artifact_key.clone(), action_node);
            }
        }
        Ok(true)
    }

    async fn check_action(&mut self, key: &ActionKey, action: &dyn Action) -> Result<(), RewindError> {
        let mut artifacts: Vec<DerivedArtifact> = Vec::new();
        let mut actions: Vec<ActionKey> = Vec::new();

        if let Some(subgraph) = action.graph_aware_rewinding_subgraph(key) {
            self.merge_subgraph(key, &subgraph, &mut artifacts, &mut actions)?;
        }

        if action.is_insensitive_to_input_set() {
            self.add_propagated_inputs(key, action, &mut artifacts, &mut actions);
        }

        for action_key in actions {
            let resolved = self.resolve(&action_key).await?;
            self.additional_actions.push(Arc::clone(&resolved));
            self.unchecked.push_back((action_key, resolved));
        }
        for artifact in artifacts {
            self.visit_artifact(&artifact, false).await?;
        }
        Ok(())
    }

    fn merge_subgraph(
        &mut self,
        key: &ActionKey,
        subgraph: &RewindGraph,
        artifacts: &mut Vec<DerivedArtifact>,
        actions: &mut Vec<ActionKey>,
    ) -> Result<(), RewindError> {
        if subgraph.is_empty() {
            return Ok(());
        }
        validate_subgraph(subgraph, key).map_err(|violation| RewindError::MalformedRewindSubgraph {
            action: key.clone(),
            violation,
        })?;

        // Edges may come in any order, so either endpoint can be new. Plain
        // files named as artifact nodes collapse onto their generating action.
        for (source, target) in subgraph.edges() {
            let (source, target) = (source.canonical(), target.canonical());
            for node in [&source, &target] {
                if self.graph.add_node(node.clone()) {
                    match node {
                        NodeKey::Action(action_key) => actions.push(action_key.clone()),
                        NodeKey::Artifact(Artifact::Derived(derived)) => {
                            artifacts.push(derived.clone());
                        }
                        // rejected by validate_subgraph
                        NodeKey::Artifact(Artifact::Source(_)) => {}
                    }
                }
            }
            if source != target {
                self.put_edge(source, target);
            }
        }
        Ok(())
    }

    fn add_propagated_inputs(
        &mut self,
        key: &ActionKey,
        action: &dyn Action,
        artifacts: &mut Vec<DerivedArtifact>,
        actions: &mut Vec<ActionKey>,
    ) {
        let action_node = NodeKey::Action(key.clone());
        // All derived inputs restart, not only the ones behind the lost input.
        for input in action.direct_data_inputs() {
            let Artifact::Derived(derived) = input else {
                continue;
            };
            let input_key = derived.node_key();
            if self.graph.add_node(input_key.clone()) {
                match &input_key {
                    NodeKey::Action(action_key) => actions.push(action_key.clone()),
                    NodeKey::Artifact(_) => artifacts.push(derived),
                }
            }
            if input_key != action_node {
                self.put_edge(action_node.clone(), input_key);
            }
        }

        if action.has_dynamic_input_discovery() {
            self.diagnostics
                .report(&Anomaly::PropagatesAndDiscoversInputs(key.clone()));
        }
    }

    async fn generating_actions(
        &self,
        artifact: &DerivedArtifact,
        narrow_to_lost: bool,
    ) -> Result<Option<IndexMap<ActionKey, Arc<dyn Action>>>, RewindError> {
        let mut keys = match self.engine.generating_actions(artifact).await? {
            GeneratingActions::Ready(keys) => keys,
            GeneratingActions::NotReady => return Ok(None),
        };
        if narrow_to_lost && artifact.is_tree() {
            let lost: Vec<ActionKey> = keys
                .iter()
                .filter(|key| self.lost_generators.contains(*key))
                .cloned()
                .collect();
            if !lost.is_empty() {
                keys = lost;
            }
        }
        let mut actions = IndexMap::with_capacity(keys.len());
        for key in keys {
            let action = self.resolve(&key).await?;
            actions.insert(key, action);
        }
        Ok(Some(actions))
    }

    async fn resolve(&self, key: &ActionKey) -> Result<Arc<dyn Action>, RewindError> {
        self.engine
            .resolve_action(key)
            .await?
            .ok_or_else(|| RewindError::UnknownAction(key.clone()))
    }

    fn put_edge(&mut self, from: NodeKey, to: NodeKey) {
        // Callers never pass equal endpoints; a loop here would be a bug in
        // this module, and dropping the edge keeps the graph loop-free.
        if let Err(err) = self.graph.put_edge(from, to) {
            tracing::error!(error = %err, "dropping rewind graph self loop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{CollectingDiagnosticSink, InMemoryBuildGraph, StaticAction};
    use crate::engine::TracingDiagnosticSink;
    use rewind_graph::SourceArtifact;

    fn key(owner: &str) -> ActionKey {
        ActionKey::new(owner, 0)
    }

    fn node(owner: &str) -> NodeKey {
        NodeKey::Action(key(owner))
    }

    fn described(actions: &[Arc<dyn Action>]) -> Vec<String> {
        actions.iter().map(|a| a.describe()).collect()
    }

    /// Template `owner` producing `tree` from one expanded action per element
    fn template(engine: &mut InMemoryBuildGraph, owner: &str, tree: &DerivedArtifact, elements: u32) -> Vec<ActionKey> {
        engine.add_action(key(owner), StaticAction::new(owner));
        let keys: Vec<ActionKey> = (1..=elements).map(|i| ActionKey::new(owner, i)).collect();
        for k in &keys {
            engine.add_action(k.clone(), StaticAction::new(k.to_string()));
        }
        engine.expand_template(tree.clone(), keys.clone());
        keys
    }

    async fn build(
        engine: &InMemoryBuildGraph,
        lost_generators: HashSet<ActionKey>,
        deps: Vec<DerivedArtifact>,
    ) -> Result<BuiltRewindGraph, RewindError> {
        RewindGraphBuilder::new(key("//failed"), engine, &TracingDiagnosticSink)
            .with_lost_generators(lost_generators)
            .build(deps)
            .await
    }

    #[tokio::test]
    async fn plain_file_restarts_its_generating_action() {
        let mut engine = InMemoryBuildGraph::new();
        engine.add_action(key("//gen"), StaticAction::new("gen"));
        let out = DerivedArtifact::file("out/a", key("//gen"));

        let built = build(&engine, HashSet::new(), vec![out]).await.unwrap();

        assert_eq!(built.graph.node_count(), 2);
        assert!(built.graph.contains_edge(&node("//failed"), &node("//gen")));
        assert_eq!(described(&built.additional_actions), vec!["gen"]);
    }

    #[tokio::test]
    async fn shared_generating_action_restarts_once() {
        let mut engine = InMemoryBuildGraph::new();
        engine.add_action(key("//gen"), StaticAction::new("gen"));
        let a = DerivedArtifact::file("out/a", key("//gen"));
        let b = DerivedArtifact::file("out/b", key("//gen"));

        let built = build(&engine, HashSet::new(), vec![a, b]).await.unwrap();

        assert_eq!(built.graph.node_count(), 2);
        assert_eq!(built.additional_actions.len(), 1);
    }

    #[tokio::test]
    async fn tree_narrows_to_lost_elements() {
        let mut engine = InMemoryBuildGraph::new();
        let tree = DerivedArtifact::tree("out/t", key("//tmpl"));
        let elements = template(&mut engine, "//tmpl", &tree, 2);

        let built = build(&engine, HashSet::from([elements[0].clone()]), vec![tree.clone()])
            .await
            .unwrap();

        assert!(built.graph.contains_edge(&node("//failed"), &tree.node_key()));
        assert!(built.graph.contains_edge(&tree.node_key(), &NodeKey::Action(elements[0].clone())));
        assert!(!built.graph.contains(&NodeKey::Action(elements[1].clone())));
        assert!(!built.graph.contains(&node("//tmpl")));
        assert_eq!(described(&built.additional_actions), vec!["//tmpl#1"]);
    }

    #[tokio::test]
    async fn tree_without_matching_lost_element_restarts_all() {
        let mut engine = InMemoryBuildGraph::new();
        let tree = DerivedArtifact::tree("out/t", key("//tmpl"));
        template(&mut engine, "//tmpl", &tree, 3);

        let built = build(&engine, HashSet::new(), vec![tree]).await.unwrap();

        assert_eq!(built.additional_actions.len(), 3);
        assert_eq!(built.graph.node_count(), 5);
    }

    #[tokio::test]
    async fn non_template_tree_restarts_its_generating_action() {
        let mut engine = InMemoryBuildGraph::new();
        engine.add_action(key("//unzip"), StaticAction::new("unzip"));
        let tree = DerivedArtifact::tree("out/t", key("//unzip"));

        let built = build(&engine, HashSet::new(), vec![tree.clone()]).await.unwrap();

        assert!(built.graph.contains_edge(&tree.node_key(), &node("//unzip")));
        assert_eq!(described(&built.additional_actions), vec!["unzip"]);
    }

    #[tokio::test]
    async fn tree_with_unfinished_generator_is_skipped() {
        let mut engine = InMemoryBuildGraph::new();
        let tree = DerivedArtifact::tree("out/t", key("//tmpl"));
        template(&mut engine, "//tmpl", &tree, 2);
        engine.mark_not_done(node("//tmpl"));

        let built = build(&engine, HashSet::new(), vec![tree]).await.unwrap();

        assert_eq!(built.graph.node_count(), 1);
        assert!(built.additional_actions.is_empty());
    }

    #[tokio::test]
    async fn tree_with_pending_expansion_is_skipped() {
        let mut engine = InMemoryBuildGraph::new();
        engine.add_action(key("//tmpl"), StaticAction::new("tmpl"));
        let tree = DerivedArtifact::tree("out/t", key("//tmpl"));
        engine.pend_expansion(tree.clone());

        let built = build(&engine, HashSet::new(), vec![tree]).await.unwrap();

        assert_eq!(built.graph.node_count(), 1);
        assert!(built.additional_actions.is_empty());
    }

    #[tokio::test]
    async fn propagating_action_restarts_all_derived_inputs() {
        let mut engine = InMemoryBuildGraph::new();
        let x = DerivedArtifact::file("out/x", key("//x"));
        let tree = DerivedArtifact::tree("out/t", key("//tmpl"));
        let src = Artifact::from(SourceArtifact::new("src/m.txt"));
        engine.add_action(key("//x"), StaticAction::new("x"));
        template(&mut engine, "//tmpl", &tree, 2);
        engine.add_action(
            key("//middleman"),
            StaticAction::new("middleman")
                .with_inputs([src.clone(), x.into(), tree.clone().into()])
                .propagating(),
        );
        let m = DerivedArtifact::file("out/m", key("//middleman"));

        let built = build(&engine, HashSet::new(), vec![m]).await.unwrap();

        assert!(built.graph.contains_edge(&node("//middleman"), &node("//x")));
        assert!(built.graph.contains_edge(&node("//middleman"), &tree.node_key()));
        assert!(!built.graph.contains(&src.node_key()));
        assert_eq!(
            described(&built.additional_actions),
            vec!["middleman", "x", "//tmpl#1", "//tmpl#2"]
        );
        assert!(validate_subgraph(&built.graph, &key("//failed")).is_ok());
    }

    #[tokio::test]
    async fn propagating_action_that_discovers_inputs_files_anomaly() {
        let mut engine = InMemoryBuildGraph::new();
        engine.add_action(
            key("//middleman"),
            StaticAction::new("middleman").propagating().discovering_inputs(),
        );
        let diagnostics = CollectingDiagnosticSink::new();

        let built = RewindGraphBuilder::new(key("//failed"), &engine, &diagnostics)
            .build(vec![DerivedArtifact::file("out/m", key("//middleman"))])
            .await
            .unwrap();

        assert_eq!(built.additional_actions.len(), 1);
        let messages = diagnostics.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("//middleman#0"));
    }

    #[tokio::test]
    async fn graph_aware_subgraph_is_merged() {
        let mut engine = InMemoryBuildGraph::new();
        let h = DerivedArtifact::file("out/h", key("//h"));
        let mut subgraph = RewindGraph::rooted_at(key("//aware"));
        subgraph.put_edge(node("//aware"), h.node_key()).unwrap();
        engine.add_action(key("//aware"), StaticAction::new("aware").with_rewinding_subgraph(subgraph));
        engine.add_action(key("//h"), StaticAction::new("h"));

        let built = build(&engine, HashSet::new(), vec![DerivedArtifact::file("out/g", key("//aware"))])
            .await
            .unwrap();

        assert!(built.graph.contains_edge(&node("//aware"), &node("//h")));
        assert_eq!(described(&built.additional_actions), vec!["aware", "h"]);
    }

    #[tokio::test]
    async fn subgraph_plain_file_node_collapses_onto_generating_action() {
        let mut engine = InMemoryBuildGraph::new();
        let h = DerivedArtifact::file("out/h", key("//h"));
        let mut subgraph = RewindGraph::rooted_at(key("//aware"));
        subgraph
            .put_edge(node("//aware"), NodeKey::Artifact(Artifact::Derived(h)))
            .unwrap();
        engine.add_action(key("//aware"), StaticAction::new("aware").with_rewinding_subgraph(subgraph));
        engine.add_action(key("//h"), StaticAction::new("h"));

        let built = build(&engine, HashSet::new(), vec![DerivedArtifact::file("out/g", key("//aware"))])
            .await
            .unwrap();

        let nodes: Vec<&NodeKey> = built.graph.nodes().collect();
        assert_eq!(nodes, vec![&node("//failed"), &node("//aware"), &node("//h")]);
        assert!(built.graph.contains_edge(&node("//aware"), &node("//h")));
        assert_eq!(described(&built.additional_actions), vec!["aware", "h"]);
        assert!(validate_subgraph(&built.graph, &key("//failed")).is_ok());
    }

    #[tokio::test]
    async fn subgraph_edge_from_plain_file_to_its_generator_is_dropped() {
        let mut engine = InMemoryBuildGraph::new();
        let h = DerivedArtifact::file("out/h", key("//h"));
        let mut subgraph = RewindGraph::rooted_at(key("//aware"));
        subgraph
            .put_edge(node("//aware"), NodeKey::Artifact(Artifact::Derived(h)))
            .unwrap();
        subgraph
            .put_edge(
                NodeKey::Artifact(Artifact::Derived(DerivedArtifact::file("out/h", key("//h")))),
                node("//h"),
            )
            .unwrap();
        engine.add_action(key("//aware"), StaticAction::new("aware").with_rewinding_subgraph(subgraph));
        engine.add_action(key("//h"), StaticAction::new("h"));

        let built = build(&engine, HashSet::new(), vec![DerivedArtifact::file("out/g", key("//aware"))])
            .await
            .unwrap();

        assert_eq!(built.graph.node_count(), 3);
        assert_eq!(built.graph.edge_count(), 2);
        assert!(validate_subgraph(&built.graph, &key("//failed")).is_ok());
    }

    #[tokio::test]
    async fn malformed_subgraph_is_rejected() {
        let mut engine = InMemoryBuildGraph::new();
        let mut subgraph = RewindGraph::rooted_at(key("//aware"));
        subgraph.add_node(node("//detached"));
        engine.add_action(key("//aware"), StaticAction::new("aware").with_rewinding_subgraph(subgraph));

        let err = build(&engine, HashSet::new(), vec![DerivedArtifact::file("out/g", key("//aware"))])
            .await
            .unwrap_err();

        assert!(matches!(err, RewindError::MalformedRewindSubgraph { ref action, .. } if *action == key("//aware")));
        assert!(err.is_catastrophic());
    }

    #[tokio::test]
    async fn unknown_generating_action_is_an_error() {
        let engine = InMemoryBuildGraph::new();

        let err = build(&engine, HashSet::new(), vec![DerivedArtifact::file("out/a", key("//ghost"))])
            .await
            .unwrap_err();

        assert!(matches!(err, RewindError::UnknownAction(ref k) if *k == key("//ghost")));
    }

    #[tokio::test]
    async fn interrupted_engine_aborts_the_build() {
        let mut engine = InMemoryBuildGraph::new();
        engine.add_action(key("//gen"), StaticAction::new("gen"));
        engine.interrupt();

        let err = build(&engine, HashSet::new(), vec![DerivedArtifact::file("out/a", key("//gen"))])
            .await
            .unwrap_err();

        assert!(matches!(err, RewindError::Interrupted(_)));
    }
}
