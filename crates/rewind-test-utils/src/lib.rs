//! Testing utilities for the rewind workspace
//!
//! Shared fixtures for building artifacts, lost-input failures and small
//! in-memory builds.

#![allow(missing_docs)]

use rewind_graph::{
    ActionInput, ActionKey, Artifact, DerivedArtifact, InputDigest, NodeKey, SourceArtifact,
};
use rewind_planner::test_harness::{InMemoryBuildGraph, StaticAction};
use rewind_planner::{Action, LostInputs, LostInputsFailure};
use std::collections::HashSet;
use std::sync::Arc;

/// Key of the only action of `owner`
pub fn action_key(owner: &str) -> ActionKey {
    ActionKey::new(owner, 0)
}

pub fn source(path: &str) -> Artifact {
    SourceArtifact::new(path).into()
}

/// Plain file generated by `owner`'s action
pub fn file(path: &str, owner: &str) -> DerivedArtifact {
    DerivedArtifact::file(path, action_key(owner))
}

/// Tree artifact generated by `owner`'s action
pub fn tree(path: &str, owner: &str) -> DerivedArtifact {
    DerivedArtifact::tree(path, action_key(owner))
}

/// Digest used for `input` throughout the fixtures
pub fn digest_of(input: &ActionInput) -> InputDigest {
    InputDigest::compute(input.exec_path().as_bytes())
}

pub fn lost<I>(inputs: I) -> LostInputs
where
    I: IntoIterator,
    I::Item: Into<ActionInput>,
{
    inputs
        .into_iter()
        .map(|input| {
            let input = input.into();
            (digest_of(&input), input)
        })
        .collect()
}

pub fn failure<I>(failed_owner: &str, inputs: I) -> LostInputsFailure
where
    I: IntoIterator,
    I::Item: Into<ActionInput>,
{
    LostInputsFailure::new(action_key(failed_owner), lost(inputs))
}

/// Graph keys of the given artifacts
pub fn deps(artifacts: &[Artifact]) -> HashSet<NodeKey> {
    artifacts.iter().map(Artifact::node_key).collect()
}

/// In-memory build assembled one action at a time
#[derive(Debug, Default)]
pub struct BuildFixture {
    pub graph: InMemoryBuildGraph,
}

impl BuildFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `owner`'s action reading `inputs`
    pub fn action(&mut self, owner: &str, inputs: &[Artifact]) -> &mut Self {
        self.graph.add_action(
            action_key(owner),
            StaticAction::new(owner).with_inputs(inputs.iter().cloned()),
        );
        self
    }

    /// Register an action that passes `inputs` through
    pub fn propagating_action(&mut self, owner: &str, inputs: &[Artifact]) -> &mut Self {
        self.graph.add_action(
            action_key(owner),
            StaticAction::new(owner)
                .with_inputs(inputs.iter().cloned())
                .propagating(),
        );
        self
    }

    /// Register a template `owner` producing `tree` through one expanded
    /// action per element, returning the element files
    pub fn template(&mut self, owner: &str, tree: &DerivedArtifact, elements: &[&str]) -> Vec<DerivedArtifact> {
        self.graph.add_action(action_key(owner), StaticAction::new(owner));
        let mut keys = Vec::new();
        let mut files = Vec::new();
        for (i, element) in elements.iter().enumerate() {
            let key = ActionKey::new(owner, i as u32 + 1);
            let element_file = DerivedArtifact::file(format!("{}/{element}", tree.exec_path()), key.clone());
            self.graph
                .add_action(key.clone(), StaticAction::new(format!("{owner}/{element}")));
            self.graph.add_owner(element_file.clone(), tree.clone());
            keys.push(key);
            files.push(element_file);
        }
        self.graph.expand_template(tree.clone(), keys);
        files
    }

    pub fn resolve(&self, owner: &str) -> Arc<dyn Action> {
        self.graph
            .action(&action_key(owner))
            .unwrap_or_else(|| panic!("no action registered for {owner}"))
    }
}
