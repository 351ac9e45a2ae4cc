//! Build graph node identities
//!
//! The node model is a closed set:
//! - [`ActionKey`]: one action invocation (owner label + index within the owner)
//! - [`Artifact`]: either a [`SourceArtifact`] or a [`DerivedArtifact`]
//! - [`NodeKey`]: a vertex of a rewind graph, either an action or an artifact
//!
//! A plain derived file has no vertex of its own: it is represented by the
//! key of the action that generates it. Tree and source artifacts are their
//! own vertices.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Identity of a single action invocation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionKey {
    owner: String,
    index: u32,
}

impl ActionKey {
    /// Create a key for the `index`-th action registered by `owner`
    #[inline]
    #[must_use]
    pub fn new(owner: impl Into<String>, index: u32) -> Self {
        Self {
            owner: owner.into(),
            index,
        }
    }

    /// Label of the target that owns the action
    #[inline]
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Position of the action among its owner's actions
    #[inline]
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Display for ActionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner, self.index)
    }
}

/// A pre-existing input file, never produced by any action
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceArtifact {
    exec_path: String,
}

impl SourceArtifact {
    /// A source file at `exec_path`
    #[inline]
    #[must_use]
    pub fn new(exec_path: impl Into<String>) -> Self {
        Self {
            exec_path: exec_path.into(),
        }
    }

    /// Path relative to the execution root
    #[inline]
    #[must_use]
    pub fn exec_path(&self) -> &str {
        &self.exec_path
    }
}

/// Shape of a derived artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DerivedKind {
    /// A single output file
    File,
    /// A directory of element files, possibly produced by a template expansion
    Tree,
}

/// An output produced by an action
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DerivedArtifact {
    exec_path: String,
    generating_action: ActionKey,
    kind: DerivedKind,
}

impl DerivedArtifact {
    /// A plain output file of `generating_action`
    #[inline]
    #[must_use]
    pub fn file(exec_path: impl Into<String>, generating_action: ActionKey) -> Self {
        Self {
            exec_path: exec_path.into(),
            generating_action,
            kind: DerivedKind::File,
        }
    }

    /// A tree output of `generating_action`
    ///
    /// When the tree is produced by a template, `generating_action` is the
    /// template action and the elements come from its expansion.
    #[inline]
    #[must_use]
    pub fn tree(exec_path: impl Into<String>, generating_action: ActionKey) -> Self {
        Self {
            exec_path: exec_path.into(),
            generating_action,
            kind: DerivedKind::Tree,
        }
    }

    /// Path relative to the execution root
    #[inline]
    #[must_use]
    pub fn exec_path(&self) -> &str {
        &self.exec_path
    }

    /// Action declared as producing this artifact
    #[inline]
    #[must_use]
    pub fn generating_action(&self) -> &ActionKey {
        &self.generating_action
    }

    /// Plain file or tree
    #[inline]
    #[must_use]
    pub fn kind(&self) -> DerivedKind {
        self.kind
    }

    /// Whether this is a tree artifact
    #[inline]
    #[must_use]
    pub fn is_tree(&self) -> bool {
        matches!(self.kind, DerivedKind::Tree)
    }

    /// Graph vertex standing for this artifact
    #[must_use]
    pub fn node_key(&self) -> NodeKey {
        match self.kind {
            DerivedKind::File => NodeKey::Action(self.generating_action.clone()),
            DerivedKind::Tree => NodeKey::Artifact(Artifact::Derived(self.clone())),
        }
    }
}

/// Any artifact of the build
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Artifact {
    Source(SourceArtifact),
    Derived(DerivedArtifact),
}

impl Artifact {
    #[inline]
    #[must_use]
    pub fn exec_path(&self) -> &str {
        match self {
            Artifact::Source(source) => source.exec_path(),
            Artifact::Derived(derived) => derived.exec_path(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_source(&self) -> bool {
        matches!(self, Artifact::Source(_))
    }

    #[inline]
    #[must_use]
    pub fn as_derived(&self) -> Option<&DerivedArtifact> {
        match self {
            Artifact::Source(_) => None,
            Artifact::Derived(derived) => Some(derived),
        }
    }

    /// Graph vertex standing for this artifact
    #[must_use]
    pub fn node_key(&self) -> NodeKey {
        match self {
            Artifact::Source(_) => NodeKey::Artifact(self.clone()),
            Artifact::Derived(derived) => derived.node_key(),
        }
    }
}

impl From<SourceArtifact> for Artifact {
    fn from(value: SourceArtifact) -> Self {
        Artifact::Source(value)
    }
}

impl From<DerivedArtifact> for Artifact {
    fn from(value: DerivedArtifact) -> Self {
        Artifact::Derived(value)
    }
}

impl Display for Artifact {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Source(source) => write!(f, "[source]{}", source.exec_path()),
            Artifact::Derived(derived) if derived.is_tree() => {
                write!(f, "[tree]{}", derived.exec_path())
            }
            Artifact::Derived(derived) => write!(f, "{}", derived.exec_path()),
        }
    }
}

/// Something an action reads during execution
///
/// Not every input is an artifact: elements of runfiles or filesets are
/// plain paths that only reach the action through an aggregating artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActionInput {
    Artifact(Artifact),
    File(String),
}

impl ActionInput {
    #[must_use]
    pub fn exec_path(&self) -> &str {
        match self {
            ActionInput::Artifact(artifact) => artifact.exec_path(),
            ActionInput::File(path) => path,
        }
    }

    #[must_use]
    pub fn as_artifact(&self) -> Option<&Artifact> {
        match self {
            ActionInput::Artifact(artifact) => Some(artifact),
            ActionInput::File(_) => None,
        }
    }
}

impl From<Artifact> for ActionInput {
    fn from(value: Artifact) -> Self {
        ActionInput::Artifact(value)
    }
}

impl From<DerivedArtifact> for ActionInput {
    fn from(value: DerivedArtifact) -> Self {
        ActionInput::Artifact(Artifact::Derived(value))
    }
}

impl From<SourceArtifact> for ActionInput {
    fn from(value: SourceArtifact) -> Self {
        ActionInput::Artifact(Artifact::Source(value))
    }
}

impl Display for ActionInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ActionInput::Artifact(artifact) => write!(f, "{artifact}"),
            ActionInput::File(path) => write!(f, "{path}"),
        }
    }
}

/// A vertex of a rewind graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKey {
    Action(ActionKey),
    Artifact(Artifact),
}

impl NodeKey {
    #[inline]
    #[must_use]
    pub fn as_action(&self) -> Option<&ActionKey> {
        match self {
            NodeKey::Action(key) => Some(key),
            NodeKey::Artifact(_) => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_action(&self) -> bool {
        matches!(self, NodeKey::Action(_))
    }

    /// The key rewind graphs use for this node
    ///
    /// A plain derived file written as an artifact node becomes its
    /// generating action, like [`DerivedArtifact::node_key`]. Every other
    /// key is already canonical.
    #[must_use]
    pub fn canonical(&self) -> NodeKey {
        match self {
            NodeKey::Artifact(Artifact::Derived(derived)) => derived.node_key(),
            other => other.clone(),
        }
    }
}

impl From<ActionKey> for NodeKey {
    fn from(value: ActionKey) -> Self {
        NodeKey::Action(value)
    }
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Action(key) => write!(f, "action:{key}"),
            NodeKey::Artifact(artifact) => write!(f, "artifact:{artifact}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_file_collapses_onto_generating_action() {
        let gen = ActionKey::new("//pkg:lib", 0);
        let out = DerivedArtifact::file("bazel-out/pkg/lib.o", gen.clone());

        assert_eq!(out.node_key(), NodeKey::Action(gen));
    }

    #[test]
    fn tree_is_its_own_node() {
        let gen = ActionKey::new("//pkg:gen", 2);
        let tree = DerivedArtifact::tree("bazel-out/pkg/srcs", gen);

        assert_eq!(
            tree.node_key(),
            NodeKey::Artifact(Artifact::Derived(tree.clone()))
        );
        assert!(tree.is_tree());
    }

    #[test]
    fn source_artifact_is_not_derived() {
        let src = Artifact::from(SourceArtifact::new("pkg/main.c"));
        assert!(src.is_source());
        assert!(src.as_derived().is_none());
        assert_eq!(src.to_string(), "[source]pkg/main.c");
    }

    #[test]
    fn plain_file_artifact_node_canonicalizes_to_action() {
        let gen = ActionKey::new("//pkg:h", 0);
        let file = DerivedArtifact::file("out/h", gen.clone());
        let tree = DerivedArtifact::tree("out/t", gen.clone());
        let source = Artifact::from(SourceArtifact::new("pkg/h.c"));

        assert_eq!(
            NodeKey::Artifact(Artifact::Derived(file)).canonical(),
            NodeKey::Action(gen.clone())
        );
        assert_eq!(tree.node_key().canonical(), tree.node_key());
        assert_eq!(source.node_key().canonical(), source.node_key());
        assert_eq!(NodeKey::Action(gen.clone()).canonical(), NodeKey::Action(gen));
    }

    #[test]
    fn keys_survive_json() {
        let tree = DerivedArtifact::tree("out/t", ActionKey::new("//pkg:gen", 1));
        let input = ActionInput::from(tree.clone());
        let node = tree.node_key();

        let json = serde_json::to_string(&input).unwrap();
        assert_eq!(serde_json::from_str::<ActionInput>(&json).unwrap(), input);
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(serde_json::from_str::<NodeKey>(&json).unwrap(), node);
        let json = serde_json::to_value(ActionKey::new("//pkg:gen", 1)).unwrap();
        assert_eq!(json["owner"], "//pkg:gen");
        assert_eq!(json["index"], 1);
    }

    #[test]
    fn action_key_display() {
        assert_eq!(ActionKey::new("//a:b", 3).to_string(), "//a:b#3");
    }
}
