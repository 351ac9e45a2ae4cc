//! Error types for rewind graphs

use crate::key::{Artifact, NodeKey};

/// Edge-level graph errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Edge from a node to itself in a loop-free graph
    #[error("self loop on {node}")]
    SelfLoop { node: NodeKey },
}

/// Ways an action-supplied rewinding subgraph can be malformed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubgraphViolation {
    #[error("rewinding graph is undirected")]
    Undirected,

    #[error("rewinding graph allows self loops")]
    AllowsSelfLoops,

    #[error("rewinding graph does not contain its action root {root}")]
    MissingRoot { root: NodeKey },

    /// Nodes exist that forward traversal from the root never reaches
    #[error("rewinding graph has {} node(s) unreachable from its action root", unreachable.len())]
    Unreachable { unreachable: Vec<NodeKey> },

    #[error("rewinding graph contains a cycle")]
    Cyclic,

    #[error("rewinding graph contains source artifact {artifact}")]
    SourceArtifactTarget { artifact: Artifact },

    #[error("rewinding graph contains non-derived artifact node {artifact}")]
    NonDerivedArtifact { artifact: Artifact },
}
