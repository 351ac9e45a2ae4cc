//! Rewind graph model
//!
//! Node identities for actions and artifacts of an incremental build, the
//! [`RewindGraph`] recording which nodes must be restarted to regenerate a
//! lost input, and [`validate_subgraph`] for rewinding graphs reported by
//! actions themselves.
//!
//! # Example
//!
//! ```rust
//! use rewind_graph::{ActionKey, DerivedArtifact, NodeKey, RewindGraph};
//!
//! let failed = ActionKey::new("//app:bin", 0);
//! let tree = DerivedArtifact::tree("out/app/gen", ActionKey::new("//app:gen", 0));
//!
//! let mut graph = RewindGraph::rooted_at(failed.clone());
//! graph.put_edge(NodeKey::Action(failed), tree.node_key()).unwrap();
//! assert_eq!(graph.node_count(), 2);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod digest;
mod error;
mod graph;
mod key;
mod validate;

pub use digest::InputDigest;
pub use error::{GraphError, SubgraphViolation};
pub use graph::{GraphProperties, RewindGraph};
pub use key::{
    ActionInput, ActionKey, Artifact, DerivedArtifact, DerivedKind, NodeKey, SourceArtifact,
};
pub use validate::validate_subgraph;
