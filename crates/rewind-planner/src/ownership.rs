//! Lost input ownership resolution
//!
//! A failed action usually does not depend on a lost input directly. The
//! input may be an element of a tree artifact, fileset or middleman, and that
//! aggregate may itself sit inside another aggregate. Rewinding has to
//! restart every direct dependency through which the lost input reached the
//! action, not only the closest one: intermediate nodes off the shortest
//! path may still hold values computed from the lost output.

use crate::engine::OwnershipIndex;
use crate::error::LostInputRole;
use crate::lost::LostInputs;
use indexmap::IndexSet;
use rewind_graph::{ActionInput, Artifact, DerivedArtifact, NodeKey};
use std::collections::HashSet;

/// A source artifact found in a lost input's ownership chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnexpectedSource {
    pub role: LostInputRole,
    pub artifact: Artifact,
}

/// Direct dependencies of the failed action responsible for the lost inputs
///
/// Looks at most two aggregation levels above each lost input. Inputs that
/// cannot be tied to any direct dependency are dropped with a warning: the
/// loss happened inside the failed action's own execution, and rerunning that
/// action alone may already recreate them.
///
/// # Errors
/// [`UnexpectedSource`] when the lost input, an owner or a transitive owner
/// under consideration is a source artifact.
pub fn resolve_owning_deps(
    lost_inputs: &LostInputs,
    direct_deps: &HashSet<NodeKey>,
    index: &dyn OwnershipIndex,
) -> Result<IndexSet<DerivedArtifact>, UnexpectedSource> {
    let mut owning_deps = IndexSet::new();

    for lost_input in lost_inputs.inputs() {
        if let Some(artifact) = lost_input.as_artifact() {
            if direct_deps.contains(&artifact.node_key()) {
                let derived = check_derived(artifact, LostInputRole::Input)?;
                owning_deps.insert(derived.clone());
                continue;
            }
        }

        let mut found = false;
        let owners = index.owners(lost_input);
        for owner in &owners {
            let owner_derived = check_derived(owner, LostInputRole::Owner)?;

            // e.g. a tree artifact inside a middleman the action depends on
            for transitive in index.owners(&ActionInput::Artifact(owner.clone())) {
                let transitive_derived = check_derived(&transitive, LostInputRole::TransitiveOwner)?;
                if direct_deps.contains(&transitive.node_key()) {
                    owning_deps.insert(transitive_derived.clone());
                    found = true;
                }
            }

            if direct_deps.contains(&owner.node_key()) {
                owning_deps.insert(owner_derived.clone());
                found = true;
            }
        }

        if !found {
            tracing::warn!(
                lost_input = %lost_input,
                owners = ?owners,
                "lostInput not a dep of the failed action, and can't be associated with such a dep"
            );
        }
    }

    Ok(owning_deps)
}

fn check_derived(artifact: &Artifact, role: LostInputRole) -> Result<&DerivedArtifact, UnexpectedSource> {
    match artifact {
        Artifact::Derived(derived) => Ok(derived),
        Artifact::Source(_) => Err(UnexpectedSource {
            role,
            artifact: artifact.clone(),
        }),
    }
}
