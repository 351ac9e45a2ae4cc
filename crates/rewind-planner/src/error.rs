//! Error types for rewind planning
//!
//! Every [`RewindError`] fails the action that lost its inputs; none of
//! them is retryable. They differ in how far the failure escalates:
//! - `RepeatedLoss`: the failed action fails for good, the build continues
//! - `UnexpectedSourceArtifact`, `MalformedRewindSubgraph`, `UnknownAction`:
//!   engine or action bug; the build cannot be trusted to continue
//! - `Interrupted`: the planning call was cancelled
//!
//! Lost inputs that cannot be tied to a dependency, and artifacts whose
//! generating actions are not done yet, are not errors: they are logged and
//! skipped.

use crate::lost::LostInputsFailure;
use rewind_graph::{ActionKey, Artifact, InputDigest, SubgraphViolation};
use std::fmt;

/// Main rewind planning error type
#[derive(Debug, thiserror::Error)]
pub enum RewindError {
    /// The same input was lost by the same action too many times
    #[error(
        "lost input too many times (#{occurrences}) for the same action. \
         lostInput: {lost_input_path}, lostInput digest: {digest}, failedAction: {failed_action}"
    )]
    RepeatedLoss {
        failed_action: ActionKey,
        digest: InputDigest,
        lost_input_path: String,
        occurrences: u32,
        #[source]
        cause: LostInputsFailure,
    },

    /// A source artifact showed up where only derived artifacts can be
    #[error("unexpected source artifact as lost input{role}: {artifact} {failed_action}")]
    UnexpectedSourceArtifact {
        role: LostInputRole,
        artifact: Artifact,
        failed_action: ActionKey,
        #[source]
        cause: LostInputsFailure,
    },

    /// An action reported a rewinding subgraph that breaks graph invariants
    #[error("malformed rewinding graph from {action}: {violation}")]
    MalformedRewindSubgraph {
        action: ActionKey,
        #[source]
        violation: SubgraphViolation,
    },

    /// The evaluation engine does not know an action the graph refers to
    #[error("action {0} is not known to the evaluation engine")]
    UnknownAction(ActionKey),

    /// Cancelled while waiting on the evaluation engine
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl RewindError {
    /// Rewind planning errors never succeed on retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Whether the whole build, not just the failed action, must stop
    #[inline]
    #[must_use]
    pub fn is_catastrophic(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedSourceArtifact { .. }
                | Self::MalformedRewindSubgraph { .. }
                | Self::UnknownAction(_)
        )
    }

    /// Whether the error points at an engine bug that warrants a diagnostic
    #[inline]
    #[must_use]
    pub fn files_diagnostic(&self) -> bool {
        !matches!(self, Self::Interrupted(_))
    }
}

/// Position of an artifact in the lost input's ownership chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LostInputRole {
    /// The lost input itself
    Input,
    /// An artifact aggregating the lost input
    Owner,
    /// An artifact aggregating an owner of the lost input
    TransitiveOwner,
}

impl fmt::Display for LostInputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LostInputRole::Input => Ok(()),
            LostInputRole::Owner => f.write_str(" owner"),
            LostInputRole::TransitiveOwner => f.write_str(" transitive owner"),
        }
    }
}

/// Raised by collaborators when the planning call is cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted while waiting on the evaluation engine")]
pub struct Interrupted;

/// Non-fatal inconsistencies worth a diagnostic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Anomaly {
    /// Propagating and input-discovering actions are expected to be disjoint
    #[error("action insensitively propagates and discovers inputs. actionKey: {0}")]
    PropagatesAndDiscoversInputs(ActionKey),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lost::LostInputs;
    use rewind_graph::SourceArtifact;

    fn failure() -> LostInputsFailure {
        LostInputsFailure::new(ActionKey::new("//app:bin", 0), LostInputs::new())
    }

    #[test]
    fn source_artifact_message_names_role() {
        let err = RewindError::UnexpectedSourceArtifact {
            role: LostInputRole::TransitiveOwner,
            artifact: SourceArtifact::new("pkg/a.c").into(),
            failed_action: ActionKey::new("//app:bin", 0),
            cause: failure(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected source artifact as lost input transitive owner: [source]pkg/a.c //app:bin#0"
        );
        assert!(err.is_catastrophic());
        assert!(err.files_diagnostic());
    }

    #[test]
    fn classification() {
        let malformed = RewindError::MalformedRewindSubgraph {
            action: ActionKey::new("//a", 0),
            violation: SubgraphViolation::Cyclic,
        };
        assert!(malformed.is_catastrophic());
        assert!(!malformed.is_retryable());

        let interrupted = RewindError::from(Interrupted);
        assert!(!interrupted.files_diagnostic());
        assert!(!interrupted.is_catastrophic());
    }

    #[test]
    fn repeated_loss_keeps_cause() {
        use std::error::Error as _;
        let err = RewindError::RepeatedLoss {
            failed_action: ActionKey::new("//app:bin", 0),
            digest: InputDigest::new("d1"),
            lost_input_path: "out/x".into(),
            occurrences: 20,
            cause: failure(),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("(#20)"));
    }
}
