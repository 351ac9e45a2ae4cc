//! Collaborator interfaces
//!
//! The planner does not execute anything itself. It queries:
//! - [`EvaluationEngine`]: node completion, generating actions, action lookup
//! - [`OwnershipIndex`]: which artifacts aggregate a given input
//! - [`Action`]: the metadata rewinding needs about each action it visits
//!
//! and emits to:
//! - [`ReportSink`]: the end-of-build rewinding summary
//! - [`DiagnosticSink`]: internal-consistency violations
//!
//! Engine queries may wait on other in-flight evaluation. They return
//! [`Interrupted`] when cancelled, which aborts the whole planning call.

use crate::error::Interrupted;
use crate::stats::RewindingReport;
use async_trait::async_trait;
use rewind_graph::{ActionInput, ActionKey, Artifact, DerivedArtifact, NodeKey, RewindGraph};
use std::fmt;
use std::sync::Arc;

/// An action as seen by rewinding
pub trait Action: fmt::Debug + Send + Sync {
    /// Inputs the action declares
    fn direct_data_inputs(&self) -> Vec<Artifact>;

    /// Whether the action's outputs merely pass its inputs along, so that
    /// rerunning it alone cannot recreate a lost input
    fn is_insensitive_to_input_set(&self) -> bool {
        false
    }

    /// Whether the action discovers additional inputs while executing
    fn has_dynamic_input_discovery(&self) -> bool {
        false
    }

    /// Extra graph structure to restart with this action, rooted at `self_key`
    ///
    /// `None` for actions that depend only on their declared inputs.
    fn graph_aware_rewinding_subgraph(&self, _self_key: &ActionKey) -> Option<RewindGraph> {
        None
    }

    /// Short human-readable description for reports
    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

/// Generating actions of an artifact, if they can be known yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratingActions {
    Ready(Vec<ActionKey>),
    /// Some dependency is still being computed, likely by another rewind
    NotReady,
}

/// State of a tree artifact's template expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateExpansion {
    /// The tree is produced directly by its generating action
    NotTemplate,
    NotReady,
    /// The tree is produced by these per-element actions
    Expanded(Vec<ActionKey>),
}

/// The incremental evaluation engine executing the build graph
#[async_trait]
pub trait EvaluationEngine: Send + Sync {
    /// Whether `node` has finished evaluating
    async fn is_done(&self, node: &NodeKey) -> Result<bool, Interrupted>;

    /// Expansion of a tree artifact's generating template, if any
    async fn template_expansion(
        &self,
        tree: &DerivedArtifact,
    ) -> Result<TemplateExpansion, Interrupted>;

    /// Look up the action object for `key`; `None` if the engine does not know it
    async fn resolve_action(&self, key: &ActionKey)
        -> Result<Option<Arc<dyn Action>>, Interrupted>;

    /// Actions that must rerun to regenerate `artifact`
    ///
    /// A plain file has exactly its generating action. A tree waits for its
    /// generating action and, when that is a template, resolves to the
    /// expanded per-element actions; the template itself never reruns.
    async fn generating_actions(
        &self,
        artifact: &DerivedArtifact,
    ) -> Result<GeneratingActions, Interrupted> {
        let generating = artifact.generating_action();
        if !artifact.is_tree() {
            return Ok(GeneratingActions::Ready(vec![generating.clone()]));
        }
        if !self.is_done(&NodeKey::Action(generating.clone())).await? {
            return Ok(GeneratingActions::NotReady);
        }
        Ok(match self.template_expansion(artifact).await? {
            TemplateExpansion::NotTemplate => GeneratingActions::Ready(vec![generating.clone()]),
            TemplateExpansion::NotReady => GeneratingActions::NotReady,
            TemplateExpansion::Expanded(keys) => GeneratingActions::Ready(keys),
        })
    }
}

/// Index of input aggregation (trees, filesets, middlemen)
pub trait OwnershipIndex: Send + Sync {
    /// Artifacts directly aggregating `input`; empty when none
    fn owners(&self, input: &ActionInput) -> Vec<Artifact>;
}

/// Receiver of the end-of-build rewinding summary
pub trait ReportSink: Send + Sync {
    fn post(&self, report: &RewindingReport);
}

/// Receiver of internal-consistency violations
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, error: &(dyn std::error::Error + Send + Sync));
}

/// Diagnostic sink that logs at error level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnosticSink;

impl DiagnosticSink for TracingDiagnosticSink {
    fn report(&self, error: &(dyn std::error::Error + Send + Sync)) {
        tracing::error!(error = %error, "rewinding diagnostic");
    }
}
