//! In-memory collaborators for tests and simulation
//!
//! [`InMemoryBuildGraph`] plays both the evaluation engine and the ownership
//! index over an explicitly declared build. Everything is done unless marked
//! otherwise.

pub mod simulator;

pub use simulator::{run_simulator, SimulatorConfig, SimulatorReport, SimulatorStats, Violation};

use crate::engine::{
    Action, DiagnosticSink, EvaluationEngine, OwnershipIndex, ReportSink, TemplateExpansion,
};
use crate::error::Interrupted;
use crate::stats::RewindingReport;
use async_trait::async_trait;
use parking_lot::Mutex;
use rewind_graph::{ActionInput, ActionKey, Artifact, DerivedArtifact, NodeKey, RewindGraph};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Action with fixed rewinding metadata
#[derive(Debug, Clone, Default)]
pub struct StaticAction {
    name: String,
    inputs: Vec<Artifact>,
    propagates_inputs: bool,
    discovers_inputs: bool,
    subgraph: Option<RewindGraph>,
}

impl StaticAction {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = Artifact>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    /// Mark as insensitive to its input set
    #[must_use]
    pub fn propagating(mut self) -> Self {
        self.propagates_inputs = true;
        self
    }

    #[must_use]
    pub fn discovering_inputs(mut self) -> Self {
        self.discovers_inputs = true;
        self
    }

    /// Make the action graph-aware with this rewinding subgraph
    #[must_use]
    pub fn with_rewinding_subgraph(mut self, subgraph: RewindGraph) -> Self {
        self.subgraph = Some(subgraph);
        self
    }

    #[must_use]
    pub fn into_arc(self) -> Arc<dyn Action> {
        Arc::new(self)
    }
}

impl Action for StaticAction {
    fn direct_data_inputs(&self) -> Vec<Artifact> {
        self.inputs.clone()
    }

    fn is_insensitive_to_input_set(&self) -> bool {
        self.propagates_inputs
    }

    fn has_dynamic_input_discovery(&self) -> bool {
        self.discovers_inputs
    }

    fn graph_aware_rewinding_subgraph(&self, _self_key: &ActionKey) -> Option<RewindGraph> {
        self.subgraph.clone()
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Build graph held in memory
#[derive(Debug, Default)]
pub struct InMemoryBuildGraph {
    actions: HashMap<ActionKey, Arc<dyn Action>>,
    owners: HashMap<ActionInput, Vec<Artifact>>,
    expansions: HashMap<DerivedArtifact, Vec<ActionKey>>,
    pending_expansions: HashSet<DerivedArtifact>,
    not_done: HashSet<NodeKey>,
    interrupted: AtomicBool,
    queries: AtomicUsize,
}

impl InMemoryBuildGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(&mut self, key: ActionKey, action: impl Action + 'static) -> &mut Self {
        self.actions.insert(key, Arc::new(action));
        self
    }

    #[must_use]
    pub fn action(&self, key: &ActionKey) -> Option<Arc<dyn Action>> {
        self.actions.get(key).cloned()
    }

    /// Declare that `owner` aggregates `input`
    pub fn add_owner(&mut self, input: impl Into<ActionInput>, owner: impl Into<Artifact>) -> &mut Self {
        self.owners.entry(input.into()).or_default().push(owner.into());
        self
    }

    /// Declare `tree` as produced by a template expanded into `elements`
    pub fn expand_template(&mut self, tree: DerivedArtifact, elements: Vec<ActionKey>) -> &mut Self {
        self.expansions.insert(tree, elements);
        self
    }

    /// Declare `tree` as produced by a template whose expansion is still running
    pub fn pend_expansion(&mut self, tree: DerivedArtifact) -> &mut Self {
        self.pending_expansions.insert(tree);
        self
    }

    pub fn mark_not_done(&mut self, node: NodeKey) -> &mut Self {
        self.not_done.insert(node);
        self
    }

    /// Make every subsequent engine query fail with [`Interrupted`]
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Number of engine queries answered so far
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    fn enter(&self) -> Result<(), Interrupted> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(Interrupted);
        }
        Ok(())
    }
}

#[async_trait]
impl EvaluationEngine for InMemoryBuildGraph {
    async fn is_done(&self, node: &NodeKey) -> Result<bool, Interrupted> {
        self.enter()?;
        Ok(!self.not_done.contains(node))
    }

    async fn template_expansion(
        &self,
        tree: &DerivedArtifact,
    ) -> Result<TemplateExpansion, Interrupted> {
        self.enter()?;
        if self.pending_expansions.contains(tree) {
            return Ok(TemplateExpansion::NotReady);
        }
        Ok(match self.expansions.get(tree) {
            Some(keys) => TemplateExpansion::Expanded(keys.clone()),
            None => TemplateExpansion::NotTemplate,
        })
    }

    async fn resolve_action(
        &self,
        key: &ActionKey,
    ) -> Result<Option<Arc<dyn Action>>, Interrupted> {
        self.enter()?;
        Ok(self.actions.get(key).cloned())
    }
}

impl OwnershipIndex for InMemoryBuildGraph {
    fn owners(&self, input: &ActionInput) -> Vec<Artifact> {
        self.owners.get(input).cloned().unwrap_or_default()
    }
}

/// Report sink keeping everything it receives
#[derive(Debug, Default)]
pub struct CollectingReportSink {
    reports: Mutex<Vec<RewindingReport>>,
}

impl CollectingReportSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reports(&self) -> Vec<RewindingReport> {
        self.reports.lock().clone()
    }
}

impl ReportSink for CollectingReportSink {
    fn post(&self, report: &RewindingReport) {
        self.reports.lock().push(report.clone());
    }
}

/// Diagnostic sink keeping rendered messages
#[derive(Debug, Default)]
pub struct CollectingDiagnosticSink {
    messages: Mutex<Vec<String>>,
}

impl CollectingDiagnosticSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl DiagnosticSink for CollectingDiagnosticSink {
    fn report(&self, error: &(dyn std::error::Error + Send + Sync)) {
        self.messages.lock().push(error.to_string());
    }
}
