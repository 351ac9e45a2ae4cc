//! Rewind planner
//!
//! Entry point for an action that failed because some of its inputs were
//! lost. One [`RewindPlanner`] lives for one build and is shared by every
//! concurrently failing action:
//! 1. the [`Ledger`] counts the loss and rejects pathological repeats
//! 2. ownership resolution maps lost inputs to the failed action's direct deps
//! 3. the [`RewindGraphBuilder`] expands those deps into a [`RewindGraph`]
//! 4. plan statistics are kept for the end-of-build report
//!
//! [`RewindPlanner::reset`] must only run once no planning call is in flight.

use crate::builder::RewindGraphBuilder;
use crate::config::RewindConfig;
use crate::engine::{Action, DiagnosticSink, EvaluationEngine, OwnershipIndex, ReportSink, TracingDiagnosticSink};
use crate::error::RewindError;
use crate::ledger::{Ledger, LostInputRecord};
use crate::lost::LostInputsFailure;
use crate::ownership::resolve_owning_deps;
use crate::stats::{rewinding_report, RewindPlanStats, StatsRecorder};
use rewind_graph::{ActionKey, NodeKey, RewindGraph};
use std::collections::HashSet;
use std::sync::Arc;

/// Nodes and actions to restart for one lost-inputs failure
#[derive(Debug)]
pub struct RewindPlan {
    graph: RewindGraph,
    additional_actions_to_restart: Vec<Arc<dyn Action>>,
}

impl RewindPlan {
    /// Graph rooted at the failed action
    #[inline]
    #[must_use]
    pub fn graph(&self) -> &RewindGraph {
        &self.graph
    }

    /// Actions whose cached results must be evicted, excluding the failed action
    #[inline]
    #[must_use]
    pub fn additional_actions_to_restart(&self) -> &[Arc<dyn Action>] {
        &self.additional_actions_to_restart
    }

    #[must_use]
    pub fn into_parts(self) -> (RewindGraph, Vec<Arc<dyn Action>>) {
        (self.graph, self.additional_actions_to_restart)
    }
}

/// Per-build rewind planning context
pub struct RewindPlanner {
    config: RewindConfig,
    ledger: Ledger,
    stats: StatsRecorder,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl std::fmt::Debug for RewindPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewindPlanner")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl RewindPlanner {
    /// Create a planner that logs diagnostics through `tracing`
    #[must_use]
    pub fn new(config: RewindConfig) -> Self {
        Self::with_diagnostics(config, Arc::new(TracingDiagnosticSink))
    }

    #[must_use]
    pub fn with_diagnostics(config: RewindConfig, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            ledger: Ledger::new(config.max_repeated_lost_inputs),
            stats: StatsRecorder::new(),
            config,
            diagnostics,
        }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &RewindConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Number of plans recorded since the last reset
    #[inline]
    #[must_use]
    pub fn recorded_plans(&self) -> usize {
        self.stats.len()
    }

    /// Compute the plan that regenerates the inputs lost by `failure`
    ///
    /// `direct_deps` are the graph keys the failed action depends on
    /// directly. The returned graph is rooted at the failed action, and the
    /// additional actions never include it.
    ///
    /// # Errors
    /// - `RepeatedLoss` if any lost input reached the repeat limit
    /// - `UnexpectedSourceArtifact` if a source artifact appears in an ownership chain
    /// - `MalformedRewindSubgraph` / `UnknownAction` on engine or action bugs
    /// - `Interrupted` if an engine query was cancelled; nothing is recorded
    pub async fn compute_rewind_plan(
        &self,
        failed_action: &Arc<dyn Action>,
        direct_deps: &HashSet<NodeKey>,
        failure: &LostInputsFailure,
        owners: &dyn OwnershipIndex,
        engine: &dyn EvaluationEngine,
    ) -> Result<RewindPlan, RewindError> {
        let failed_key = &failure.failed_action;
        let records = self.check_repeated_losses(failure)?;

        let owning_deps = resolve_owning_deps(&failure.lost_inputs, direct_deps, owners).map_err(
            |unexpected| {
                self.file(RewindError::UnexpectedSourceArtifact {
                    role: unexpected.role,
                    artifact: unexpected.artifact,
                    failed_action: failed_key.clone(),
                    cause: failure.clone(),
                })
            },
        )?;

        let lost_generators: HashSet<ActionKey> = failure
            .lost_inputs
            .inputs()
            .filter_map(|input| input.as_artifact()?.as_derived())
            .map(|derived| derived.generating_action().clone())
            .collect();

        let built = RewindGraphBuilder::new(failed_key.clone(), engine, self.diagnostics.as_ref())
            .with_lost_generators(lost_generators)
            .build(owning_deps)
            .await
            .map_err(|err| {
                if err.files_diagnostic() {
                    self.file(err)
                } else {
                    err
                }
            })?;

        tracing::debug!(
            failed_action = %failed_key,
            invalidated_nodes = built.graph.node_count(),
            additional_actions = built.additional_actions.len(),
            "computed rewind plan"
        );

        let sample = records
            .iter()
            .take(self.config.max_lost_inputs_recorded)
            .cloned()
            .collect();
        self.stats.record(RewindPlanStats {
            failed_action_key: failed_key.clone(),
            failed_action: Arc::clone(failed_action),
            invalidated_nodes_count: built.graph.node_count(),
            lost_input_records_count: records.len(),
            sample_lost_input_records: sample,
        });

        Ok(RewindPlan {
            graph: built.graph,
            additional_actions_to_restart: built.additional_actions,
        })
    }

    /// Forget all losses and plans, then post the end-of-build report
    pub fn reset(&self, sink: &dyn ReportSink) {
        let top = self.stats.drain_top(self.config.max_action_rewind_events);
        let report = rewinding_report(self.ledger.reset(), &top);
        sink.post(&report);
    }

    /// Record every lost input of this failure, failing on the first one
    /// that has been lost too often
    fn check_repeated_losses(
        &self,
        failure: &LostInputsFailure,
    ) -> Result<Vec<LostInputRecord>, RewindError> {
        let mut records = Vec::with_capacity(failure.lost_inputs.len());
        for (digest, input) in failure.lost_inputs.iter() {
            // The action should have waited for the lost input's generating
            // action to rerun, so a repeat suggests non-topological
            // invalidation. Only a persistent repeat fails the action.
            let record = LostInputRecord::new(
                failure.failed_action.clone(),
                digest.clone(),
                input.exec_path(),
            );
            let occurrences = self.ledger.record_loss(&record);
            if self.ledger.threshold_exceeded(occurrences) {
                return Err(self.file(RewindError::RepeatedLoss {
                    failed_action: failure.failed_action.clone(),
                    digest: digest.clone(),
                    lost_input_path: record.path,
                    occurrences,
                    cause: failure.clone(),
                }));
            } else if occurrences > 1 {
                tracing::info!(
                    occurrences,
                    lost_input = %input,
                    digest = %digest,
                    failed_action = %failure.failed_action,
                    "lost input again for the same action"
                );
            }
            records.push(record);
        }
        Ok(records)
    }

    fn file(&self, err: RewindError) -> RewindError {
        self.diagnostics.report(&err);
        err
    }
}
