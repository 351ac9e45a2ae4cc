//! Rewind simulator
//!
//! Generates random layered builds from a seed, loses inputs of actions in
//! the last layer, and checks every plan the planner produces:
//! - the graph is rooted at the failed action and passes `validate_subgraph`
//! - additional actions are exactly the graph's other action nodes
//! - the lost input's generating action is restarted
//! - repeated losses fail exactly at the configured limit
//! - the end-of-build report keeps the largest plans, largest first

use super::{CollectingReportSink, InMemoryBuildGraph, StaticAction};
use crate::config::RewindConfig;
use crate::engine::Action;
use crate::error::RewindError;
use crate::ledger::LostInputRecord;
use crate::lost::{LostInputs, LostInputsFailure};
use crate::planner::{RewindPlan, RewindPlanner};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rewind_graph::{
    validate_subgraph, ActionInput, ActionKey, Artifact, DerivedArtifact, InputDigest, NodeKey,
    RewindGraph, SourceArtifact,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    pub builds: u64,
    /// Lost-input failures injected per build
    pub losses_per_build: u64,
    pub layers: usize,
    pub actions_per_layer: usize,
    pub stop_on_first_violation: bool,
    pub rewind: RewindConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            builds: 50,
            losses_per_build: 8,
            layers: 5,
            actions_per_layer: 6,
            stop_on_first_violation: false,
            rewind: RewindConfig::default(),
        }
    }
}

/// A broken expectation found during simulation
#[derive(Debug, Clone, Serialize)]
pub enum Violation {
    InvalidGraph {
        build: u64,
        failed_action: String,
        reason: String,
    },
    AdditionalActionsMismatch {
        build: u64,
        failed_action: String,
        action_nodes: usize,
        additional_actions: usize,
    },
    GeneratorNotRestarted {
        build: u64,
        failed_action: String,
        generator: String,
    },
    UnexpectedError {
        build: u64,
        error: String,
    },
    RepeatedLossThreshold {
        build: u64,
        expected: u32,
        actual: u32,
    },
    ReportMismatch {
        build: u64,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    pub builds: u64,
    pub plans_computed: u64,
    pub nodes_invalidated: u64,
    pub actions_restarted: u64,
    pub repeated_loss_failures: u64,
    pub reports_posted: u64,
}

/// Final report from simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub stats: SimulatorStats,
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut text = String::new();
        text.push_str("Rewind Simulator Report\n");
        text.push_str("=======================\n");
        text.push_str(&format!("Seed: {}\n", self.config.seed));
        text.push_str(&format!("Builds: {}\n", self.stats.builds));
        text.push_str(&format!("Plans computed: {}\n", self.stats.plans_computed));
        text.push_str(&format!("Nodes invalidated: {}\n", self.stats.nodes_invalidated));
        text.push_str(&format!("Actions restarted: {}\n", self.stats.actions_restarted));
        text.push_str(&format!(
            "Repeated loss failures: {}\n",
            self.stats.repeated_loss_failures
        ));
        text.push_str(&format!("Reports posted: {}\n", self.stats.reports_posted));
        text.push_str(&format!("Violations: {}\n", self.violations.len()));
        for violation in &self.violations {
            text.push_str(&format!("  - {violation:?}\n"));
        }
        text.push_str(&format!(
            "Status: {}\n",
            if self.passed() { "PASSED" } else { "FAILED" }
        ));
        text
    }
}

/// An output visible to later layers
#[derive(Debug, Clone)]
struct Output {
    artifact: DerivedArtifact,
    /// Element files of a template-expanded tree
    elements: Vec<DerivedArtifact>,
}

#[derive(Debug, Clone)]
struct SimAction {
    key: ActionKey,
    inputs: Vec<Artifact>,
    /// Derived inputs with their elements, for picking lost inputs
    derived_inputs: Vec<Output>,
}

struct SimBuild {
    graph: InMemoryBuildGraph,
    last_layer: Vec<SimAction>,
}

fn generate_build(rng: &mut StdRng, build: u64, config: &SimulatorConfig) -> SimBuild {
    let mut graph = InMemoryBuildGraph::new();
    let mut outputs: Vec<Output> = Vec::new();
    let mut last_layer = Vec::new();

    for layer in 0..config.layers {
        let mut layer_outputs = Vec::new();
        let mut layer_actions = Vec::new();

        for slot in 0..config.actions_per_layer {
            let owner = format!("//sim/b{build}/l{layer}:a{slot}");
            let key = ActionKey::new(owner.clone(), 0);
            let source = Artifact::from(SourceArtifact::new(format!("src/l{layer}/a{slot}.in")));

            let mut derived_inputs: Vec<Output> = Vec::new();
            if !outputs.is_empty() {
                let wanted = rng.gen_range(1..=3).min(outputs.len());
                derived_inputs = outputs.choose_multiple(rng, wanted).cloned().collect();
            }
            let mut inputs = vec![source];
            inputs.extend(derived_inputs.iter().map(|o| Artifact::from(o.artifact.clone())));

            let mut action = StaticAction::new(owner.clone()).with_inputs(inputs.clone());
            if layer > 0 && rng.gen_bool(0.15) {
                action = action.propagating();
            }
            if let Some(target) = derived_inputs.first().filter(|_| rng.gen_bool(0.1)) {
                let mut subgraph = RewindGraph::rooted_at(key.clone());
                subgraph
                    .put_edge(NodeKey::Action(key.clone()), target.artifact.node_key())
                    .ok();
                action = action.with_rewinding_subgraph(subgraph);
            }

            let out_path = format!("out/l{layer}/a{slot}");
            if rng.gen_bool(0.2) {
                let tree = DerivedArtifact::tree(out_path.clone(), key.clone());
                let count = rng.gen_range(1..=3u32);
                let mut element_keys = Vec::new();
                let mut elements = Vec::new();
                for e in 1..=count {
                    let element_key = ActionKey::new(owner.clone(), e);
                    let element = DerivedArtifact::file(format!("{out_path}/e{e}"), element_key.clone());
                    graph.add_action(
                        element_key.clone(),
                        StaticAction::new(format!("{owner}/e{e}")).with_inputs(inputs.clone()),
                    );
                    graph.add_owner(element.clone(), tree.clone());
                    element_keys.push(element_key);
                    elements.push(element);
                }
                graph.expand_template(tree.clone(), element_keys);
                layer_outputs.push(Output {
                    artifact: tree,
                    elements,
                });
            } else {
                layer_outputs.push(Output {
                    artifact: DerivedArtifact::file(out_path, key.clone()),
                    elements: Vec::new(),
                });
            }

            graph.add_action(key.clone(), action);
            layer_actions.push(SimAction {
                key,
                inputs,
                derived_inputs,
            });
        }

        outputs.extend(layer_outputs);
        last_layer = layer_actions;
    }

    SimBuild { graph, last_layer }
}

/// Pick a failed action and one lost input for it
fn pick_failure(rng: &mut StdRng, build: &SimBuild) -> Option<(SimAction, DerivedArtifact)> {
    let candidates: Vec<&SimAction> = build
        .last_layer
        .iter()
        .filter(|a| !a.derived_inputs.is_empty())
        .collect();
    let action = (*candidates.choose(rng)?).clone();
    let input = action.derived_inputs.choose(rng)?;
    let lost = match input.elements.choose(rng) {
        Some(element) => element.clone(),
        None => input.artifact.clone(),
    };
    Some((action, lost))
}

fn failure_for(action: &SimAction, lost: &DerivedArtifact) -> LostInputsFailure {
    LostInputsFailure::new(
        action.key.clone(),
        LostInputs::new().with(
            InputDigest::compute(lost.exec_path().as_bytes()),
            ActionInput::from(lost.clone()),
        ),
    )
}

/// Run the simulator
pub async fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = SimulatorStats::default();
    let mut violations = Vec::new();

    'builds: for build in 0..config.builds {
        stats.builds += 1;
        let sim = generate_build(&mut rng, build, &config);
        let planner = RewindPlanner::new(config.rewind.clone());
        let mut plan_sizes = Vec::new();

        for _ in 0..config.losses_per_build {
            let Some((action, lost)) = pick_failure(&mut rng, &sim) else {
                continue;
            };
            let failure = failure_for(&action, &lost);
            let direct_deps: HashSet<NodeKey> = action.inputs.iter().map(Artifact::node_key).collect();
            let Some(failed_action) = sim.graph.action(&action.key) else {
                continue;
            };

            match planner
                .compute_rewind_plan(&failed_action, &direct_deps, &failure, &sim.graph, &sim.graph)
                .await
            {
                Ok(plan) => {
                    stats.plans_computed += 1;
                    stats.nodes_invalidated += plan.graph().node_count() as u64;
                    stats.actions_restarted += plan.additional_actions_to_restart().len() as u64;
                    plan_sizes.push(plan.graph().node_count());
                    check_plan(build, &action, &lost, &failed_action, &plan, &mut violations);
                }
                Err(RewindError::RepeatedLoss { .. }) => stats.repeated_loss_failures += 1,
                Err(err) => violations.push(Violation::UnexpectedError {
                    build,
                    error: err.to_string(),
                }),
            }
            if config.stop_on_first_violation && !violations.is_empty() {
                break 'builds;
            }
        }

        if let Some((action, lost)) = pick_failure(&mut rng, &sim) {
            check_repeated_loss(build, &planner, &sim, &action, &lost, &mut stats, &mut violations)
                .await;
        }

        let sink = CollectingReportSink::new();
        planner.reset(&sink);
        stats.reports_posted += sink.reports().len() as u64;
        check_report(build, &config, &sink, &mut plan_sizes, &mut violations);

        if config.stop_on_first_violation && !violations.is_empty() {
            break;
        }
    }

    SimulatorReport {
        config,
        stats,
        violations,
    }
}

fn check_plan(
    build: u64,
    action: &SimAction,
    lost: &DerivedArtifact,
    failed_action: &Arc<dyn Action>,
    plan: &RewindPlan,
    violations: &mut Vec<Violation>,
) {
    let failed = action.key.to_string();
    let graph = plan.graph();

    if graph.root() != Some(&NodeKey::Action(action.key.clone())) {
        violations.push(Violation::InvalidGraph {
            build,
            failed_action: failed.clone(),
            reason: "graph not rooted at the failed action".into(),
        });
    }
    if let Err(violation) = validate_subgraph(graph, &action.key) {
        violations.push(Violation::InvalidGraph {
            build,
            failed_action: failed.clone(),
            reason: violation.to_string(),
        });
    }

    let action_nodes = graph.action_nodes().count();
    let additional = plan.additional_actions_to_restart();
    let includes_failed = additional.iter().any(|a| Arc::ptr_eq(a, failed_action));
    if additional.len() + 1 != action_nodes || includes_failed {
        violations.push(Violation::AdditionalActionsMismatch {
            build,
            failed_action: failed.clone(),
            action_nodes,
            additional_actions: additional.len(),
        });
    }

    let generator = NodeKey::Action(lost.generating_action().clone());
    if !graph.contains(&generator) {
        violations.push(Violation::GeneratorNotRestarted {
            build,
            failed_action: failed,
            generator: generator.to_string(),
        });
    }
}

async fn check_repeated_loss(
    build: u64,
    planner: &RewindPlanner,
    sim: &SimBuild,
    action: &SimAction,
    lost: &DerivedArtifact,
    stats: &mut SimulatorStats,
    violations: &mut Vec<Violation>,
) {
    let failure = failure_for(action, lost);
    let direct_deps: HashSet<NodeKey> = action.inputs.iter().map(Artifact::node_key).collect();
    let Some(failed_action) = sim.graph.action(&action.key) else {
        return;
    };
    let limit = planner.config().max_repeated_lost_inputs;
    let key = LostInputRecord::new(
        action.key.clone(),
        InputDigest::compute(lost.exec_path().as_bytes()),
        lost.exec_path(),
    )
    .key();
    // A pair already past the limit fails on its very next loss.
    let expected = limit.max(planner.ledger().occurrences(&key) + 1);

    loop {
        let result = planner
            .compute_rewind_plan(&failed_action, &direct_deps, &failure, &sim.graph, &sim.graph)
            .await;
        let seen = planner.ledger().occurrences(&key);
        match result {
            Ok(_) if seen < expected => {}
            Err(RewindError::RepeatedLoss { occurrences, .. }) => {
                stats.repeated_loss_failures += 1;
                if occurrences != expected {
                    violations.push(Violation::RepeatedLossThreshold {
                        build,
                        expected,
                        actual: occurrences,
                    });
                }
                return;
            }
            Ok(_) => {
                violations.push(Violation::RepeatedLossThreshold {
                    build,
                    expected,
                    actual: seen,
                });
                return;
            }
            Err(err) => {
                violations.push(Violation::UnexpectedError {
                    build,
                    error: err.to_string(),
                });
                return;
            }
        }
    }
}

fn check_report(
    build: u64,
    config: &SimulatorConfig,
    sink: &CollectingReportSink,
    plan_sizes: &mut [usize],
    violations: &mut Vec<Violation>,
) {
    let reports = sink.reports();
    let [report] = reports.as_slice() else {
        violations.push(Violation::ReportMismatch {
            build,
            reason: format!("expected one report, got {}", reports.len()),
        });
        return;
    };

    // Plans from the repeated-loss check are in the report too, so only the
    // ordering and the upper bound are checked against what was seen here.
    let sizes: Vec<usize> = report
        .top_rewind_events
        .iter()
        .map(|e| e.invalidated_nodes_count)
        .collect();
    if sizes.windows(2).any(|w| w[0] < w[1]) {
        violations.push(Violation::ReportMismatch {
            build,
            reason: format!("top events not in descending order: {sizes:?}"),
        });
    }
    if sizes.len() > config.rewind.max_action_rewind_events {
        violations.push(Violation::ReportMismatch {
            build,
            reason: format!("{} top events kept", sizes.len()),
        });
    }
    plan_sizes.sort_unstable_by(|a, b| b.cmp(a));
    if let (Some(largest_seen), Some(largest_reported)) = (plan_sizes.first(), sizes.first()) {
        if largest_reported < largest_seen {
            violations.push(Violation::ReportMismatch {
                build,
                reason: format!("largest plan {largest_seen} missing from report"),
            });
        }
    }
}
