//! Action rewind planner
//!
//! When an action fails because some of its inputs were lost from the
//! cache, the build is not aborted. Instead the planner computes which
//! nodes of the build graph must be restarted to regenerate those inputs:
//! 1. **Ledger**: count each (failed action, lost digest) pair and stop
//!    rewinding losses that keep repeating
//! 2. **Ownership**: map each lost input to the direct dependencies of the
//!    failed action responsible for it
//! 3. **Graph building**: expand those dependencies into a [`RewindGraph`]
//!    rooted at the failed action
//! 4. **Stats**: keep the most expensive plans for the end-of-build report
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rewind_planner::prelude::*;
//!
//! let planner = RewindPlanner::new(RewindConfig::default());
//! let plan = planner
//!     .compute_rewind_plan(&failed_action, &direct_deps, &failure, &owners, &engine)
//!     .await?;
//! for action in plan.additional_actions_to_restart() {
//!     // evict and restart
//! }
//!
//! // end of build
//! planner.reset(&report_sink);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod lost;
pub mod ownership;
pub mod planner;
pub mod stats;

// Test harness
pub mod test_harness;

// Re-exports
pub use builder::{BuiltRewindGraph, RewindGraphBuilder};
pub use config::RewindConfig;
pub use engine::{
    Action, DiagnosticSink, EvaluationEngine, GeneratingActions, OwnershipIndex, ReportSink,
    TemplateExpansion, TracingDiagnosticSink,
};
pub use error::{Anomaly, Interrupted, LostInputRole, RewindError};
pub use ledger::{Ledger, LossKey, LostInputRecord};
pub use lost::{LostInputs, LostInputsFailure};
pub use ownership::{resolve_owning_deps, UnexpectedSource};
pub use planner::{RewindPlan, RewindPlanner};
pub use stats::{
    rewinding_report, ActionRewindEvent, LostInputSample, RewindPlanStats, RewindingReport,
    StatsRecorder,
};

pub use rewind_graph::{
    validate_subgraph, ActionInput, ActionKey, Artifact, DerivedArtifact, InputDigest, NodeKey,
    RewindGraph, SourceArtifact, SubgraphViolation,
};

/// Types needed to plan a rewind
pub mod prelude {
    pub use crate::config::RewindConfig;
    pub use crate::engine::{Action, EvaluationEngine, OwnershipIndex, ReportSink};
    pub use crate::error::{Interrupted, RewindError};
    pub use crate::lost::{LostInputs, LostInputsFailure};
    pub use crate::planner::{RewindPlan, RewindPlanner};
    pub use crate::stats::RewindingReport;
    pub use rewind_graph::{
        ActionInput, ActionKey, Artifact, DerivedArtifact, InputDigest, NodeKey, RewindGraph,
        SourceArtifact,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
