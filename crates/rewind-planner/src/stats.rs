//! Rewind plan statistics
//!
//! Every successful plan leaves a small [`RewindPlanStats`] behind instead of
//! its whole graph. At the end of the build the most expensive plans, by
//! number of invalidated nodes, go into the [`RewindingReport`].

use crate::engine::Action;
use crate::ledger::LostInputRecord;
use crossbeam::queue::SegQueue;
use rewind_graph::ActionKey;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Summary of one rewind plan
#[derive(Debug, Clone)]
pub struct RewindPlanStats {
    pub failed_action_key: ActionKey,
    pub failed_action: Arc<dyn Action>,
    pub invalidated_nodes_count: usize,
    pub lost_input_records_count: usize,
    pub sample_lost_input_records: Vec<LostInputRecord>,
}

impl RewindPlanStats {
    fn to_event(&self) -> ActionRewindEvent {
        ActionRewindEvent {
            failed_action: self.failed_action_key.to_string(),
            failed_action_description: self.failed_action.describe(),
            invalidated_nodes_count: self.invalidated_nodes_count,
            lost_input_records_count: self.lost_input_records_count,
            sample_lost_inputs: self
                .sample_lost_input_records
                .iter()
                .map(|record| LostInputSample {
                    digest: record.digest.to_string(),
                    path: record.path.clone(),
                })
                .collect(),
        }
    }
}

/// One entry of the end-of-build report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRewindEvent {
    pub failed_action: String,
    pub failed_action_description: String,
    pub invalidated_nodes_count: usize,
    pub lost_input_records_count: usize,
    pub sample_lost_inputs: Vec<LostInputSample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LostInputSample {
    pub digest: String,
    pub path: String,
}

/// End-of-build rewinding summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewindingReport {
    /// Distinct (failed action, lost digest) pairs seen during the build
    pub lost_input_records_count: usize,
    /// Most expensive plans, largest first
    pub top_rewind_events: Vec<ActionRewindEvent>,
}

/// Lock-free collector of plan statistics
#[derive(Debug, Default)]
pub struct StatsRecorder {
    queue: SegQueue<(u64, RewindPlanStats)>,
    next_seq: AtomicU64,
}

impl StatsRecorder {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stats: RewindPlanStats) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.queue.push((seq, stats));
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove the `k` entries with the most invalidated nodes and discard the rest
    ///
    /// Ties keep recording order.
    pub fn drain_top(&self, k: usize) -> Vec<RewindPlanStats> {
        let mut entries = Vec::with_capacity(self.queue.len());
        while let Some(entry) = self.queue.pop() {
            entries.push(entry);
        }
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.invalidated_nodes_count
                .cmp(&a.invalidated_nodes_count)
                .then(seq_a.cmp(seq_b))
        });
        entries.truncate(k);
        entries.into_iter().map(|(_, stats)| stats).collect()
    }
}

/// Build the report from the top plans
#[must_use]
pub fn rewinding_report(
    lost_input_records_count: usize,
    top: &[RewindPlanStats],
) -> RewindingReport {
    RewindingReport {
        lost_input_records_count,
        top_rewind_events: top.iter().map(RewindPlanStats::to_event).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_graph::{Artifact, InputDigest};

    #[derive(Debug)]
    struct Named(&'static str);

    impl Action for Named {
        fn direct_data_inputs(&self) -> Vec<Artifact> {
            Vec::new()
        }

        fn describe(&self) -> String {
            self.0.to_string()
        }
    }

    fn stats(name: &'static str, nodes: usize) -> RewindPlanStats {
        RewindPlanStats {
            failed_action_key: ActionKey::new(name, 0),
            failed_action: Arc::new(Named(name)),
            invalidated_nodes_count: nodes,
            lost_input_records_count: 1,
            sample_lost_input_records: vec![LostInputRecord::new(
                ActionKey::new(name, 0),
                InputDigest::new("d"),
                "out/x",
            )],
        }
    }

    #[test]
    fn drain_top_orders_by_nodes_then_insertion() {
        let recorder = StatsRecorder::new();
        for (name, nodes) in [("a", 2), ("b", 7), ("c", 2), ("d", 9), ("e", 1), ("f", 7), ("g", 3)] {
            recorder.record(stats(name, nodes));
        }

        let top: Vec<_> = recorder
            .drain_top(5)
            .into_iter()
            .map(|s| s.failed_action.describe())
            .collect();
        assert_eq!(top, vec!["d", "b", "f", "g", "a"]);
        assert!(recorder.is_empty());
    }

    #[test]
    fn drain_top_with_fewer_entries() {
        let recorder = StatsRecorder::new();
        recorder.record(stats("a", 1));
        assert_eq!(recorder.drain_top(5).len(), 1);
        assert_eq!(recorder.drain_top(5).len(), 0);
    }

    #[test]
    fn report_serializes() {
        let report = rewinding_report(3, &[stats("a", 4)]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["lost_input_records_count"], 3);
        assert_eq!(json["top_rewind_events"][0]["failed_action"], "a#0");
        assert_eq!(json["top_rewind_events"][0]["invalidated_nodes_count"], 4);
        assert_eq!(json["top_rewind_events"][0]["sample_lost_inputs"][0]["path"], "out/x");
    }
}
