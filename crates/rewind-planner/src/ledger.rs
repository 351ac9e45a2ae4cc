//! Repeated loss ledger
//!
//! Counts, for the lifetime of one build, how often each failed action has
//! lost each input. An action should wait for the input's generating action
//! to rerun before it retries, so seeing the same loss again points at a
//! race in invalidation. A handful of repeats is tolerated; the planner
//! gives up once the threshold is reached.

use dashmap::DashMap;
use rewind_graph::{ActionKey, InputDigest};
use serde::Serialize;

/// One occurrence of a failed action losing an input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LostInputRecord {
    pub failed_action: ActionKey,
    pub digest: InputDigest,
    pub path: String,
}

impl LostInputRecord {
    #[inline]
    #[must_use]
    pub fn new(failed_action: ActionKey, digest: InputDigest, path: impl Into<String>) -> Self {
        Self {
            failed_action,
            digest,
            path: path.into(),
        }
    }

    /// Identity used for counting; the path is informational only
    #[inline]
    #[must_use]
    pub fn key(&self) -> LossKey {
        LossKey {
            failed_action: self.failed_action.clone(),
            digest: self.digest.clone(),
        }
    }
}

/// Counting identity of a [`LostInputRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LossKey {
    pub failed_action: ActionKey,
    pub digest: InputDigest,
}

/// Concurrent occurrence counter
#[derive(Debug)]
pub struct Ledger {
    max_repeated_lost_inputs: u32,
    counts: DashMap<LossKey, u32>,
}

impl Ledger {
    #[inline]
    #[must_use]
    pub fn new(max_repeated_lost_inputs: u32) -> Self {
        Self {
            max_repeated_lost_inputs,
            counts: DashMap::new(),
        }
    }

    /// Count one occurrence of `record`, returning the total so far (1 on first sight)
    pub fn record_loss(&self, record: &LostInputRecord) -> u32 {
        let mut count = self.counts.entry(record.key()).or_insert(0);
        *count += 1;
        *count
    }

    /// Whether `occurrences` has reached the repeat limit
    #[inline]
    #[must_use]
    pub fn threshold_exceeded(&self, occurrences: u32) -> bool {
        occurrences >= self.max_repeated_lost_inputs
    }

    /// Current count for `key`
    #[must_use]
    pub fn occurrences(&self, key: &LossKey) -> u32 {
        self.counts.get(key).map_or(0, |count| *count)
    }

    /// Number of distinct records seen
    #[inline]
    #[must_use]
    pub fn distinct_records(&self) -> usize {
        self.counts.len()
    }

    /// Forget everything, returning how many distinct records existed
    ///
    /// Must not race with [`record_loss`](Self::record_loss).
    pub fn reset(&self) -> usize {
        let distinct = self.counts.len();
        self.counts.clear();
        distinct
    }
}
