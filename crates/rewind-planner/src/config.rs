//! Planner configuration

use serde::{Deserialize, Serialize};

/// Limits applied by a [`RewindPlanner`](crate::RewindPlanner)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewindConfig {
    /// Occurrence count of one (failed action, lost digest) pair at which
    /// the failed action is failed for good
    pub max_repeated_lost_inputs: u32,
    /// Number of rewind plans kept in the end-of-build report
    pub max_action_rewind_events: usize,
    /// Number of lost input records sampled per rewind plan
    pub max_lost_inputs_recorded: usize,
}

impl RewindConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_max_repeated_lost_inputs(mut self, max: u32) -> Self {
        self.max_repeated_lost_inputs = max;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_action_rewind_events(mut self, max: usize) -> Self {
        self.max_action_rewind_events = max;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_lost_inputs_recorded(mut self, max: usize) -> Self {
        self.max_lost_inputs_recorded = max;
        self
    }

    /// Parse overrides from TOML; absent keys keep their defaults
    ///
    /// # Errors
    /// Returns the TOML decoding error for malformed input.
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            max_repeated_lost_inputs: 20,
            max_action_rewind_events: 5,
            max_lost_inputs_recorded: 5,
        }
    }
}
