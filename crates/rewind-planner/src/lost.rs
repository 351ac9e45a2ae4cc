//! Lost input reports
//!
//! An executor that cannot find an input it expected to read fails the
//! action with a [`LostInputsFailure`]. The failure is the planner's input
//! and is kept as the cause of any error the planner raises in response.

use indexmap::IndexMap;
use rewind_graph::{ActionInput, ActionKey, InputDigest};
use std::fmt;

/// Lost inputs of one failed execution, keyed by expected digest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LostInputs {
    by_digest: IndexMap<InputDigest, ActionInput>,
}

impl LostInputs {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `input` as lost; a repeated digest keeps its first input
    pub fn insert(&mut self, digest: InputDigest, input: ActionInput) {
        self.by_digest.entry(digest).or_insert(input);
    }

    #[must_use]
    pub fn with(mut self, digest: InputDigest, input: impl Into<ActionInput>) -> Self {
        self.insert(digest, input.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }

    #[must_use]
    pub fn get(&self, digest: &InputDigest) -> Option<&ActionInput> {
        self.by_digest.get(digest)
    }

    /// `(digest, input)` pairs in report order
    pub fn iter(&self) -> impl Iterator<Item = (&InputDigest, &ActionInput)> + '_ {
        self.by_digest.iter()
    }

    /// Lost inputs in report order
    pub fn inputs(&self) -> impl Iterator<Item = &ActionInput> + '_ {
        self.by_digest.values()
    }
}

impl FromIterator<(InputDigest, ActionInput)> for LostInputs {
    fn from_iter<T: IntoIterator<Item = (InputDigest, ActionInput)>>(iter: T) -> Self {
        let mut lost = Self::new();
        for (digest, input) in iter {
            lost.insert(digest, input);
        }
        lost
    }
}

/// An action execution that failed because inputs were lost
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostInputsFailure {
    pub failed_action: ActionKey,
    pub lost_inputs: LostInputs,
}

impl LostInputsFailure {
    #[inline]
    #[must_use]
    pub fn new(failed_action: ActionKey, lost_inputs: LostInputs) -> Self {
        Self {
            failed_action,
            lost_inputs,
        }
    }
}

impl fmt::Display for LostInputsFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lost {} input(s):",
            self.failed_action,
            self.lost_inputs.len()
        )?;
        for (digest, input) in self.lost_inputs.iter() {
            write!(f, " {input} ({})", digest.short())?;
        }
        Ok(())
    }
}

impl std::error::Error for LostInputsFailure {}
