//! Content digests of lost inputs
//!
//! Executors report lost inputs keyed by the digest they expected to read.
//! The digest is opaque to rewinding; it is only compared for equality.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Hex-encoded content digest of an action input
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputDigest(String);

impl InputDigest {
    /// Wrap a digest string as reported by the executor
    #[inline]
    #[must_use]
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Compute the Blake3 digest of `data`
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(hex::encode(blake3::hash(data).as_bytes()))
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short string representation (first 16 hex chars)
    #[must_use]
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(16)
            .map_or(self.0.len(), |(idx, _)| idx);
        &self.0[..end]
    }
}

impl Display for InputDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InputDigest {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
