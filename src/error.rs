//! Crate-wide error taxonomy.
//!
//! One flat enum, one variant per error kind named in the specification's
//! error-handling design: `Validation`, `Parse` (markdown/structure
//! violations), `Upstream` (embedder/repository failures), `Scope`
//! (cross-tenant or non-sharable access), `Dimension` (vector length
//! mismatch), `Cancelled` (deadline exceeded).

use thiserror::Error;

/// Result alias used throughout the crate.
pub type PkeResult<T> = std::result::Result<T, PkeError>;

#[derive(Error, Debug)]
pub enum PkeError {
    /// Malformed input: bad identifier, unknown intent, negative `k`, etc.
    /// Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Markdown structure violation encountered during parsing. Carried as a
    /// warning on the parse result rather than raised, except where the
    /// caller explicitly asks for strict parsing.
    #[error("parse error: {0}")]
    Parse(String),

    /// Embedder or repository failure. Retryable variants are retried with
    /// backoff before surfacing here; this variant carries the terminal
    /// status after retries are exhausted.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Cross-tenant access or access to a non-sharable resource. Surfaced as
    /// a policy violation, never a server error.
    #[error("scope violation: {reason}")]
    Scope { reason: String },

    /// Vector length mismatch between a query and a stored index. Logged and
    /// absorbed by the vector index itself (search returns empty); this
    /// variant exists for call sites that must distinguish the condition.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    /// Deadline exceeded on a cancellable operation. Never retried.
    #[error("operation cancelled")]
    Cancelled,

    /// Storage-layer failure without a more specific classification.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PkeError {
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    #[must_use]
    pub fn scope(reason: impl Into<String>) -> Self {
        Self::Scope {
            reason: reason.into(),
        }
    }

    /// Whether retrying this error (after backoff) could plausibly succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Storage(_))
    }

    /// Whether this error prevents any correct answer from being returned
    /// (as opposed to one that degrades gracefully into a partial result).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Scope { .. })
    }
}

impl From<serde_json::Error> for PkeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for PkeError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for PkeError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_fatal_not_retryable() {
        let err = PkeError::validation("bad id");
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn scope_is_fatal() {
        let err = PkeError::scope("policy.non_sharable");
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn upstream_is_retryable_not_fatal() {
        let err = PkeError::Upstream("503".into());
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn dimension_is_neither() {
        let err = PkeError::Dimension {
            expected: 768,
            actual: 3072,
        };
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }
}
