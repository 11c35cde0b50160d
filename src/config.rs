//! Process-wide tunables.
//!
//! Constructed once per process (per `spec.md` §9's "process-wide state"
//! note) and handed to the router/cache/embedder by reference. `from_env`
//! mirrors the `dotenvy`-based loading `weavegraph` and `wg-bastion` both
//! use; individual fields can still be overridden programmatically after
//! loading, the way `wg-ragsmith`'s `ChunkingConfig` builder allows.

use std::time::Duration;

use crate::error::{PkeError, PkeResult};

#[derive(Debug, Clone)]
pub struct Config {
    /// Per-query chunk ceiling. Hard cap 50.
    pub max_chunks: usize,
    /// §4.4 intent classifier confidence floor before falling back to dual-path.
    pub intent_confidence_threshold: f64,
    /// §4.4 keyword-rule confidence used for comparative/question-word matches.
    pub keyword_confidence_threshold: f64,
    /// §4.6 structured-batch availability floor for `found`.
    pub min_availability_confidence: f64,
    /// §4.6 Structured-First Path: minimum high-confidence facts to short-circuit.
    pub min_structured: usize,
    /// Prefer fact-store results over semantic ones when both are viable.
    pub structured_first: bool,
    /// Enable the Hybrid Path's semantic fallback.
    pub semantic_fallback: bool,
    /// Cache partition capacity (per tenant), LRU-evicted.
    pub cache_size: usize,
    /// Cache entry time-to-live.
    pub cache_ttl: Duration,
    /// Structured-Batch Path worker pool size. Bound 1–20.
    pub batch_processing_workers: usize,
    /// Structured-Batch Path per-batch timeout.
    pub batch_processing_timeout: Duration,
    /// Embedding batcher group size. Bound 50–100.
    pub embedding_batch_size: usize,
    /// Drift monitor scan interval.
    pub drift_check_interval: Duration,
    /// Drift monitor notification window (campaign considered stale).
    pub staleness_window: Duration,
    /// Drift monitor "Needs Refresh" escalation window.
    pub needs_refresh_window: Duration,
    /// Authoritative vector dimension for the in-process adapter.
    pub embedding_dimension: usize,
    /// Per-request wall-clock deadline.
    pub request_timeout: Duration,
    /// Whether the Hybrid Path falls back to a keyword scan when vector
    /// search returns nothing.
    pub keyword_fallback: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_chunks: 8,
            intent_confidence_threshold: 0.7,
            keyword_confidence_threshold: 0.8,
            min_availability_confidence: 0.6,
            min_structured: 1,
            structured_first: true,
            semantic_fallback: true,
            cache_size: 10_000,
            cache_ttl: Duration::from_secs(5 * 60),
            batch_processing_workers: 5,
            batch_processing_timeout: Duration::from_secs(30),
            embedding_batch_size: 75,
            drift_check_interval: Duration::from_secs(60 * 60),
            staleness_window: Duration::from_secs(30 * 24 * 60 * 60),
            needs_refresh_window: Duration::from_secs(180 * 24 * 60 * 60),
            embedding_dimension: 768,
            request_timeout: Duration::from_secs(30),
            keyword_fallback: true,
        }
    }
}

impl Config {
    /// Load defaults, then apply any recognized environment variables (via
    /// `dotenvy`, so a `.env` file in the working directory is honored too).
    /// Unset variables keep the default; malformed values are a validation
    /// error rather than a silent fallback.
    pub fn from_env() -> PkeResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("PKE_MAX_CHUNKS") {
            cfg.max_chunks = parse_env("PKE_MAX_CHUNKS", &v)?;
        }
        if let Ok(v) = std::env::var("PKE_INTENT_CONFIDENCE_THRESHOLD") {
            cfg.intent_confidence_threshold = parse_env("PKE_INTENT_CONFIDENCE_THRESHOLD", &v)?;
        }
        if let Ok(v) = std::env::var("PKE_KEYWORD_CONFIDENCE_THRESHOLD") {
            cfg.keyword_confidence_threshold = parse_env("PKE_KEYWORD_CONFIDENCE_THRESHOLD", &v)?;
        }
        if let Ok(v) = std::env::var("PKE_MIN_AVAILABILITY_CONFIDENCE") {
            cfg.min_availability_confidence = parse_env("PKE_MIN_AVAILABILITY_CONFIDENCE", &v)?;
        }
        if let Ok(v) = std::env::var("PKE_CACHE_SIZE") {
            cfg.cache_size = parse_env("PKE_CACHE_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("PKE_CACHE_TTL_SECS") {
            cfg.cache_ttl = Duration::from_secs(parse_env("PKE_CACHE_TTL_SECS", &v)?);
        }
        if let Ok(v) = std::env::var("PKE_BATCH_PROCESSING_WORKERS") {
            cfg.batch_processing_workers = parse_env("PKE_BATCH_PROCESSING_WORKERS", &v)?;
        }
        if let Ok(v) = std::env::var("PKE_EMBEDDING_BATCH_SIZE") {
            cfg.embedding_batch_size = parse_env("PKE_EMBEDDING_BATCH_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("PKE_EMBEDDING_DIMENSION") {
            cfg.embedding_dimension = parse_env("PKE_EMBEDDING_DIMENSION", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject combinations the spec marks as bounded (`maxChunks` hard cap
    /// 50, batch workers 1–20, embedding batch size 50–100).
    pub fn validate(&self) -> PkeResult<()> {
        if self.max_chunks == 0 || self.max_chunks > 50 {
            return Err(PkeError::validation(
                "max_chunks must be in 1..=50",
            ));
        }
        if !(1..=20).contains(&self.batch_processing_workers) {
            return Err(PkeError::validation(
                "batch_processing_workers must be in 1..=20",
            ));
        }
        if !(50..=100).contains(&self.embedding_batch_size) {
            return Err(PkeError::validation(
                "embedding_batch_size must be in 50..=100",
            ));
        }
        if self.embedding_dimension == 0 {
            return Err(PkeError::validation("embedding_dimension must be nonzero"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, raw: &str) -> PkeResult<T> {
    raw.parse()
        .map_err(|_| PkeError::validation(format!("invalid value for {name}: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.max_chunks, 8);
        assert_eq!(cfg.embedding_batch_size, 75);
        assert_eq!(cfg.batch_processing_workers, 5);
        assert!((cfg.intent_confidence_threshold - 0.7).abs() < f64::EPSILON);
        cfg.validate().expect("defaults must validate");
    }

    #[test]
    fn rejects_out_of_bound_batch_size() {
        let mut cfg = Config::default();
        cfg.embedding_batch_size = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_chunks() {
        let mut cfg = Config::default();
        cfg.max_chunks = 0;
        assert!(cfg.validate().is_err());
    }
}
