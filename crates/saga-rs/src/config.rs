//! Configuration for a [`Session`](crate::session::Session).
//!
//! Compression thresholds are tunable business rules, not constants: the
//! chronicle threshold/batch pair and the recency floor are read from config
//! at every decision point and never hardcoded at use sites.
//!
//! # Examples
//!
//! ```ignore
//! let config = SagaConfig::new("story-1", "You are the narrator.")
//!     .with_root_dir("/var/lib/saga")
//!     .with_token_ceiling(32_000)
//!     .with_chronicle_policy(12, 6)
//!     .with_retries(3);
//! ```

use crate::compress::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

// ── Compression ────────────────────────────────────────────────────

/// Policy knobs for the compression scheduler.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Number of accumulated unit summaries within one aggregate that
    /// triggers chronicle batching (N).
    pub chronicle_threshold: usize,
    /// How many of the oldest unit summaries collapse into one chronicle
    /// when the threshold fires (K).
    pub chronicle_batch: usize,
    /// Recency floor (R): the newest R raw messages are never touched by
    /// budget-driven forced compression.
    pub recency_floor: usize,
    /// Retry budget for summarizer calls.
    pub retry: RetryPolicy,
    /// Deadline for a single summarizer call; elapsing counts as a
    /// transient failure.
    pub summary_timeout: Duration,
    /// Upper bound on accepted summary length; longer output is malformed.
    pub max_summary_chars: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            chronicle_threshold: 12,
            chronicle_batch: 6,
            recency_floor: 8,
            retry: RetryPolicy::default(),
            summary_timeout: Duration::from_secs(60),
            max_summary_chars: 4_000,
        }
    }
}

// ── Context window ─────────────────────────────────────────────────

/// Sizing for the assembled working window.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Hard token ceiling for the assembled window.
    pub token_ceiling: usize,
    /// Characters-per-token ratio for the default estimator.
    pub chars_per_token: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_ceiling: 16_000,
            chars_per_token: crate::context::DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

// ── Top-level config ───────────────────────────────────────────────

/// Configuration for one story session.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Stable identifier; doubles as the session directory name.
    pub session_id: String,
    /// Content of the single system framing message that opens the buffer.
    pub framing: String,
    /// Root directory holding session directories (`{root}/{session_id}`).
    pub root_dir: PathBuf,
    pub compression: CompressionConfig,
    pub context: ContextConfig,
}

impl SagaConfig {
    pub fn new(session_id: impl Into<String>, framing: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            framing: framing.into(),
            root_dir: PathBuf::from(".saga"),
            compression: CompressionConfig::default(),
            context: ContextConfig::default(),
        }
    }

    /// Directory for this session's buffer log, manifest, and archive.
    pub fn session_dir(&self) -> PathBuf {
        self.root_dir.join(&self.session_id)
    }

    // ── Builder methods ───────────────────────────────────────────
    //
    // Only routinely customised settings get builders; the full
    // CompressionConfig / ContextConfig structs remain public fields for
    // anything else.

    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    pub fn with_token_ceiling(mut self, ceiling: usize) -> Self {
        self.context.token_ceiling = ceiling;
        self
    }

    /// Set the chronicle threshold (N) and batch size (K) together.
    /// The batch is clamped to the threshold — collapsing more summaries
    /// than can have accumulated makes no sense.
    pub fn with_chronicle_policy(mut self, threshold: usize, batch: usize) -> Self {
        self.compression.chronicle_threshold = threshold.max(1);
        self.compression.chronicle_batch = batch.clamp(1, self.compression.chronicle_threshold);
        self
    }

    pub fn with_recency_floor(mut self, floor: usize) -> Self {
        self.compression.recency_floor = floor;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.compression.retry = RetryPolicy::with_retries(retries);
        self
    }

    pub fn with_summary_timeout(mut self, timeout: Duration) -> Self {
        self.compression.summary_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let config = SagaConfig::new("s", "framing");
        assert_eq!(config.compression.chronicle_threshold, 12);
        assert_eq!(config.compression.chronicle_batch, 6);
        assert!(config.compression.recency_floor > 0);
        assert!(config.context.token_ceiling > 0);
    }

    #[test]
    fn chronicle_policy_clamps_batch_to_threshold() {
        let config = SagaConfig::new("s", "f").with_chronicle_policy(4, 10);
        assert_eq!(config.compression.chronicle_threshold, 4);
        assert_eq!(config.compression.chronicle_batch, 4);
    }

    #[test]
    fn session_dir_nests_under_root() {
        let config = SagaConfig::new("story-9", "f").with_root_dir("/tmp/saga");
        assert_eq!(config.session_dir(), PathBuf::from("/tmp/saga/story-9"));
    }
}
