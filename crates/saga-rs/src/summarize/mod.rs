//! The summarizer contract and its implementations.
//!
//! The summarizer is an external collaborator: it receives an ordered
//! segment rendering plus continuity hints and returns one bounded text
//! blob. Output is accepted as opaque narrative — nothing here validates
//! that the text only references entities present in the input.
//!
//! Implementations:
//!
//! - [`LlmSummarizer`](llm::LlmSummarizer) — chat-completions backed, the
//!   production condenser.
//! - [`TruncatingSummarizer`] — deterministic head-and-tail condenser; what
//!   the scheduler degrades to on retry exhaustion, and what offline replay
//!   uses.
//! - [`FixedSummarizer`] — canned output, for tests.

pub mod llm;

use crate::error::SummarizeError;
use futures::future::BoxFuture;

pub use llm::LlmSummarizer;

/// Future returned by a summarizer call.
pub type SummarizeFuture<'a> = BoxFuture<'a, Result<String, SummarizeError>>;

/// Continuity hints passed alongside the segment so revisits and merges
/// stay coherent.
#[derive(Debug, Clone, Copy)]
pub struct ContinuityHints<'a> {
    /// Display name of the container the segment belongs to.
    pub container_name: &'a str,
    /// Text of the most recent prior summary for the same container, if any.
    pub prior_summary: Option<&'a str>,
}

/// One summarization request: an ordered segment rendering plus hints.
#[derive(Debug, Clone, Copy)]
pub struct SummarizeRequest<'a> {
    pub segment_text: &'a str,
    pub hints: ContinuityHints<'a>,
    /// Upper bound on accepted output length; longer output is malformed.
    pub max_chars: usize,
}

/// Black-box segment condenser. Must be safe to re-run — the scheduler
/// retries failed calls, and tests substitute fixed outputs.
pub trait Summarizer: Send + Sync {
    fn summarize<'a>(&'a self, req: SummarizeRequest<'a>) -> SummarizeFuture<'a>;
}

// ── Mechanical condensation ────────────────────────────────────────

/// Head-and-tail truncation: keep the opening and closing of the text, drop
/// the middle. The shape every degraded summary takes, so a reader can see
/// where detail was lost.
pub fn mechanical_condense(text: &str, max_chars: usize) -> String {
    const ELLIPSIS: &str = "\n[... events omitted ...]\n";

    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let budget = max_chars.saturating_sub(ELLIPSIS.chars().count()).max(2);
    let head_chars = budget / 2;
    let tail_chars = budget - head_chars;

    let head: String = text.chars().take(head_chars).collect();
    let total = text.chars().count();
    let tail: String = text.chars().skip(total - tail_chars).collect();

    format!("{head}{ELLIPSIS}{tail}")
}

// ── Deterministic implementations ──────────────────────────────────

/// Summarizer that condenses mechanically, without any model call. Output is
/// deterministic, which makes it the right collaborator for offline replay.
#[derive(Debug, Clone, Default)]
pub struct TruncatingSummarizer;

impl Summarizer for TruncatingSummarizer {
    fn summarize<'a>(&'a self, req: SummarizeRequest<'a>) -> SummarizeFuture<'a> {
        Box::pin(async move { Ok(mechanical_condense(req.segment_text, req.max_chars)) })
    }
}

/// Summarizer that always returns the same text. For tests that need to
/// assert on exact archived content.
#[derive(Debug, Clone)]
pub struct FixedSummarizer {
    pub text: String,
}

impl FixedSummarizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Summarizer for FixedSummarizer {
    fn summarize<'a>(&'a self, _req: SummarizeRequest<'a>) -> SummarizeFuture<'a> {
        Box::pin(async move { Ok(self.text.clone()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_passes_through() {
        assert_eq!(mechanical_condense("a quiet evening", 100), "a quiet evening");
    }

    #[test]
    fn long_text_keeps_head_and_tail() {
        let text = format!("OPENING {} CLOSING", "x".repeat(500));
        let condensed = mechanical_condense(&text, 80);
        assert!(condensed.starts_with("OPENING"));
        assert!(condensed.ends_with("CLOSING"));
        assert!(condensed.contains("[... events omitted ...]"));
        assert!(condensed.chars().count() <= 80 + 10); // ellipsis slack
    }

    #[test]
    fn condensed_output_is_bounded() {
        let text = "y".repeat(10_000);
        let condensed = mechanical_condense(&text, 200);
        assert!(condensed.chars().count() <= 200);
    }

    #[tokio::test]
    async fn truncating_summarizer_is_deterministic() {
        let sum = TruncatingSummarizer;
        let req = SummarizeRequest {
            segment_text: "the party crossed the bridge",
            hints: ContinuityHints {
                container_name: "Bridge",
                prior_summary: None,
            },
            max_chars: 100,
        };
        let a = sum.summarize(req).await.unwrap();
        let b = sum.summarize(req).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn fixed_summarizer_ignores_input() {
        let sum = FixedSummarizer::new("always this");
        let req = SummarizeRequest {
            segment_text: "anything at all",
            hints: ContinuityHints {
                container_name: "X",
                prior_summary: Some("prior"),
            },
            max_chars: 10_000,
        };
        assert_eq!(sum.summarize(req).await.unwrap(), "always this");
    }
}
