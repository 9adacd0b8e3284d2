//! Fixed-order window assembly with progressive collapse.
//!
//! Every turn's window is built in the same order:
//!
//! 1. The single system framing message.
//! 2. Aggregate chronicles, oldest to newest.
//! 3. Unit summaries for the current aggregate, oldest to newest.
//! 4. Raw messages since the last compression point, untouched.
//!
//! When the estimate exceeds the ceiling, the oldest chronicles are dropped
//! first, then the oldest unit summaries — never the raw tail. If only the
//! framing and the raw tail remain and the window still overflows, the
//! overflow is accepted and a context-starved condition is logged; that is
//! the single exception to the ceiling invariant, and it is resolved here
//! rather than surfaced as an error.

use crate::context::estimator::TokenEstimator;
use crate::{Message, Summary};
use tracing::{debug, warn};

/// The parts a window is assembled from. Borrowed from session state — the
/// assembler never mutates what it is given.
pub struct WindowInput<'a> {
    /// The system framing message (always the first window element).
    pub framing: &'a Message,
    /// Chronicles across the whole session, oldest first.
    pub chronicles: &'a [Summary],
    /// Unit summaries for the current aggregate, oldest first.
    pub unit_summaries: &'a [Summary],
    /// Raw live messages, oldest first.
    pub raw_tail: &'a [Message],
}

/// An assembled working window plus what it cost to fit.
#[derive(Debug)]
pub struct Window {
    pub messages: Vec<Message>,
    pub estimated_tokens: usize,
    /// Chronicles collapsed away to fit the ceiling this turn.
    pub dropped_chronicles: usize,
    /// Unit summaries collapsed away to fit the ceiling this turn.
    pub dropped_summaries: usize,
    /// True when even framing + raw tail alone exceed the ceiling and the
    /// overflow was accepted.
    pub starved: bool,
}

/// Builds bounded windows. Owns the estimator; the ceiling comes from
/// [`ContextConfig`](crate::config::ContextConfig).
pub struct ContextAssembler {
    estimator: Box<dyn TokenEstimator>,
    token_ceiling: usize,
}

impl ContextAssembler {
    pub fn new(estimator: Box<dyn TokenEstimator>, token_ceiling: usize) -> Self {
        Self {
            estimator,
            token_ceiling,
        }
    }

    pub fn token_ceiling(&self) -> usize {
        self.token_ceiling
    }

    /// Estimate the full (uncollapsed) window. Used by the scheduler to
    /// decide whether budget-driven forced compression should run before
    /// assembly starts dropping history.
    pub fn estimate_full(&self, input: &WindowInput<'_>) -> usize {
        let mut total = self.estimator.estimate(&input.framing.content);
        for c in input.chronicles {
            total += self.estimator.estimate(&render_chronicle(c));
        }
        for s in input.unit_summaries {
            total += self.estimator.estimate(&render_unit_summary(s));
        }
        for m in input.raw_tail {
            total += self.estimator.estimate(&m.content);
        }
        total
    }

    /// Assemble the window, collapsing oldest compressed tiers as needed.
    pub fn assemble(&self, input: WindowInput<'_>) -> Window {
        let framing_tokens = self.estimator.estimate(&input.framing.content);
        let tail_tokens: usize = input
            .raw_tail
            .iter()
            .map(|m| self.estimator.estimate(&m.content))
            .sum();

        let chronicle_texts: Vec<String> =
            input.chronicles.iter().map(render_chronicle).collect();
        let summary_texts: Vec<String> =
            input.unit_summaries.iter().map(render_unit_summary).collect();
        let chronicle_costs: Vec<usize> = chronicle_texts
            .iter()
            .map(|t| self.estimator.estimate(t))
            .collect();
        let summary_costs: Vec<usize> = summary_texts
            .iter()
            .map(|t| self.estimator.estimate(t))
            .collect();

        let mut total = framing_tokens
            + tail_tokens
            + chronicle_costs.iter().sum::<usize>()
            + summary_costs.iter().sum::<usize>();

        // Collapse oldest-first: chronicles, then unit summaries.
        let mut first_chronicle = 0;
        while total > self.token_ceiling && first_chronicle < chronicle_costs.len() {
            total -= chronicle_costs[first_chronicle];
            first_chronicle += 1;
        }
        let mut first_summary = 0;
        while total > self.token_ceiling && first_summary < summary_costs.len() {
            total -= summary_costs[first_summary];
            first_summary += 1;
        }

        let starved = total > self.token_ceiling;
        if first_chronicle > 0 || first_summary > 0 {
            debug!(
                "window collapse: dropped {} chronicle(s), {} unit summary(ies) to fit {} tokens",
                first_chronicle, first_summary, self.token_ceiling,
            );
        }
        if starved {
            warn!(
                "context starved: framing + raw tail estimate {} exceeds ceiling {}; \
                 accepting overflow",
                total, self.token_ceiling,
            );
        }

        let mut messages =
            Vec::with_capacity(1 + chronicle_texts.len() + summary_texts.len() + input.raw_tail.len());
        messages.push(input.framing.clone());
        for text in chronicle_texts.into_iter().skip(first_chronicle) {
            messages.push(Message::system(text));
        }
        for text in summary_texts.into_iter().skip(first_summary) {
            messages.push(Message::system(text));
        }
        messages.extend(input.raw_tail.iter().cloned());

        Window {
            messages,
            estimated_tokens: total,
            dropped_chronicles: first_chronicle,
            dropped_summaries: first_summary,
            starved,
        }
    }
}

/// Render a chronicle as a labelled system message body.
fn render_chronicle(summary: &Summary) -> String {
    format!("[Chronicle — {}]\n{}", summary.container, summary.text)
}

/// Render a unit summary as a labelled system message body.
fn render_unit_summary(summary: &Summary) -> String {
    format!("[Memory — {}]\n{}", summary.container, summary.text)
}
