//! Working-window assembly under a hard token ceiling.
//!
//! Two pieces:
//!
//! 1. **[`estimator`]** — the pluggable [`TokenEstimator`] trait and the
//!    default chars-per-token heuristic. Estimates are approximate by
//!    contract; the ceiling is enforced against the estimate.
//!
//! 2. **[`assembler`]** — [`ContextAssembler`] builds each turn's window in
//!    fixed order (framing, chronicles, unit summaries, raw tail) and
//!    resolves overflow by collapsing the oldest compressed tiers first,
//!    never the raw tail.

pub mod assembler;
pub mod estimator;

pub use assembler::{ContextAssembler, Window, WindowInput};
pub use estimator::{CharsPerToken, DEFAULT_CHARS_PER_TOKEN, TokenEstimator};
