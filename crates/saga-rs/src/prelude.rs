//! Convenience re-exports for common `saga-rs` types.
//!
//! Meant to be glob-imported when embedding a session:
//!
//! ```ignore
//! use saga_rs::prelude::*;
//! ```
//!
//! This pulls in what the vast majority of callers need: the [`Session`]
//! and its config, [`Message`] constructors, the summarizer contract and
//! its ready-made implementations, and the subsystem delegation surface.
//! Specialized types (archive records, retry policy, boundary detection)
//! are intentionally excluded — import those from their modules directly.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ContainerId, MarkerKind, Message, MessageRole, SagaConfig, Segment, SourceRange, Summary,
    SummaryTier,
};

// ── Session ─────────────────────────────────────────────────────────
pub use crate::error::SessionError;
pub use crate::session::{ConversationBuffer, MemoryState, Session, TurnReport};

// ── Summarization ───────────────────────────────────────────────────
pub use crate::summarize::{
    ContinuityHints, FixedSummarizer, LlmSummarizer, SummarizeRequest, Summarizer,
    TruncatingSummarizer,
};

// ── Context window ──────────────────────────────────────────────────
pub use crate::context::{TokenEstimator, Window};

// ── Subsystem delegation ────────────────────────────────────────────
pub use crate::subsystem::{
    ContinuationSignal, ControllerState, EpisodeLog, EpisodeOutcome, Subsystem,
    SubsystemController, SubsystemFuture,
};
