//! Tiered narrative memory for effectively unbounded interactive story sessions.
//!
//! `saga-rs` keeps an ever-growing interaction log inside a fixed token budget.
//! As the session moves between locations (*units*) and adventures
//! (*aggregates*), transition markers delimit compressible segments; each
//! departed unit is condensed into one summary, accumulated unit summaries are
//! periodically collapsed into aggregate-tier chronicles, and everything that
//! leaves the working buffer is durably archived first. Every turn, a bounded
//! working window is reassembled from framing + chronicles + summaries + the
//! raw recent tail.
//!
//! # Getting started
//!
//! ```ignore
//! use saga_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let config = SagaConfig::new("story-1", "You are the narrator of a grim fairy tale.")
//!         .with_root_dir(".saga")
//!         .with_token_ceiling(24_000);
//!
//!     let summarizer = std::sync::Arc::new(TruncatingSummarizer::default());
//!     let mut session = Session::open(config, summarizer, "Greyhollow", "The Drowned Inn").await?;
//!
//!     session.record(Message::user("I step through the door.")).await?;
//!     session.record(Message::assistant("The inn smells of wet rope and tallow.")).await?;
//!
//!     // An upstream marker ends the current unit and triggers compression.
//!     session.record(Message::unit_transition("The Drowned Inn", "The Salt Road")).await?;
//!
//!     let window = session.window().await?;
//!     for msg in &window.messages {
//!         println!("[{}] {}", msg.role, msg.content);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | [`Session`](session::Session) glue object, durable [`ConversationBuffer`](session::ConversationBuffer), manifest |
//! | [`compress`] | [`BoundaryDetector`](compress::BoundaryDetector), [`CompressionScheduler`](compress::CompressionScheduler), retry policy |
//! | [`summarize`] | [`Summarizer`](summarize::Summarizer) contract, LLM-backed and deterministic implementations |
//! | [`archive`] | [`ArchiveStore`](archive::ArchiveStore) — append-only, per-container sequential record log |
//! | [`context`] | [`TokenEstimator`](context::TokenEstimator), [`ContextAssembler`](context::ContextAssembler) |
//! | [`subsystem`] | [`SubsystemController`](subsystem::SubsystemController) — signal-driven delegation to isolated sub-loops |
//!
//! # Design principles
//!
//! 1. **The window is the scarcest resource.** Everything that leaves the raw
//!    tail is compressed in tiers and the assembled window never exceeds the
//!    configured ceiling, with one documented (and logged) terminal exception.
//!
//! 2. **Archive before forgetting.** No message is pruned from the working
//!    buffer until its segment and summary are durably archived. Archive
//!    writes are atomic and append-only; sequence numbers survive restarts.
//!
//! 3. **Compression never blocks a turn.** Summarizer failures are retried,
//!    then degraded to mechanical truncation — the worst case is a less
//!    detailed memory, never a stuck session.
//!
//! 4. **Explicit handles, explicit signals.** One [`Session`](session::Session)
//!    object owns all mutable state, and delegated sub-loops hand control back
//!    through a closed [`ContinuationSignal`](subsystem::ContinuationSignal)
//!    enum consumed by the caller's dispatch loop — no hidden globals, no ad
//!    hoc callbacks.

pub mod archive;
pub mod compress;
pub mod config;
pub mod context;
pub mod error;
pub mod prelude;
pub mod session;
pub mod subsystem;
pub mod summarize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Re-export the types almost every caller touches.
pub use config::SagaConfig;
pub use error::SessionError;
pub use session::Session;

// ── Marker protocol ────────────────────────────────────────────────

/// Prefix of unit-transition marker messages from the upstream game logic.
pub const UNIT_MARKER_PREFIX: &str = "Unit transition: ";

/// Prefix of aggregate-transition marker messages from the upstream game logic.
pub const AGGREGATE_MARKER_PREFIX: &str = "Aggregate transition: ";

/// Kind of transition marker a message carries, derived from its content at
/// construction time. Almost all messages are [`MarkerKind::None`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerKind {
    /// Ordinary narrative or player message.
    None,
    /// The session left one unit (location) for another.
    UnitTransition,
    /// The session left one aggregate (adventure) for another.
    AggregateTransition,
}

impl MarkerKind {
    /// Classify a message body against the marker protocol.
    pub fn classify(content: &str) -> Self {
        if parse_transition(content, UNIT_MARKER_PREFIX).is_some() {
            MarkerKind::UnitTransition
        } else if parse_transition(content, AGGREGATE_MARKER_PREFIX).is_some() {
            MarkerKind::AggregateTransition
        } else {
            MarkerKind::None
        }
    }

    /// Whether this is a transition marker of either tier.
    pub fn is_transition(&self) -> bool {
        !matches!(self, MarkerKind::None)
    }
}

/// A parsed transition marker: which tier, and the container names involved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub kind: MarkerKind,
    pub from: ContainerId,
    pub to: ContainerId,
}

fn parse_transition<'a>(content: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = content.strip_prefix(prefix)?;
    let (from, to) = rest.split_once(" to ")?;
    let (from, to) = (from.trim(), to.trim());
    if from.is_empty() || to.is_empty() {
        return None;
    }
    Some((from, to))
}

// ── Messages ───────────────────────────────────────────────────────

/// Role of a message in the session log.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in the session log. Immutable once appended to the
/// [`ConversationBuffer`](session::ConversationBuffer) — nothing in this crate
/// hands out `&mut Message` for buffered content.
///
/// The marker kind is derived from the content when the message is built, so
/// a message whose body matches the marker protocol always carries the
/// matching tag. Validation happens here, not in downstream scans.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub marker: MarkerKind,
}

impl Message {
    /// Build a message, classifying its marker kind from the content.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        let content = content.into();
        let marker = MarkerKind::classify(&content);
        Self {
            role,
            content,
            timestamp: Utc::now(),
            marker,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Build a unit-transition marker in the upstream protocol format.
    pub fn unit_transition(from: impl AsRef<str>, to: impl AsRef<str>) -> Self {
        Self::new(
            MessageRole::System,
            format!("{UNIT_MARKER_PREFIX}{} to {}", from.as_ref(), to.as_ref()),
        )
    }

    /// Build an aggregate-transition marker in the upstream protocol format.
    pub fn aggregate_transition(from: impl AsRef<str>, to: impl AsRef<str>) -> Self {
        Self::new(
            MessageRole::System,
            format!(
                "{AGGREGATE_MARKER_PREFIX}{} to {}",
                from.as_ref(),
                to.as_ref()
            ),
        )
    }

    /// Parse the transition carried by this message, if it is a marker.
    pub fn transition(&self) -> Option<Transition> {
        let prefix = match self.marker {
            MarkerKind::UnitTransition => UNIT_MARKER_PREFIX,
            MarkerKind::AggregateTransition => AGGREGATE_MARKER_PREFIX,
            MarkerKind::None => return None,
        };
        let (from, to) = parse_transition(&self.content, prefix)?;
        Some(Transition {
            kind: self.marker,
            from: ContainerId::new(from),
            to: ContainerId::new(to),
        })
    }
}

// ── Containers ─────────────────────────────────────────────────────

/// Identity of a unit or aggregate container.
///
/// Carries the display name from the marker protocol; [`ContainerId::slug`]
/// derives the filesystem-safe form used by the archive. Two containers with
/// names that slug identically share an archive directory — upstream is
/// expected to keep names distinct.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased, dash-separated form safe for file and directory names.
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.0.len());
        let mut last_dash = true;
        for c in self.0.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
                last_dash = false;
            } else if !last_dash {
                slug.push('-');
                last_dash = true;
            }
        }
        while slug.ends_with('-') {
            slug.pop();
        }
        if slug.is_empty() {
            slug.push_str("container");
        }
        slug
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Segments and summaries ─────────────────────────────────────────

/// Inclusive range of session-global message ordinals.
///
/// Ordinals are assigned at append time and never renumbered; pruning the
/// buffer advances a watermark but leaves ordinals stable, so archived ranges
/// stay meaningful across restarts.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceRange {
    pub start: u64,
    pub end: u64,
}

impl SourceRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "inverted source range {start}..{end}");
        Self { start, end }
    }

    /// Number of ordinals covered. An inclusive range covers at least one.
    pub fn count(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Smallest range covering both `self` and `other`.
    pub fn union(&self, other: &SourceRange) -> SourceRange {
        SourceRange::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// A contiguous run of raw messages between two transition markers, scoped to
/// one container. The closing marker is included — it is part of what gets
/// archived and pruned.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Segment {
    pub container: ContainerId,
    pub range: SourceRange,
    pub messages: Vec<Message>,
}

impl Segment {
    /// Render the segment as summarizer input, one `[role]: content` line per
    /// message.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for msg in &self.messages {
            out.push_str(&format!("[{}]: {}\n", msg.role, msg.content));
        }
        out
    }
}

/// Compression tier of a summary.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SummaryTier {
    /// One departed unit's raw segment, condensed.
    Unit,
    /// A chronicle: multiple unit summaries (and any remaining raw content)
    /// for one aggregate, condensed.
    Aggregate,
}

/// An immutable summary of archived content. Never overwritten — revisiting a
/// container allocates a fresh sequence number.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Summary {
    pub container: ContainerId,
    /// The enclosing aggregate at creation time. Unit summaries are nested in
    /// an open aggregate lifecycle; for chronicles this equals `container`.
    pub aggregate: ContainerId,
    pub tier: SummaryTier,
    pub sequence: u64,
    pub source_range: SourceRange,
    pub text: String,
    /// True when the summarizer failed and the text is a mechanical
    /// head-and-tail truncation instead of a real condensation.
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}
