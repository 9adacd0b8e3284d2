//! The session: one explicit object owning buffer, archive, scheduler,
//! assembler, and subsystem controller.
//!
//! Every component receives the session's state by handle — there are no
//! globals and no singletons. A turn flows through
//! [`Session::record`]: append to the durable buffer, let the scheduler
//! react to any transition marker, persist the manifest. The bounded window
//! for the next generation call comes from [`Session::window`], which runs
//! budget-driven forced compression before assembly when needed.
//!
//! Reopening a session is idempotent: the manifest says where the live
//! window begins, the archive says what was already compressed, and any
//! marker left live by a crash is replayed without double-compressing.

pub mod buffer;
pub mod manifest;

pub use buffer::ConversationBuffer;
pub use manifest::SessionManifest;

use crate::archive::ArchiveStore;
use crate::compress::{CompressionOutcome, CompressionScheduler};
use crate::config::SagaConfig;
use crate::context::{CharsPerToken, ContextAssembler, Window, WindowInput};
use crate::error::SessionError;
use crate::subsystem::{ContinuationSignal, ControllerState, Subsystem, SubsystemController};
use crate::summarize::Summarizer;
use crate::{ContainerId, Message, Summary, SummaryTier};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

// ── Memory tiers ───────────────────────────────────────────────────

/// The in-memory view of the session's compressed history: which containers
/// are open, which summaries are still individually visible, and where the
/// live window begins.
#[derive(Debug, Clone)]
pub struct MemoryState {
    /// Aggregate the session currently occupies.
    pub current_aggregate: ContainerId,
    /// Unit the session currently occupies.
    pub current_unit: ContainerId,
    /// Chronicles across the whole session, oldest first.
    pub chronicles: Vec<Summary>,
    /// Active unit summaries for the current aggregate (not yet chronicled),
    /// oldest first.
    pub unit_summaries: Vec<Summary>,
    /// Ordinal of the last compressed message.
    pub watermark: u64,
}

impl MemoryState {
    pub fn new(aggregate: ContainerId, unit: ContainerId) -> Self {
        Self {
            current_aggregate: aggregate,
            current_unit: unit,
            chronicles: Vec::new(),
            unit_summaries: Vec::new(),
            watermark: 0,
        }
    }
}

// ── Turn report ────────────────────────────────────────────────────

/// What one recorded message caused.
#[derive(Debug)]
pub struct TurnReport {
    /// Ordinal assigned to the recorded message.
    pub ordinal: u64,
    /// Compression work the message triggered (zeroed for ordinary turns).
    pub compression: CompressionOutcome,
}

// ── Session ────────────────────────────────────────────────────────

/// A running story session.
pub struct Session {
    config: SagaConfig,
    state: MemoryState,
    buffer: ConversationBuffer,
    archive: ArchiveStore,
    scheduler: CompressionScheduler,
    assembler: ContextAssembler,
    controller: SubsystemController,
    turns: u64,
}

impl Session {
    /// Open (or resume) a session. `start_aggregate` and `start_unit` seed a
    /// fresh session's location; an existing manifest wins over them.
    pub async fn open(
        config: SagaConfig,
        summarizer: Arc<dyn Summarizer>,
        start_aggregate: &str,
        start_unit: &str,
    ) -> Result<Self, SessionError> {
        let dir = config.session_dir();
        let loaded = SessionManifest::load(&dir)?;
        let resuming = loaded.is_some();
        let (aggregate, unit, watermark, turns) = match loaded {
            Some(m) => (m.current_aggregate, m.current_unit, m.watermark, m.turns),
            None => (
                ContainerId::new(start_aggregate),
                ContainerId::new(start_unit),
                0,
                0,
            ),
        };

        let buffer = ConversationBuffer::open(&dir, &config.framing, watermark)?;
        let archive = ArchiveStore::open(dir.join("archive"))?;

        let mut state = MemoryState::new(aggregate, unit);
        state.watermark = watermark;
        Self::load_memory(&archive, &mut state)?;

        let assembler = ContextAssembler::new(
            Box::new(CharsPerToken::new(config.context.chars_per_token)),
            config.context.token_ceiling,
        );
        let scheduler = CompressionScheduler::new(config.compression.clone(), summarizer);

        let mut session = Self {
            config,
            state,
            buffer,
            archive,
            scheduler,
            assembler,
            controller: SubsystemController::new(),
            turns,
        };

        // Replay any markers a previous process left unfinished. On a clean
        // state this is a no-op.
        let outcome = session
            .scheduler
            .catch_up(
                &mut session.state,
                &mut session.buffer,
                &mut session.archive,
            )
            .await?;
        session.save_manifest()?;

        if resuming {
            info!(
                "session '{}' resumed: watermark {}, {} chronicle(s), {} active summary(ies)",
                session.config.session_id,
                session.state.watermark,
                session.state.chronicles.len(),
                session.state.unit_summaries.len(),
            );
        }
        if outcome.skipped_archived > 0 {
            debug!(
                "resume reconciled {} already-archived boundary(ies)",
                outcome.skipped_archived,
            );
        }
        Ok(session)
    }

    /// Rebuild the chronicle list and the active unit-summary set from the
    /// archive. A unit summary is active when it belongs to the current
    /// aggregate and no chronicle of that aggregate covers its range yet.
    fn load_memory(archive: &ArchiveStore, state: &mut MemoryState) -> Result<(), SessionError> {
        let mut chronicles: Vec<Summary> = Vec::new();
        let mut units: Vec<Summary> = Vec::new();
        for slug in archive.container_slugs()? {
            for record in archive.list(&ContainerId::new(slug))? {
                if let Some(summary) = record.summary() {
                    match summary.tier {
                        SummaryTier::Aggregate => chronicles.push(summary.clone()),
                        SummaryTier::Unit => units.push(summary.clone()),
                    }
                }
            }
        }
        chronicles.sort_by_key(|c| (c.created_at, c.sequence));

        let chronicled_through = chronicles
            .iter()
            .filter(|c| c.aggregate == state.current_aggregate)
            .map(|c| c.source_range.end)
            .max()
            .unwrap_or(0);
        let mut active: Vec<Summary> = units
            .into_iter()
            .filter(|s| {
                s.aggregate == state.current_aggregate
                    && s.source_range.end > chronicled_through
            })
            .collect();
        active.sort_by_key(|s| s.source_range.start);

        state.chronicles = chronicles;
        state.unit_summaries = active;
        Ok(())
    }

    /// Record one message: durable append, then whatever compression the
    /// message triggers, then manifest persistence.
    pub async fn record(&mut self, message: Message) -> Result<TurnReport, SessionError> {
        let is_marker = message.marker.is_transition();
        let ordinal = self.buffer.append(message)?;

        let compression = if is_marker {
            self.scheduler
                .on_marker(&mut self.state, &mut self.buffer, &mut self.archive, ordinal)
                .await?
        } else {
            CompressionOutcome::default()
        };

        self.turns += 1;
        self.save_manifest()?;
        Ok(TurnReport {
            ordinal,
            compression,
        })
    }

    /// Assemble the bounded window for the next generation call. When even
    /// the marker-driven triggers left the window over its ceiling, the
    /// oldest raw messages beyond the recency floor are force-compressed
    /// first; assembly then collapses old chronicles as a last resort.
    pub async fn window(&mut self) -> Result<Window, SessionError> {
        loop {
            let estimate = self.assembler.estimate_full(&self.window_input());
            if estimate <= self.assembler.token_ceiling() {
                break;
            }
            let compressed = self
                .scheduler
                .force_compress_oldest(&mut self.state, &mut self.buffer, &mut self.archive)
                .await?;
            if !compressed {
                break;
            }
            self.save_manifest()?;
        }
        Ok(self.assembler.assemble(self.window_input()))
    }

    fn window_input(&self) -> WindowInput<'_> {
        WindowInput {
            framing: self.buffer.framing(),
            chronicles: &self.state.chronicles,
            unit_summaries: &self.state.unit_summaries,
            raw_tail: self.buffer.tail(),
        }
    }

    /// Hand the interaction loop to an isolated sub-loop; its single
    /// synthetic summary message is recorded like any other turn.
    pub async fn delegate(
        &mut self,
        subsystem: &mut dyn Subsystem,
    ) -> Result<ContinuationSignal, SessionError> {
        let signal = self
            .controller
            .delegate(&mut self.buffer, subsystem)
            .await?;
        self.turns += 1;
        self.save_manifest()?;
        Ok(signal)
    }

    /// Acknowledge the last continuation signal, returning the controller to
    /// idle.
    pub fn acknowledge(&mut self) -> Result<(), SessionError> {
        self.controller.acknowledge()
    }

    fn save_manifest(&self) -> Result<(), SessionError> {
        let manifest = SessionManifest {
            session_id: self.config.session_id.clone(),
            current_aggregate: self.state.current_aggregate.clone(),
            current_unit: self.state.current_unit.clone(),
            watermark: self.state.watermark,
            turns: self.turns,
            updated_at: Utc::now(),
        };
        manifest.save(&self.config.session_dir())?;
        Ok(())
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn state(&self) -> &MemoryState {
        &self.state
    }

    pub fn buffer(&self) -> &ConversationBuffer {
        &self.buffer
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    pub fn controller_state(&self) -> ControllerState {
        self.controller.state()
    }

    pub fn turns(&self) -> u64 {
        self.turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystem::{EpisodeOutcome, SubsystemFuture};
    use crate::summarize::FixedSummarizer;

    fn config(dir: &std::path::Path) -> SagaConfig {
        SagaConfig::new("test-session", "You narrate a grim tale.").with_root_dir(dir)
    }

    fn summarizer() -> Arc<dyn Summarizer> {
        Arc::new(FixedSummarizer::new("a condensed memory"))
    }

    async fn open(dir: &std::path::Path) -> Session {
        Session::open(config(dir), summarizer(), "Greyhollow", "The Drowned Inn")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn plain_turns_do_not_compress() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path()).await;

        let report = session.record(Message::user("hello")).await.unwrap();
        assert_eq!(report.ordinal, 1);
        assert_eq!(report.compression.unit_summaries, 0);
        assert_eq!(session.buffer().tail().len(), 1);
    }

    #[tokio::test]
    async fn unit_marker_compresses_and_updates_location() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path()).await;

        session.record(Message::user("looking around")).await.unwrap();
        let report = session
            .record(Message::unit_transition("The Drowned Inn", "The Salt Road"))
            .await
            .unwrap();

        assert_eq!(report.compression.unit_summaries, 1);
        assert_eq!(session.state().current_unit.as_str(), "The Salt Road");
        assert!(session.buffer().tail().is_empty());
        assert_eq!(session.state().unit_summaries.len(), 1);
    }

    #[tokio::test]
    async fn reopen_resumes_without_double_compression() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut session = open(dir.path()).await;
            session.record(Message::user("scene one")).await.unwrap();
            session
                .record(Message::unit_transition("The Drowned Inn", "Road"))
                .await
                .unwrap();
            session.record(Message::user("scene two")).await.unwrap();
        }

        let session = open(dir.path()).await;
        assert_eq!(session.state().unit_summaries.len(), 1);
        assert_eq!(session.state().current_unit.as_str(), "Road");
        assert_eq!(session.buffer().tail().len(), 1);
        assert_eq!(session.buffer().tail()[0].content, "scene two");

        let records = session
            .archive()
            .list(&ContainerId::new("The Drowned Inn"))
            .unwrap();
        assert_eq!(records.len(), 2, "reopen must not add records");
    }

    #[tokio::test]
    async fn resume_filters_chronicled_summaries_out_of_the_active_set() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path()).with_chronicle_policy(3, 2);
        {
            let mut session = Session::open(cfg.clone(), summarizer(), "Greyhollow", "U0")
                .await
                .unwrap();
            for i in 0..3 {
                session.record(Message::user(format!("in unit {i}"))).await.unwrap();
                session
                    .record(Message::unit_transition(format!("U{i}"), format!("U{}", i + 1)))
                    .await
                    .unwrap();
            }
            // Threshold 3, batch 2: one chronicle, one active summary left.
            assert_eq!(session.state().chronicles.len(), 1);
            assert_eq!(session.state().unit_summaries.len(), 1);
        }

        let session = Session::open(cfg, summarizer(), "Greyhollow", "U0")
            .await
            .unwrap();
        assert_eq!(session.state().chronicles.len(), 1);
        assert_eq!(session.state().unit_summaries.len(), 1);
        assert_eq!(session.state().unit_summaries[0].container.as_str(), "U2");
    }

    #[tokio::test]
    async fn window_holds_the_ceiling_by_forcing_compression() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path()).with_token_ceiling(120).with_recency_floor(2);
        let mut session = Session::open(cfg, summarizer(), "Greyhollow", "The Drowned Inn")
            .await
            .unwrap();

        for i in 0..10 {
            session
                .record(Message::user(format!("turn {i}: {}", "x".repeat(80))))
                .await
                .unwrap();
        }

        let window = session.window().await.unwrap();
        assert!(
            window.estimated_tokens <= 120 || window.starved,
            "ceiling must hold outside the documented starved fallback",
        );
        // Forced compression left only the recency floor raw.
        assert_eq!(session.buffer().tail().len(), 2);
        assert!(!session.state().unit_summaries.is_empty());
    }

    #[tokio::test]
    async fn window_orders_framing_chronicles_summaries_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path()).await;

        session.record(Message::user("at the inn")).await.unwrap();
        session
            .record(Message::unit_transition("The Drowned Inn", "Road"))
            .await
            .unwrap();
        session.record(Message::user("on the road")).await.unwrap();
        session
            .record(Message::aggregate_transition("Greyhollow", "Ember Wastes"))
            .await
            .unwrap();
        session.record(Message::user("a new land")).await.unwrap();

        let window = session.window().await.unwrap();
        let contents: Vec<&str> = window.messages.iter().map(|m| m.content.as_str()).collect();
        assert!(contents[0].contains("grim tale"));
        assert!(contents[1].contains("Chronicle — Greyhollow"));
        assert_eq!(*contents.last().unwrap(), "a new land");
    }

    struct OneShotEpisode;

    impl Subsystem for OneShotEpisode {
        fn kind(&self) -> &str {
            "combat"
        }

        fn run<'a>(&'a mut self, _buffer: &'a ConversationBuffer) -> SubsystemFuture<'a> {
            Box::pin(async {
                Ok(EpisodeOutcome {
                    summary: "The duel ended with a disarmed rival.".into(),
                    signal: ContinuationSignal::ResumeWithNarration,
                })
            })
        }
    }

    #[tokio::test]
    async fn delegation_flows_through_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = open(dir.path()).await;
        session.record(Message::user("he draws steel")).await.unwrap();

        let mut episode = OneShotEpisode;
        let signal = session.delegate(&mut episode).await.unwrap();
        assert_eq!(signal, ContinuationSignal::ResumeWithNarration);
        assert_eq!(session.controller_state(), ControllerState::AwaitingContinuation);
        session.acknowledge().unwrap();

        let tail = session.buffer().tail();
        assert_eq!(tail.len(), 2);
        assert!(tail[1].content.contains("disarmed rival"));
    }
}
