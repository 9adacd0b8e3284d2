//! The compression scheduler: decides when and what to compress, drives the
//! summarizer, writes to the archive, and prunes the buffer.
//!
//! Four triggers:
//!
//! 1. **Unit-tier** — every unit transition compresses the departed unit's
//!    raw segment into one unit summary.
//! 2. **Aggregate-tier (threshold)** — when accumulated unit summaries reach
//!    the configured threshold, the oldest batch collapses into a chronicle.
//! 3. **Aggregate-tier (forced)** — an aggregate transition immediately
//!    compresses all remaining raw and unit-summary content for the
//!    departing aggregate into a final chronicle.
//! 4. **Budget fallback** — when the assembled window would still exceed its
//!    ceiling, the oldest raw messages beyond the recency floor are
//!    force-compressed.
//!
//! Failure discipline: summarizer trouble is retried with backoff, then
//! degraded to mechanical truncation — a turn is never blocked by a
//! summarizer. Archive write failure aborts the compression with session
//! state untouched and propagates, since losing archived history is the one
//! unacceptable outcome. State is only mutated after the corresponding
//! archive writes succeed, which (together with the archive's last-written
//! ranges) makes resume after a crash idempotent: already-archived material
//! is recognized and never compressed twice.

use crate::compress::boundary::{Boundary, BoundaryDetector};
use crate::config::CompressionConfig;
use crate::error::{ArchiveError, SummarizeError};
use crate::session::{ConversationBuffer, MemoryState};
use crate::summarize::{ContinuityHints, SummarizeRequest, Summarizer, mechanical_condense};
use crate::{ContainerId, MarkerKind, Segment, SourceRange, Summary, SummaryTier};
use crate::archive::ArchiveStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What a scheduling pass did. Merged across triggers within one turn.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompressionOutcome {
    /// Unit summaries written this pass.
    pub unit_summaries: usize,
    /// Chronicles written this pass.
    pub chronicles: usize,
    /// Summaries that fell back to mechanical truncation.
    pub degraded: usize,
    /// Boundaries recognized as already archived and skipped.
    pub skipped_archived: usize,
}

impl CompressionOutcome {
    fn merge(&mut self, other: CompressionOutcome) {
        self.unit_summaries += other.unit_summaries;
        self.chronicles += other.chronicles;
        self.degraded += other.degraded;
        self.skipped_archived += other.skipped_archived;
    }
}

/// Drives tiered compression against one session's state.
pub struct CompressionScheduler {
    config: CompressionConfig,
    detector: BoundaryDetector,
    summarizer: Arc<dyn Summarizer>,
}

impl CompressionScheduler {
    pub fn new(config: CompressionConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            config,
            detector: BoundaryDetector,
            summarizer,
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    // ── Marker-driven triggers ────────────────────────────────────

    /// Handle the transition marker at `marker_ordinal` (triggers 1–3).
    pub async fn on_marker(
        &self,
        state: &mut MemoryState,
        buffer: &mut ConversationBuffer,
        archive: &mut ArchiveStore,
        marker_ordinal: u64,
    ) -> Result<CompressionOutcome, ArchiveError> {
        let Some(boundary) = self.detector.boundary_for_marker(buffer, marker_ordinal) else {
            warn!("no boundary for ordinal {marker_ordinal}; nothing to compress");
            return Ok(CompressionOutcome::default());
        };

        match boundary.transition.kind {
            MarkerKind::UnitTransition => {
                let mut outcome = self.compress_unit(state, buffer, archive, &boundary).await?;
                outcome.merge(self.batch_chronicles(state, archive).await?);
                Ok(outcome)
            }
            MarkerKind::AggregateTransition => {
                self.compress_aggregate(state, buffer, archive, &boundary).await
            }
            MarkerKind::None => Ok(CompressionOutcome::default()),
        }
    }

    /// Replay any transition markers still in the live window. Called on
    /// session open: after a clean shutdown there are none; after a crash
    /// between archive write and manifest save, the marker is still live and
    /// the archive checks below make reprocessing a no-op.
    pub async fn catch_up(
        &self,
        state: &mut MemoryState,
        buffer: &mut ConversationBuffer,
        archive: &mut ArchiveStore,
    ) -> Result<CompressionOutcome, ArchiveError> {
        let mut outcome = CompressionOutcome::default();
        for marker_ordinal in self.detector.markers(buffer) {
            outcome.merge(self.on_marker(state, buffer, archive, marker_ordinal).await?);
        }
        Ok(outcome)
    }

    // ── Trigger 1: unit transitions ───────────────────────────────

    async fn compress_unit(
        &self,
        state: &mut MemoryState,
        buffer: &mut ConversationBuffer,
        archive: &mut ArchiveStore,
        boundary: &Boundary,
    ) -> Result<CompressionOutcome, ArchiveError> {
        let container = boundary.transition.from.clone();
        let destination = boundary.transition.to.clone();
        let mut outcome = CompressionOutcome::default();

        let archived = archive.list(&container)?;
        let segment_done = archived
            .iter()
            .any(|r| r.segment().is_some_and(|s| s.range.end >= boundary.range.end));
        let existing_summary = archived
            .iter()
            .rev()
            .filter_map(|r| r.summary())
            .find(|s| s.tier == SummaryTier::Unit && s.source_range == boundary.range)
            .cloned();

        let summary = match existing_summary {
            Some(summary) if segment_done => {
                info!(
                    "unit segment {:?} of '{container}' already archived; reconciling",
                    boundary.range,
                );
                outcome.skipped_archived += 1;
                summary
            }
            existing => {
                let Some(messages) = buffer.range_messages(boundary.range) else {
                    warn!("boundary range {:?} not fully live; skipping", boundary.range);
                    return Ok(outcome);
                };
                let segment = Segment {
                    container: container.clone(),
                    range: boundary.range,
                    messages,
                };
                if !segment_done {
                    archive.append_segment(&container, &segment)?;
                }

                let summary = match existing {
                    // The summary is already archived; only the segment
                    // write was missing.
                    Some(summary) => summary,
                    None => {
                        // Revisit continuity: merge with the unit's last summary.
                        let prior = archived
                            .iter()
                            .rev()
                            .filter_map(|r| r.summary())
                            .find(|s| s.tier == SummaryTier::Unit)
                            .map(|s| s.text.clone());
                        let (text, degraded) = self
                            .summarize_with_retry(&container, prior.as_deref(), &segment.text())
                            .await;
                        if degraded {
                            outcome.degraded += 1;
                        }
                        let summary = Summary {
                            container: container.clone(),
                            aggregate: state.current_aggregate.clone(),
                            tier: SummaryTier::Unit,
                            sequence: 0,
                            source_range: boundary.range,
                            text,
                            degraded,
                            created_at: Utc::now(),
                        };
                        let sequence = archive.append_summary(&container, &summary)?;
                        Summary { sequence, ..summary }
                    }
                };
                outcome.unit_summaries += 1;
                summary
            }
        };

        let already_tracked = state
            .unit_summaries
            .iter()
            .any(|s| s.container == summary.container && s.sequence == summary.sequence);
        if !already_tracked {
            state.unit_summaries.push(summary);
        }

        buffer.prune_through(boundary.marker_ordinal);
        state.watermark = boundary.marker_ordinal;
        state.current_unit = destination;
        info!(
            "unit '{container}' compressed ({} message(s) through ordinal {})",
            boundary.range.count(),
            boundary.marker_ordinal,
        );
        Ok(outcome)
    }

    // ── Trigger 2: chronicle batching ─────────────────────────────

    /// Collapse the oldest K unit summaries into a chronicle whenever the
    /// accumulated count reaches the threshold N.
    async fn batch_chronicles(
        &self,
        state: &mut MemoryState,
        archive: &mut ArchiveStore,
    ) -> Result<CompressionOutcome, ArchiveError> {
        let mut outcome = CompressionOutcome::default();

        while state.unit_summaries.len() >= self.config.chronicle_threshold {
            let k = self.config.chronicle_batch.min(state.unit_summaries.len());
            let batch: Vec<Summary> = state.unit_summaries.iter().take(k).cloned().collect();
            let aggregate = state.current_aggregate.clone();

            let input = render_summaries(&batch);
            let prior = state
                .chronicles
                .iter()
                .rev()
                .find(|c| c.container == aggregate)
                .map(|c| c.text.clone());
            let (text, degraded) = self
                .summarize_with_retry(&aggregate, prior.as_deref(), &input)
                .await;
            if degraded {
                outcome.degraded += 1;
            }

            let range = batch
                .iter()
                .map(|s| s.source_range)
                .reduce(|a, b| a.union(&b))
                .unwrap_or(SourceRange::new(state.watermark, state.watermark));
            let chronicle = Summary {
                container: aggregate.clone(),
                aggregate: aggregate.clone(),
                tier: SummaryTier::Aggregate,
                sequence: 0,
                source_range: range,
                text,
                degraded,
                created_at: Utc::now(),
            };
            let sequence = archive.append_summary(&aggregate, &chronicle)?;

            // Only now that the chronicle is durable do the batched
            // summaries leave the active set.
            state.unit_summaries.drain(..k);
            state.chronicles.push(Summary { sequence, ..chronicle });
            outcome.chronicles += 1;
            info!(
                "chronicle written for '{aggregate}': {} unit summaries collapsed, {} remain",
                k,
                state.unit_summaries.len(),
            );
        }

        Ok(outcome)
    }

    // ── Trigger 3: aggregate transitions ──────────────────────────

    async fn compress_aggregate(
        &self,
        state: &mut MemoryState,
        buffer: &mut ConversationBuffer,
        archive: &mut ArchiveStore,
        boundary: &Boundary,
    ) -> Result<CompressionOutcome, ArchiveError> {
        let departing = boundary.transition.from.clone();
        let destination = boundary.transition.to.clone();
        let mut outcome = CompressionOutcome::default();

        let archived = archive.list(&departing)?;
        let segment_done = archived
            .iter()
            .any(|r| r.segment().is_some_and(|s| s.range.end >= boundary.range.end));
        let existing_chronicle = archived
            .iter()
            .rev()
            .filter_map(|r| r.summary())
            .find(|s| s.tier == SummaryTier::Aggregate && s.source_range.end >= boundary.range.end)
            .cloned();

        let chronicle = match existing_chronicle {
            Some(chronicle) if segment_done => {
                info!("final chronicle for '{departing}' already archived; reconciling");
                outcome.skipped_archived += 1;
                chronicle
            }
            existing => {
                let Some(messages) = buffer.range_messages(boundary.range) else {
                    warn!("boundary range {:?} not fully live; skipping", boundary.range);
                    return Ok(outcome);
                };
                let segment = Segment {
                    container: departing.clone(),
                    range: boundary.range,
                    messages,
                };
                if !segment_done {
                    archive.append_segment(&departing, &segment)?;
                }

                let chronicle = match existing {
                    Some(chronicle) => chronicle,
                    None => {
                        // Everything left of the departing aggregate: the
                        // accumulated unit summaries plus the final raw scenes.
                        let mut input = render_summaries(&state.unit_summaries);
                        let raw = segment.text();
                        if !raw.trim().is_empty() {
                            input.push_str("=== FINAL SCENES ===\n");
                            input.push_str(&raw);
                        }
                        let prior = state
                            .chronicles
                            .iter()
                            .rev()
                            .find(|c| c.container == departing)
                            .map(|c| c.text.clone());
                        let (text, degraded) = self
                            .summarize_with_retry(&departing, prior.as_deref(), &input)
                            .await;
                        if degraded {
                            outcome.degraded += 1;
                        }

                        let range = state
                            .unit_summaries
                            .iter()
                            .map(|s| s.source_range)
                            .fold(boundary.range, |a, b| a.union(&b));
                        let chronicle = Summary {
                            container: departing.clone(),
                            aggregate: departing.clone(),
                            tier: SummaryTier::Aggregate,
                            sequence: 0,
                            source_range: range,
                            text,
                            degraded,
                            created_at: Utc::now(),
                        };
                        let sequence = archive.append_summary(&departing, &chronicle)?;
                        Summary { sequence, ..chronicle }
                    }
                };
                outcome.chronicles += 1;
                chronicle
            }
        };

        let already_tracked = state
            .chronicles
            .iter()
            .any(|c| c.container == chronicle.container && c.sequence == chronicle.sequence);
        if !already_tracked {
            state.chronicles.push(chronicle);
        }

        state.unit_summaries.clear();
        buffer.prune_through(boundary.marker_ordinal);
        state.watermark = boundary.marker_ordinal;
        state.current_aggregate = destination.clone();
        // Until the first unit marker inside the new aggregate, its threshold
        // doubles as the current location.
        state.current_unit = destination;
        info!("aggregate '{departing}' closed with a final chronicle");
        Ok(outcome)
    }

    // ── Trigger 4: budget fallback ────────────────────────────────

    /// Force-compress the oldest raw messages beyond the recency floor into
    /// a unit summary for the current unit. Returns `false` when the floor
    /// leaves nothing eligible.
    pub async fn force_compress_oldest(
        &self,
        state: &mut MemoryState,
        buffer: &mut ConversationBuffer,
        archive: &mut ArchiveStore,
    ) -> Result<bool, ArchiveError> {
        let tail_len = buffer.tail().len();
        if tail_len <= self.config.recency_floor {
            return Ok(false);
        }
        let count = tail_len - self.config.recency_floor;
        let start = buffer.tail_base();
        let range = SourceRange::new(start, start + count as u64 - 1);
        let Some(messages) = buffer.range_messages(range) else {
            return Ok(false);
        };

        let container = state.current_unit.clone();
        let segment = Segment {
            container: container.clone(),
            range,
            messages,
        };
        archive.append_segment(&container, &segment)?;

        let prior = archive
            .list(&container)?
            .iter()
            .rev()
            .filter_map(|r| r.summary())
            .find(|s| s.tier == SummaryTier::Unit)
            .map(|s| s.text.clone());
        let (text, degraded) = self
            .summarize_with_retry(&container, prior.as_deref(), &segment.text())
            .await;
        let summary = Summary {
            container: container.clone(),
            aggregate: state.current_aggregate.clone(),
            tier: SummaryTier::Unit,
            sequence: 0,
            source_range: range,
            text,
            degraded,
            created_at: Utc::now(),
        };
        let sequence = archive.append_summary(&container, &summary)?;
        state.unit_summaries.push(Summary { sequence, ..summary });

        buffer.prune_through(range.end);
        state.watermark = range.end;
        info!(
            "budget compression: {count} oldest raw message(s) of '{container}' archived, \
             {} kept under the recency floor",
            self.config.recency_floor,
        );

        // Forced summaries count toward the chronicle threshold like any other.
        self.batch_chronicles(state, archive).await?;
        Ok(true)
    }

    // ── Summarizer invocation ─────────────────────────────────────

    /// One summary, with bounded retry and mechanical degradation. Always
    /// returns text — `(text, degraded)` — because compression must never
    /// block a turn. Retries are sequential, so summaries for a container
    /// can never be reordered by a slow attempt.
    async fn summarize_with_retry(
        &self,
        container: &ContainerId,
        prior: Option<&str>,
        input: &str,
    ) -> (String, bool) {
        let policy = &self.config.retry;

        for attempt in 0..policy.max_attempts() {
            let req = SummarizeRequest {
                segment_text: input,
                hints: ContinuityHints {
                    container_name: container.as_str(),
                    prior_summary: prior,
                },
                max_chars: self.config.max_summary_chars,
            };

            let result = match tokio::time::timeout(
                self.config.summary_timeout,
                self.summarizer.summarize(req),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SummarizeError::Timeout(self.config.summary_timeout)),
            };

            let err = match result {
                Ok(text) => {
                    let text = text.trim().to_string();
                    if text.is_empty() {
                        SummarizeError::Malformed("empty summary".into())
                    } else if text.chars().count() > self.config.max_summary_chars {
                        SummarizeError::Malformed(format!(
                            "summary of {} chars exceeds bound of {}",
                            text.chars().count(),
                            self.config.max_summary_chars,
                        ))
                    } else {
                        return (text, false);
                    }
                }
                Err(e) => e,
            };

            if attempt + 1 < policy.max_attempts() {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "summarizer attempt {} for '{container}' failed ({err}); retrying in {:?}",
                    attempt + 1,
                    delay,
                );
                tokio::time::sleep(delay).await;
            } else {
                error!(
                    "summarizer exhausted {} attempt(s) for '{container}' ({err}); \
                     degrading to mechanical truncation",
                    policy.max_attempts(),
                );
            }
        }

        (mechanical_condense(input, self.config.max_summary_chars), true)
    }
}

/// Render a run of summaries as condensation input, labelled by container.
fn render_summaries(summaries: &[Summary]) -> String {
    let mut out = String::new();
    for s in summaries {
        out.push_str(&format!("[{}]\n{}\n\n", s.container, s.text));
    }
    out
}
