//! File-backed archive store.
//!
//! Directory layout:
//! ```text
//! archive_root/
//!   the-drowned-inn/
//!     the-drowned-inn_segment_0001.json
//!     the-drowned-inn_unit_0002.json
//!   greyhollow/
//!     greyhollow_segment_0003.json
//!     greyhollow_chronicle_0004.json
//! ```
//!
//! Writes are atomic (temp file + rename). Records are never rewritten or
//! deleted, so prior state is preserved by construction: a name clash is
//! refused as [`ArchiveError::DuplicateRecord`] rather than overwritten.
//! Sequence numbers are recovered by scanning existing record names on first
//! touch of a container, which makes them durable and never reused across
//! process restarts.

use crate::error::ArchiveError;
use crate::{ContainerId, Segment, SourceRange, Summary, SummaryTier};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ── Records ────────────────────────────────────────────────────────

/// What kind of record a file holds; encoded in the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Raw segment content, archived verbatim.
    Segment,
    /// A unit-tier summary.
    UnitSummary,
    /// An aggregate-tier chronicle.
    Chronicle,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Segment => "segment",
            RecordKind::UnitSummary => "unit",
            RecordKind::Chronicle => "chronicle",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "segment" => Some(RecordKind::Segment),
            "unit" => Some(RecordKind::UnitSummary),
            "chronicle" => Some(RecordKind::Chronicle),
            _ => None,
        }
    }

    pub fn for_tier(tier: SummaryTier) -> Self {
        match tier {
            SummaryTier::Unit => RecordKind::UnitSummary,
            SummaryTier::Aggregate => RecordKind::Chronicle,
        }
    }
}

/// Payload of an archived record.
#[derive(Debug, Clone)]
pub enum RecordPayload {
    Segment(Segment),
    Summary(Summary),
}

/// One archived record: a segment or summary under a container's sequence.
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub kind: RecordKind,
    pub sequence: u64,
    pub payload: RecordPayload,
}

impl ArchiveRecord {
    /// The summary payload, if this record holds one.
    pub fn summary(&self) -> Option<&Summary> {
        match &self.payload {
            RecordPayload::Summary(s) => Some(s),
            RecordPayload::Segment(_) => None,
        }
    }

    /// The segment payload, if this record holds one.
    pub fn segment(&self) -> Option<&Segment> {
        match &self.payload {
            RecordPayload::Segment(s) => Some(s),
            RecordPayload::Summary(_) => None,
        }
    }
}

// ── Store ──────────────────────────────────────────────────────────

/// Append-only archive rooted at a directory.
pub struct ArchiveStore {
    root: PathBuf,
    /// Cached next sequence per container slug, seeded from a directory scan
    /// on first touch.
    next_seq: HashMap<String, u64>,
}

impl ArchiveStore {
    /// Open (creating if needed) an archive rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| ArchiveError::Io {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self {
            root,
            next_seq: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &ContainerId) -> PathBuf {
        self.root.join(container.slug())
    }

    fn record_filename(slug: &str, kind: RecordKind, sequence: u64) -> String {
        format!("{slug}_{}_{sequence:04}.json", kind.as_str())
    }

    /// Parse `{slug}_{kind}_{seq}.json` back into its parts.
    fn parse_filename(name: &str) -> Option<(RecordKind, u64)> {
        let stem = name.strip_suffix(".json")?;
        let (rest, seq_str) = stem.rsplit_once('_')?;
        let (_slug, kind_str) = rest.rsplit_once('_')?;
        let kind = RecordKind::parse(kind_str)?;
        let sequence = seq_str.parse::<u64>().ok()?;
        Some((kind, sequence))
    }

    /// Allocate the next sequence number for a container, scanning existing
    /// records on first touch so numbers survive restarts and are never
    /// reused.
    fn next_sequence(&mut self, container: &ContainerId) -> Result<u64, ArchiveError> {
        let slug = container.slug();
        if let Some(seq) = self.next_seq.get_mut(&slug) {
            let allocated = *seq;
            *seq += 1;
            return Ok(allocated);
        }

        let dir = self.container_dir(container);
        let mut max_seen = 0u64;
        if dir.exists() {
            let entries = std::fs::read_dir(&dir).map_err(|e| ArchiveError::Io {
                path: dir.clone(),
                source: e,
            })?;
            for entry in entries {
                let entry = entry.map_err(|e| ArchiveError::Io {
                    path: dir.clone(),
                    source: e,
                })?;
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some((_, seq)) = Self::parse_filename(&name) {
                    max_seen = max_seen.max(seq);
                }
            }
        }

        let allocated = max_seen + 1;
        self.next_seq.insert(slug, allocated + 1);
        Ok(allocated)
    }

    /// Atomic write: temp file in the same directory, then rename into place.
    fn write_record(
        &self,
        container: &ContainerId,
        kind: RecordKind,
        sequence: u64,
        json: &str,
    ) -> Result<(), ArchiveError> {
        let dir = self.container_dir(container);
        std::fs::create_dir_all(&dir).map_err(|e| ArchiveError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let final_path = dir.join(Self::record_filename(&container.slug(), kind, sequence));
        if final_path.exists() {
            return Err(ArchiveError::DuplicateRecord { path: final_path });
        }

        let tmp_path = final_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| ArchiveError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| ArchiveError::Io {
            path: final_path.clone(),
            source: e,
        })?;

        debug!("archived {}", final_path.display());
        Ok(())
    }

    /// Archive a raw segment. Returns the allocated sequence number.
    pub fn append_segment(
        &mut self,
        container: &ContainerId,
        segment: &Segment,
    ) -> Result<u64, ArchiveError> {
        let sequence = self.next_sequence(container)?;
        let json = serde_json::to_string_pretty(segment)?;
        self.write_record(container, RecordKind::Segment, sequence, &json)?;
        Ok(sequence)
    }

    /// Archive a summary under the kind matching its tier. Returns the
    /// allocated sequence number (also patched into the stored summary).
    pub fn append_summary(
        &mut self,
        container: &ContainerId,
        summary: &Summary,
    ) -> Result<u64, ArchiveError> {
        let sequence = self.next_sequence(container)?;
        let stored = Summary {
            sequence,
            ..summary.clone()
        };
        let json = serde_json::to_string_pretty(&stored)?;
        self.write_record(container, RecordKind::for_tier(summary.tier), sequence, &json)?;
        Ok(sequence)
    }

    /// All records for a container, ordered by sequence number.
    pub fn list(&self, container: &ContainerId) -> Result<Vec<ArchiveRecord>, ArchiveError> {
        let dir = self.container_dir(container);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| ArchiveError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ArchiveError::Io {
                path: dir.clone(),
                source: e,
            })?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((kind, sequence)) = Self::parse_filename(&name) else {
                // Temp leftovers or foreign files — not records.
                warn!("skipping non-record file in archive: {name}");
                continue;
            };

            let path = entry.path();
            let json = std::fs::read_to_string(&path).map_err(|e| ArchiveError::Io {
                path: path.clone(),
                source: e,
            })?;
            let payload = match kind {
                RecordKind::Segment => RecordPayload::Segment(
                    serde_json::from_str::<Segment>(&json).map_err(|e| ArchiveError::Corrupt {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?,
                ),
                RecordKind::UnitSummary | RecordKind::Chronicle => RecordPayload::Summary(
                    serde_json::from_str::<Summary>(&json).map_err(|e| ArchiveError::Corrupt {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?,
                ),
            };
            records.push(ArchiveRecord {
                kind,
                sequence,
                payload,
            });
        }

        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    /// Source range of the most recently archived raw segment for a
    /// container. Drives idempotent resume: a candidate segment whose range
    /// end is not past this has already been compressed.
    pub fn last_segment_range(
        &self,
        container: &ContainerId,
    ) -> Result<Option<SourceRange>, ArchiveError> {
        let records = self.list(container)?;
        Ok(records
            .iter()
            .rev()
            .find_map(|r| r.segment().map(|s| s.range)))
    }

    /// Container slugs present in the archive, sorted.
    pub fn container_slugs(&self) -> Result<Vec<String>, ArchiveError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| ArchiveError::Io {
            path: self.root.clone(),
            source: e,
        })?;
        let mut slugs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ArchiveError::Io {
                path: self.root.clone(),
                source: e,
            })?;
            if entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                slugs.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        slugs.sort();
        Ok(slugs)
    }
}
