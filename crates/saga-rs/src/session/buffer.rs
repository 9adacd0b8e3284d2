//! Durable, ordered conversation log.
//!
//! Every message is written to an append-only JSONL file (`log.jsonl`) and
//! synced before the append is acknowledged, so the buffer is always
//! reconstructable from disk. Appends are fail-closed: serialization happens
//! before any byte is written, and an I/O error leaves both the log and the
//! in-memory window unchanged.
//!
//! Messages carry stable session-global **ordinals** (their line number in
//! the log). Pruning removes compressed messages from the in-memory window
//! but never rewrites the log and never renumbers — archived source ranges
//! stay valid forever.

use crate::error::BufferError;
use crate::{Message, MessageRole, SourceRange};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the append-only message log inside a session directory.
pub const LOG_FILE: &str = "log.jsonl";

/// The active session's message log: a durable journal plus the in-memory
/// live window (framing + unpruned tail).
pub struct ConversationBuffer {
    log_path: PathBuf,
    log: File,
    /// The single system framing message, ordinal 0. Never pruned.
    framing: Message,
    /// Live messages after the last pruning point, oldest first.
    tail: Vec<Message>,
    /// Ordinal of `tail[0]`.
    tail_base: u64,
    /// Ordinal the next append will receive (= lines in the log).
    next_ordinal: u64,
}

impl ConversationBuffer {
    /// Open a session's buffer, creating the log with the given framing
    /// message if none exists. `watermark` is the last compressed ordinal
    /// from the session manifest; everything after it is live.
    pub fn open(
        dir: &Path,
        framing_content: &str,
        watermark: u64,
    ) -> Result<Self, BufferError> {
        std::fs::create_dir_all(dir)?;
        let log_path = dir.join(LOG_FILE);

        if log_path.exists() {
            Self::load(&log_path, watermark)
        } else {
            let framing = Message::system(framing_content);
            if framing.content.trim().is_empty() {
                return Err(BufferError::InvalidMessage(
                    "framing message must not be empty".into(),
                ));
            }
            let line = serde_json::to_string(&framing)?;
            let mut log = OpenOptions::new()
                .create_new(true)
                .append(true)
                .open(&log_path)?;
            log.write_all(line.as_bytes())?;
            log.write_all(b"\n")?;
            log.sync_data()?;

            Ok(Self {
                log_path,
                log,
                framing,
                tail: Vec::new(),
                tail_base: 1,
                next_ordinal: 1,
            })
        }
    }

    /// Reconstruct the buffer from an existing log.
    fn load(log_path: &Path, watermark: u64) -> Result<Self, BufferError> {
        let reader = BufReader::new(File::open(log_path)?);
        let mut messages: Vec<Message> = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(&line) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    // A torn final line is expected after a crash mid-append;
                    // anything earlier means the journal is damaged.
                    warn!("dropping unreadable log line {lineno}: {e}");
                    break;
                }
            }
        }

        let mut iter = messages.into_iter();
        let framing = iter.next().ok_or_else(|| {
            BufferError::InvalidMessage("log is empty: no framing message".into())
        })?;
        if framing.role != MessageRole::System {
            return Err(BufferError::InvalidMessage(
                "first logged message is not a system framing message".into(),
            ));
        }

        let rest: Vec<Message> = iter.collect();
        let next_ordinal = 1 + rest.len() as u64;
        let tail_base = watermark + 1;
        let skip = (tail_base - 1) as usize; // tail ordinals start at 1
        let tail: Vec<Message> = rest.into_iter().skip(skip).collect();

        let log = OpenOptions::new().append(true).open(log_path)?;
        debug!(
            "buffer reloaded: {} total message(s), {} live, watermark {}",
            next_ordinal,
            tail.len(),
            watermark,
        );

        Ok(Self {
            log_path: log_path.to_path_buf(),
            log,
            framing,
            tail,
            tail_base,
            next_ordinal,
        })
    }

    /// Append a message: serialize, journal, sync, then update the window.
    /// Returns the assigned ordinal.
    pub fn append(&mut self, message: Message) -> Result<u64, BufferError> {
        if message.content.trim().is_empty() {
            return Err(BufferError::InvalidMessage("empty message content".into()));
        }

        // Fail closed: everything fallible happens before any state change.
        let line = serde_json::to_string(&message)?;
        self.log.write_all(line.as_bytes())?;
        self.log.write_all(b"\n")?;
        self.log.sync_data()?;

        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.tail.push(message);
        Ok(ordinal)
    }

    /// The system framing message (ordinal 0).
    pub fn framing(&self) -> &Message {
        &self.framing
    }

    /// Live messages since the last pruning point, oldest first.
    pub fn tail(&self) -> &[Message] {
        &self.tail
    }

    /// Ordinal of the first live tail message.
    pub fn tail_base(&self) -> u64 {
        self.tail_base
    }

    /// Ordinal of the most recently appended message, if any.
    pub fn last_ordinal(&self) -> Option<u64> {
        (self.next_ordinal > 1).then(|| self.next_ordinal - 1)
    }

    /// The live message at a given ordinal (framing included).
    pub fn message_at(&self, ordinal: u64) -> Option<&Message> {
        if ordinal == 0 {
            return Some(&self.framing);
        }
        let idx = ordinal.checked_sub(self.tail_base)? as usize;
        self.tail.get(idx)
    }

    /// Clone the live messages covering an ordinal range. `None` when any
    /// part of the range is outside the live window.
    pub fn range_messages(&self, range: SourceRange) -> Option<Vec<Message>> {
        if range.start < self.tail_base {
            return None;
        }
        let start = (range.start - self.tail_base) as usize;
        let end = (range.end - self.tail_base) as usize;
        let slice = self.tail.get(start..=end)?;
        Some(slice.to_vec())
    }

    /// Last live message (most recent first) matching the predicate,
    /// falling back to the framing message.
    pub fn find_last(&self, pred: impl Fn(&Message) -> bool) -> Option<(u64, &Message)> {
        for (i, msg) in self.tail.iter().enumerate().rev() {
            if pred(msg) {
                return Some((self.tail_base + i as u64, msg));
            }
        }
        pred(&self.framing).then_some((0, &self.framing))
    }

    /// Drop live messages with ordinals `<= ordinal`. The log is untouched —
    /// durability of the pruning point belongs to the session manifest.
    pub fn prune_through(&mut self, ordinal: u64) {
        if ordinal < self.tail_base {
            return;
        }
        let drop_count = ((ordinal - self.tail_base) as usize + 1).min(self.tail.len());
        self.tail.drain(..drop_count);
        self.tail_base += drop_count as u64;
    }

    /// Path of the underlying journal (for diagnostics).
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MarkerKind;

    #[test]
    fn append_assigns_sequential_ordinals() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();

        assert_eq!(buffer.append(Message::user("one")).unwrap(), 1);
        assert_eq!(buffer.append(Message::assistant("two")).unwrap(), 2);
        assert_eq!(buffer.last_ordinal(), Some(2));
        assert_eq!(buffer.tail().len(), 2);
    }

    #[test]
    fn empty_message_is_rejected_and_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
        buffer.append(Message::user("ok")).unwrap();

        let err = buffer.append(Message::user("   ")).unwrap_err();
        assert!(matches!(err, BufferError::InvalidMessage(_)));
        assert_eq!(buffer.tail().len(), 1);
        assert_eq!(buffer.last_ordinal(), Some(1));
    }

    #[test]
    fn buffer_is_reconstructable_from_the_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut buffer = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
            buffer.append(Message::user("hello")).unwrap();
            buffer.append(Message::unit_transition("A", "B")).unwrap();
        }

        let reloaded = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
        assert_eq!(reloaded.framing().content, "framing");
        assert_eq!(reloaded.tail().len(), 2);
        assert_eq!(reloaded.tail()[1].marker, MarkerKind::UnitTransition);
        assert_eq!(reloaded.last_ordinal(), Some(2));
    }

    #[test]
    fn reload_respects_the_watermark() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut buffer = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
            for i in 1..=5 {
                buffer.append(Message::user(format!("msg {i}"))).unwrap();
            }
        }

        let reloaded = ConversationBuffer::open(dir.path(), "framing", 3).unwrap();
        assert_eq!(reloaded.tail_base(), 4);
        assert_eq!(reloaded.tail().len(), 2);
        assert_eq!(reloaded.tail()[0].content, "msg 4");
        // New appends continue the global numbering.
        assert_eq!(reloaded.last_ordinal(), Some(5));
    }

    #[test]
    fn torn_final_line_is_dropped_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut buffer = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
            buffer.append(Message::user("whole")).unwrap();
        }
        // Simulate a crash mid-append.
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(LOG_FILE))
            .unwrap();
        file.write_all(b"{\"role\":\"user\",\"conte").unwrap();
        drop(file);

        let reloaded = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
        assert_eq!(reloaded.tail().len(), 1);
        assert_eq!(reloaded.tail()[0].content, "whole");
    }

    #[test]
    fn prune_drops_only_older_ordinals() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
        for i in 1..=4 {
            buffer.append(Message::user(format!("m{i}"))).unwrap();
        }

        buffer.prune_through(2);
        assert_eq!(buffer.tail_base(), 3);
        assert_eq!(buffer.tail().len(), 2);
        assert_eq!(buffer.tail()[0].content, "m3");

        // Pruning below the base is a no-op.
        buffer.prune_through(1);
        assert_eq!(buffer.tail_base(), 3);
    }

    #[test]
    fn range_messages_requires_a_fully_live_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
        for i in 1..=4 {
            buffer.append(Message::user(format!("m{i}"))).unwrap();
        }
        buffer.prune_through(1);

        assert!(buffer.range_messages(SourceRange::new(1, 2)).is_none());
        let live = buffer.range_messages(SourceRange::new(2, 4)).unwrap();
        assert_eq!(live.len(), 3);
        assert_eq!(live[0].content, "m2");
    }

    #[test]
    fn find_last_scans_newest_first_and_falls_back_to_framing() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
        buffer.append(Message::unit_transition("A", "B")).unwrap();
        buffer.append(Message::user("plain")).unwrap();
        buffer.append(Message::unit_transition("B", "C")).unwrap();

        let (ordinal, msg) = buffer
            .find_last(|m| m.marker == MarkerKind::UnitTransition)
            .unwrap();
        assert_eq!(ordinal, 3);
        assert!(msg.content.contains("B to C"));

        let (ordinal, _) = buffer
            .find_last(|m| m.role == MessageRole::System && m.marker == MarkerKind::None)
            .unwrap();
        assert_eq!(ordinal, 0);
    }

    #[test]
    fn message_at_resolves_framing_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
        buffer.append(Message::user("first")).unwrap();

        assert_eq!(buffer.message_at(0).unwrap().content, "framing");
        assert_eq!(buffer.message_at(1).unwrap().content, "first");
        assert!(buffer.message_at(2).is_none());
    }
}
