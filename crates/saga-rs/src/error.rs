//! Error taxonomy for the memory pipeline.
//!
//! The classes mirror how each failure is handled at the call site:
//!
//! - [`SummarizeError`] — transient and malformed-output failures are retried
//!   with backoff, then degraded to mechanical truncation. Never escapes a
//!   turn.
//! - [`ArchiveError`] — the one class that propagates: a failed archive write
//!   must abort the compression (prior state intact) rather than silently
//!   lose history.
//! - [`BufferError`] — fail-closed append; the buffer is unchanged and the
//!   caller may retry.
//! - [`SubsystemError`] — raised by delegated sub-loops; contained by the
//!   controller, which still yields a fallback summary and a terminate signal.
//!
//! Window overflow during assembly is not an error type at all — it is
//! resolved internally by progressive collapsing (see
//! [`ContextAssembler`](crate::context::ContextAssembler)) and never surfaces.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single summarizer invocation.
#[derive(Error, Debug)]
pub enum SummarizeError {
    /// Network-ish failure worth retrying (HTTP 429/5xx, connection reset).
    #[error("transient summarizer failure: {0}")]
    Transient(String),

    /// The summarizer answered, but with output the contract rejects
    /// (empty, or past the configured length bound).
    #[error("malformed summarizer output: {0}")]
    Malformed(String),

    /// The bounded call deadline elapsed. Treated as transient by the
    /// scheduler's retry loop.
    #[error("summarizer call timed out after {0:?}")]
    Timeout(Duration),
}

impl SummarizeError {
    /// Whether the retry loop should attempt this call again.
    /// Every class is retryable; the distinction matters only for logging.
    pub fn is_transient(&self) -> bool {
        matches!(self, SummarizeError::Transient(_) | SummarizeError::Timeout(_))
    }
}

/// Failure while writing to or reading from the archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// An append targeted a record name that already exists. Records are
    /// immutable, so this is refused instead of overwriting.
    #[error("archive record already exists: {path}")]
    DuplicateRecord { path: PathBuf },

    #[error("unreadable archive record at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Failure to append a message to the conversation buffer. The append is
/// fail-closed: on error, neither the durable log nor the in-memory window
/// has changed.
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("message rejected: {0}")]
    InvalidMessage(String),

    #[error("message serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("buffer log I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while persisting or loading the session manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure raised by a delegated sub-loop. The
/// [`SubsystemController`](crate::subsystem::SubsystemController) contains
/// these — the caller still receives a summary message and a signal.
#[derive(Error, Debug)]
pub enum SubsystemError {
    #[error("subsystem failed: {0}")]
    Failed(String),
}

/// Top-level error surface of a [`Session`](crate::session::Session) turn.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A delegation or acknowledgment was attempted in the wrong controller
    /// state.
    #[error("invalid session state: {0}")]
    State(String),
}
