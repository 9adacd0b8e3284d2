//! Durable, append-only archive of compressed history.
//!
//! Every segment that leaves the working buffer — and every summary produced
//! from it — is written here before the buffer is pruned. Records are
//! immutable files under a per-container directory, named
//! `{container}_{kind}_{sequence}.json`, with one monotonically increasing
//! sequence per container that survives restarts.

pub mod store;

pub use store::{ArchiveRecord, ArchiveStore, RecordKind, RecordPayload};
