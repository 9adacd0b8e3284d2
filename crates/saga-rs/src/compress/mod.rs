//! Boundary-triggered, tiered compression.
//!
//! Three pieces:
//!
//! 1. **[`boundary`]** — [`BoundaryDetector`] scans the live window for
//!    transition markers and derives each marker's compressible range.
//! 2. **[`scheduler`]** — [`CompressionScheduler`] turns boundaries into
//!    archive writes: unit summaries on unit transitions, chronicle batching
//!    past the threshold, forced final chronicles on aggregate transitions,
//!    and budget-driven fallback compression.
//! 3. **[`retry`]** — [`RetryPolicy`] bounds summarizer retries with
//!    exponential backoff before the scheduler degrades to mechanical
//!    truncation.

pub mod boundary;
pub mod retry;
pub mod scheduler;

pub use boundary::{Boundary, BoundaryDetector};
pub use retry::RetryPolicy;
pub use scheduler::{CompressionOutcome, CompressionScheduler};
