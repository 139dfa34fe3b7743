//! # Fetch Coordination
//!
//! Runs downloads into cache entries on a bounded worker pool.
//!
//! - At most one task per `(directory, key)`; later submissions for the same
//!   key observe the running task instead of starting another.
//! - Tasks beyond the pool size queue in submission order.
//! - [`FetchCoordinator::stop_all`] cancels every task at its next chunk
//!   boundary and leaves the entries Partial.

mod coordinator;
mod task;

pub use coordinator::{FetchCoordinator, FetchHandle};

use crate::cache::CacheEntry;
use crate::error::PreloadError;
use std::sync::Arc;

/// Progress of one fetch task, as seen by its observers.
#[derive(Debug, Clone)]
pub enum FetchStatus {
    /// Waiting for a worker
    Queued,
    /// Streaming; `downloaded` includes any resumed prefix
    Running { downloaded: u64, limit: u64 },
    Finished(FetchOutcome),
}

impl FetchStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, FetchStatus::Finished(_))
    }
}

/// How a fetch task ended.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Committed at the byte limit (Partial) or at the end of the source
    /// (Complete)
    Completed(CacheEntry),
    /// Stopped by `stop_all`; the entry, if any, is left Partial
    Cancelled(Option<CacheEntry>),
    /// The source or the cache failed; no retry is attempted
    Failed(Arc<PreloadError>),
}

impl FetchOutcome {
    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            FetchOutcome::Completed(entry) => Some(entry),
            FetchOutcome::Cancelled(entry) => entry.as_ref(),
            FetchOutcome::Failed(_) => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, FetchOutcome::Completed(_))
    }
}
