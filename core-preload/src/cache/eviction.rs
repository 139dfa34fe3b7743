//! Cache eviction policy
//!
//! Least-recently-accessed first. Entries that are being written, pinned by a
//! reader, or touched within the grace window are never chosen.

use super::directory::{CacheDirectory, DirectoryState};
use super::entry::CacheEntry;
use crate::config::DEFAULT_GRACE_WINDOW;
use crate::error::PreloadError;
use crate::key::CacheKey;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Selects entries to delete until a directory is within its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    grace_window: Duration,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_WINDOW)
    }
}

impl EvictionPolicy {
    pub fn new(grace_window: Duration) -> Self {
        Self { grace_window }
    }

    pub fn grace_window(&self) -> Duration {
        self.grace_window
    }

    /// Deletes evictable entries from `directory` until its total size is at
    /// most `max_size` and it holds at most `max_entries` entries.
    ///
    /// Never fails. When only in-use entries remain, the report carries
    /// `bounds_exceeded` and the directory stays over its bounds until those
    /// entries are released.
    pub fn enforce_bounds(
        &self,
        directory: &CacheDirectory,
        max_size: u64,
        max_entries: usize,
    ) -> EvictionReport {
        directory.evict_with(self, max_size, max_entries)
    }

    /// Returns true if the entry must not be evicted right now.
    pub(crate) fn is_protected(
        &self,
        state: &DirectoryState,
        entry: &CacheEntry,
        now: DateTime<Utc>,
    ) -> bool {
        if state.is_busy(&entry.key) {
            return true;
        }

        // A last access in the future (clock skew) counts as recent.
        now.signed_duration_since(entry.last_access)
            .to_std()
            .map_or(true, |age| age < self.grace_window)
    }

    /// Oldest evictable entry; on equal timestamps the larger one goes first.
    pub(crate) fn next_victim(&self, state: &DirectoryState, now: DateTime<Utc>) -> Option<CacheKey> {
        state
            .entries
            .values()
            .filter(|entry| !self.is_protected(state, entry, now))
            .min_by(|a, b| {
                a.last_access
                    .cmp(&b.last_access)
                    .then_with(|| b.downloaded_bytes.cmp(&a.downloaded_bytes))
                    .then_with(|| a.key.cmp(&b.key))
            })
            .map(|entry| entry.key.clone())
    }

    /// Time until the first entry held back only by the grace window becomes
    /// evictable. `None` if no entry is in that position.
    pub(crate) fn grace_remaining(&self, state: &DirectoryState, now: DateTime<Utc>) -> Option<Duration> {
        state
            .entries
            .values()
            .filter(|entry| !state.is_busy(&entry.key))
            .filter_map(|entry| {
                let age = now
                    .signed_duration_since(entry.last_access)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                self.grace_window.checked_sub(age).filter(|left| !left.is_zero())
            })
            .min()
    }
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Removed entries, as detached snapshots in state `Evicted`
    pub evicted: Vec<CacheEntry>,
    pub bytes_freed: u64,
    /// Nothing further was evictable while still over bounds
    pub bounds_exceeded: bool,
    /// Set with `bounds_exceeded` when some remaining entry is only inside
    /// its grace window; another pass after this delay can make progress.
    pub retry_after: Option<Duration>,
    /// Directory size after the pass
    pub total_size: u64,
    /// Directory entry count after the pass
    pub entry_count: usize,
    pub max_size: u64,
    pub max_entries: usize,
}

impl EvictionReport {
    pub fn evicted_keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.evicted.iter().map(|entry| &entry.key)
    }

    /// Non-fatal warning for a pass that could not reach the bounds.
    pub fn warning(&self) -> Option<PreloadError> {
        self.bounds_exceeded.then(|| PreloadError::BoundsExceeded {
            total_size: self.total_size,
            entry_count: self.entry_count,
            max_size: self.max_size,
            max_entries: self.max_entries,
        })
    }
}
