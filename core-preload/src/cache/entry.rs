//! Cache entry types

use crate::key::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle state of a cached prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Requested, no write handle has claimed it yet
    Pending,
    /// A write handle is open
    Downloading,
    /// Some bytes stored; resumable
    Partial,
    /// Every byte of the resource (or of its known size) is stored
    Complete,
    /// Last fetch failed; stored bytes are kept for a retry
    Failed,
    /// Removed by eviction. Only ever seen on detached snapshots.
    Evicted,
}

impl EntryState {
    /// Returns true if the entry has bytes a reader can use.
    pub fn is_readable(&self) -> bool {
        matches!(self, EntryState::Partial | EntryState::Complete)
    }

    pub fn description(&self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Downloading => "downloading",
            EntryState::Partial => "partial",
            EntryState::Complete => "complete",
            EntryState::Failed => "failed",
            EntryState::Evicted => "evicted",
        }
    }
}

/// One cached resource prefix.
///
/// Owned by its [`CacheDirectory`](super::CacheDirectory); callers only ever
/// see clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,

    /// Absolute path of the data file. Rebuilt from the directory root on
    /// load, so the index stays valid if the directory moves.
    #[serde(skip)]
    pub path: PathBuf,

    /// Bytes stored in the data file
    pub downloaded_bytes: u64,

    /// Full resource length, when the source reported one
    pub total_bytes: Option<u64>,

    pub last_access: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    pub state: EntryState,
}

impl CacheEntry {
    pub(crate) fn new(key: CacheKey, path: PathBuf, now: DateTime<Utc>) -> Self {
        Self {
            key,
            path,
            downloaded_bytes: 0,
            total_bytes: None,
            last_access: now,
            created_at: now,
            state: EntryState::Pending,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == EntryState::Complete
    }

    /// Returns true if no further bytes are needed to serve `limit` bytes.
    pub fn satisfies(&self, limit: u64) -> bool {
        self.is_complete() || self.downloaded_bytes >= limit
    }

    /// Fraction of the known total that is stored, 0.0 when unknown.
    pub fn progress(&self) -> f64 {
        match self.total_bytes {
            Some(0) => 1.0,
            Some(total) => (self.downloaded_bytes as f64 / total as f64).min(1.0),
            None => 0.0,
        }
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CacheEntry {
        CacheEntry::new(
            CacheKey::new("https://cdn.example.com/a.mp4"),
            PathBuf::from("/tmp/a.cache"),
            Utc::now(),
        )
    }

    #[test]
    fn test_new_entry_is_pending() {
        let entry = entry();
        assert_eq!(entry.state, EntryState::Pending);
        assert_eq!(entry.downloaded_bytes, 0);
        assert_eq!(entry.created_at, entry.last_access);
        assert!(!entry.state.is_readable());
    }

    #[test]
    fn test_satisfies() {
        let mut entry = entry();
        entry.downloaded_bytes = 512;
        entry.state = EntryState::Partial;
        assert!(entry.satisfies(512));
        assert!(!entry.satisfies(1024));

        entry.state = EntryState::Complete;
        assert!(entry.satisfies(1024));
    }

    #[test]
    fn test_progress() {
        let mut entry = entry();
        assert_eq!(entry.progress(), 0.0);
        entry.total_bytes = Some(1000);
        entry.downloaded_bytes = 250;
        assert!((entry.progress() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_path_not_serialized() {
        let json = serde_json::to_string(&entry()).unwrap();
        assert!(!json.contains("a.cache"));
        assert!(json.contains("\"state\":\"pending\""));
    }
}
