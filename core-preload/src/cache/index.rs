//! Persisted directory index.
//!
//! `index.json` holds one record per key. Data files are named from the key
//! hash, so the index only stores metadata. Writes go to a temp file that is
//! then renamed over the index, leaving either the old or the new version on
//! disk after a crash.

use super::entry::{CacheEntry, EntryState};
use crate::error::Result;
use crate::key::CacheKey;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub(crate) const INDEX_VERSION: u32 = 1;

const DATA_FILE_EXTENSION: &str = "cache";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexFile {
    pub version: u32,
    pub entries: Vec<CacheEntry>,
}

impl IndexFile {
    pub fn new(mut entries: Vec<CacheEntry>) -> Self {
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            version: INDEX_VERSION,
            entries,
        }
    }
}

/// Index contents after checking them against the files on disk.
#[derive(Debug, Default)]
pub(crate) struct Reconciled {
    pub entries: HashMap<CacheKey, CacheEntry>,
    /// Index records dropped because their data file was gone
    pub dropped: usize,
    /// Data files deleted because no record referenced them
    pub orphans_removed: usize,
}

pub(crate) fn temp_path(index_path: &Path) -> PathBuf {
    let mut name = index_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    index_path.with_file_name(name)
}

/// Reads the index. A missing, unreadable-as-JSON, or foreign-version file
/// yields `None`; the caller then starts empty.
pub(crate) async fn load(index_path: &Path) -> Result<Option<IndexFile>> {
    let bytes = match tokio::fs::read(index_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<IndexFile>(&bytes) {
        Ok(index) if index.version == INDEX_VERSION => Ok(Some(index)),
        Ok(index) => {
            warn!(
                path = %index_path.display(),
                version = index.version,
                "Ignoring cache index with unsupported version"
            );
            Ok(None)
        }
        Err(e) => {
            warn!(path = %index_path.display(), error = %e, "Ignoring corrupt cache index");
            Ok(None)
        }
    }
}

pub(crate) async fn save(index_path: &Path, index: &IndexFile) -> Result<()> {
    let json = serde_json::to_vec_pretty(index)?;
    let tmp = temp_path(index_path);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, index_path).await?;
    Ok(())
}

/// Aligns persisted records with the data files under `root`.
///
/// Byte counts are taken from the file lengths. Records left mid-write by a
/// previous process become Partial, or Failed when nothing was stored.
pub(crate) async fn reconcile(root: &Path, persisted: Vec<CacheEntry>) -> Result<Reconciled> {
    let mut reconciled = Reconciled::default();

    for mut entry in persisted {
        if entry.state == EntryState::Evicted || reconciled.entries.contains_key(&entry.key) {
            reconciled.dropped += 1;
            continue;
        }

        entry.path = root.join(entry.key.file_name());
        let len = match tokio::fs::metadata(&entry.path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                debug!(key = %entry.key, "Dropping index record without data file");
                reconciled.dropped += 1;
                continue;
            }
        };

        entry.downloaded_bytes = len;
        entry.state = reconciled_state(&entry);
        reconciled.entries.insert(entry.key.clone(), entry);
    }

    let known: HashSet<String> = reconciled
        .entries
        .keys()
        .map(|key| key.file_name())
        .collect();

    let mut dir = tokio::fs::read_dir(root).await?;
    while let Some(item) = dir.next_entry().await? {
        let path = item.path();
        let is_data_file = path
            .extension()
            .is_some_and(|ext| ext == DATA_FILE_EXTENSION);
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_data_file || known.contains(name) {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => reconciled.orphans_removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphan cache file"),
        }
    }

    Ok(reconciled)
}

fn reconciled_state(entry: &CacheEntry) -> EntryState {
    let reached_total = entry
        .total_bytes
        .is_some_and(|total| entry.downloaded_bytes >= total);

    match entry.state {
        EntryState::Complete if entry.total_bytes.is_none() || reached_total => {
            EntryState::Complete
        }
        _ if entry.downloaded_bytes == 0 => EntryState::Failed,
        _ if reached_total => EntryState::Complete,
        EntryState::Failed => EntryState::Failed,
        _ => EntryState::Partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("preload-index-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn entry(root: &Path, url: &str, state: EntryState) -> CacheEntry {
        let key = CacheKey::new(url);
        let mut entry = CacheEntry::new(key.clone(), root.join(key.file_name()), Utc::now());
        entry.state = state;
        entry
    }

    #[test]
    fn test_temp_path() {
        let tmp = temp_path(Path::new("/cache/index.json"));
        assert_eq!(tmp, PathBuf::from("/cache/index.json.tmp"));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let root = temp_dir();
        let index_path = root.join("index.json");
        let e = entry(&root, "https://a.example.com/1.mp4", EntryState::Partial);

        save(&index_path, &IndexFile::new(vec![e.clone()])).await.unwrap();
        assert!(!temp_path(&index_path).exists());

        let loaded = load(&index_path).await.unwrap().unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].key, e.key);
        assert_eq!(loaded.entries[0].state, EntryState::Partial);

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_load_missing_and_corrupt() {
        let root = temp_dir();
        let index_path = root.join("index.json");
        assert!(load(&index_path).await.unwrap().is_none());

        std::fs::write(&index_path, b"{not json").unwrap();
        assert!(load(&index_path).await.unwrap().is_none());

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_reconcile_against_files() {
        let root = temp_dir();

        let mut downloading = entry(&root, "https://a.example.com/1.mp4", EntryState::Downloading);
        downloading.downloaded_bytes = 999;
        std::fs::write(&downloading.path, vec![0u8; 300]).unwrap();

        let mut complete = entry(&root, "https://a.example.com/2.mp4", EntryState::Complete);
        complete.total_bytes = Some(100);
        std::fs::write(&complete.path, vec![0u8; 100]).unwrap();

        let empty = entry(&root, "https://a.example.com/3.mp4", EntryState::Pending);
        std::fs::write(&empty.path, b"").unwrap();

        let missing = entry(&root, "https://a.example.com/4.mp4", EntryState::Partial);

        let orphan = root.join(CacheKey::new("https://a.example.com/5.mp4").file_name());
        std::fs::write(&orphan, b"stale").unwrap();
        std::fs::write(root.join("notes.txt"), b"keep").unwrap();

        let reconciled = reconcile(
            &root,
            vec![downloading.clone(), complete.clone(), empty.clone(), missing],
        )
        .await
        .unwrap();

        assert_eq!(reconciled.entries.len(), 3);
        assert_eq!(reconciled.dropped, 1);
        assert_eq!(reconciled.orphans_removed, 1);
        assert!(!orphan.exists());
        assert!(root.join("notes.txt").exists());

        let resumed = &reconciled.entries[&downloading.key];
        assert_eq!(resumed.state, EntryState::Partial);
        assert_eq!(resumed.downloaded_bytes, 300);
        assert_eq!(reconciled.entries[&complete.key].state, EntryState::Complete);
        assert_eq!(reconciled.entries[&empty.key].state, EntryState::Failed);

        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_truncated_complete_becomes_partial() {
        let mut e = entry(Path::new("/c"), "https://a.example.com/1.mp4", EntryState::Complete);
        e.total_bytes = Some(100);
        e.downloaded_bytes = 40;
        assert_eq!(reconciled_state(&e), EntryState::Partial);
    }
}
