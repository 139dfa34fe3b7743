//! Cache Directory
//!
//! One [`CacheDirectory`] owns one on-disk directory: its index, its data
//! files, and the bookkeeping of who is reading or writing which key.
//!
//! Structural changes (entry creation, state changes, deletion, eviction)
//! happen under a single `parking_lot::Mutex`. The lock is never held across
//! an `.await`; byte appends write through the [`WriteHandle`]'s own file and
//! only take the lock briefly to record the new length.

use super::entry::{CacheEntry, EntryState};
use super::eviction::{EvictionPolicy, EvictionReport};
use super::index::{self, IndexFile};
use super::stats::DirectoryStats;
use crate::config::{PreloadConfig, DEFAULT_MAX_DIR_ENTRIES, DEFAULT_MAX_DIR_SIZE};
use crate::error::{PreloadError, Result};
use crate::key::CacheKey;
use bridge_traits::time::{Clock, SystemClock};
use bytes::Bytes;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

/// Size and entry-count caps of one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryBounds {
    pub max_size: u64,
    pub max_entries: usize,
}

impl Default for DirectoryBounds {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_DIR_SIZE,
            max_entries: DEFAULT_MAX_DIR_ENTRIES,
        }
    }
}

/// Settings applied when a directory is opened.
#[derive(Clone)]
pub struct DirectoryOptions {
    pub clock: Arc<dyn Clock>,
    pub policy: EvictionPolicy,
    pub bounds: DirectoryBounds,
    pub index_file_name: String,
    pub event_bus: Option<Arc<EventBus>>,
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            policy: EvictionPolicy::default(),
            bounds: DirectoryBounds::default(),
            index_file_name: "index.json".to_string(),
            event_bus: None,
        }
    }
}

impl DirectoryOptions {
    pub fn from_config(config: &PreloadConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            policy: EvictionPolicy::new(config.grace_window),
            bounds: DirectoryBounds {
                max_size: config.default_max_dir_size,
                max_entries: config.default_max_dir_entries,
            },
            index_file_name: config.index_file_name.clone(),
            event_bus: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_bounds(mut self, max_size: u64, max_entries: usize) -> Self {
        self.bounds = DirectoryBounds {
            max_size,
            max_entries,
        };
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }
}

impl std::fmt::Debug for DirectoryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryOptions")
            .field("clock", &"Clock { ... }")
            .field("policy", &self.policy)
            .field("bounds", &self.bounds)
            .field("index_file_name", &self.index_file_name)
            .field("event_bus", &self.event_bus.is_some())
            .finish()
    }
}

/// Index state guarded by the directory lock.
#[derive(Debug)]
pub(crate) struct DirectoryState {
    pub entries: HashMap<CacheKey, CacheEntry>,
    pub writers: HashSet<CacheKey>,
    pub readers: HashMap<CacheKey, usize>,
    bounds: DirectoryBounds,
    bounds_warned: bool,
}

impl DirectoryState {
    pub(crate) fn new(max_size: u64, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            writers: HashSet::new(),
            readers: HashMap::new(),
            bounds: DirectoryBounds {
                max_size,
                max_entries,
            },
            bounds_warned: false,
        }
    }

    /// Returns true if a write handle or reader holds the key.
    pub(crate) fn is_busy(&self, key: &CacheKey) -> bool {
        self.writers.contains(key) || self.readers.get(key).is_some_and(|count| *count > 0)
    }

    /// Bytes on disk across every entry, whatever its state.
    pub(crate) fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.downloaded_bytes).sum()
    }
}

/// How an aborted write leaves its entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortState {
    /// Stopped on request; resumable
    Partial,
    /// Stopped by an error; stored bytes are kept for a retry
    Failed,
}

impl From<AbortState> for EntryState {
    fn from(state: AbortState) -> Self {
        match state {
            AbortState::Partial => EntryState::Partial,
            AbortState::Failed => EntryState::Failed,
        }
    }
}

/// A bounded, persistent cache directory.
pub struct CacheDirectory {
    root: PathBuf,
    index_path: PathBuf,
    clock: Arc<dyn Clock>,
    policy: EvictionPolicy,
    state: Mutex<DirectoryState>,
    /// Serializes index writes; the snapshot is taken while holding it
    persist_lock: tokio::sync::Mutex<()>,
    event_bus: Option<Arc<EventBus>>,
    this: Weak<CacheDirectory>,
    /// A deferred eviction pass is pending
    recheck_pending: AtomicBool,
}

impl std::fmt::Debug for CacheDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDirectory")
            .field("root", &self.root)
            .field("policy", &self.policy)
            .field("bounds", &self.bounds())
            .finish()
    }
}

impl CacheDirectory {
    /// Opens (creating if needed) the directory at `root`, loads its index
    /// and reconciles it with the files on disk.
    ///
    /// # Errors
    ///
    /// Returns [`PreloadError::DirectoryUnavailable`] if the directory cannot
    /// be created, listed, or written.
    pub async fn open(root: impl AsRef<Path>, options: DirectoryOptions) -> Result<Arc<Self>> {
        let root = root.as_ref().to_path_buf();
        let unavailable = |e: PreloadError| PreloadError::directory_unavailable(&root, e);

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| PreloadError::directory_unavailable(&root, e))?;

        let index_path = root.join(&options.index_file_name);
        let persisted = index::load(&index_path)
            .await
            .map_err(unavailable)?
            .map(|index| index.entries)
            .unwrap_or_default();

        match tokio::fs::remove_file(index::temp_path(&index_path)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                warn!(dir = %root.display(), error = %e, "Failed to remove stale index temp file");
            }
            _ => {}
        }

        let reconciled = index::reconcile(&root, persisted)
            .await
            .map_err(unavailable)?;

        let mut state = DirectoryState::new(options.bounds.max_size, options.bounds.max_entries);
        state.entries = reconciled.entries;

        let directory = Arc::new_cyclic(|this| Self {
            root,
            index_path,
            clock: options.clock,
            policy: options.policy,
            state: Mutex::new(state),
            persist_lock: tokio::sync::Mutex::new(()),
            event_bus: options.event_bus,
            this: this.clone(),
            recheck_pending: AtomicBool::new(false),
        });

        directory.enforce_bounds();
        directory
            .persist()
            .await
            .map_err(|e| PreloadError::directory_unavailable(&directory.root, e))?;

        let entries = directory.entry_count();
        info!(
            dir = %directory.root.display(),
            entries,
            dropped = reconciled.dropped,
            orphans_removed = reconciled.orphans_removed,
            "Cache directory opened"
        );
        directory.emit(CacheEvent::DirectoryLoaded {
            directory: directory.root.display().to_string(),
            entries,
            orphans_removed: reconciled.orphans_removed,
        });

        Ok(directory)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Data file path for `key`, whether or not the entry exists.
    pub fn file_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    pub fn bounds(&self) -> DirectoryBounds {
        self.state.lock().bounds
    }

    /// Updates the caps. `None` or zero keeps the current value.
    pub fn set_bounds(&self, max_size: Option<u64>, max_entries: Option<usize>) -> DirectoryBounds {
        let mut state = self.state.lock();
        if let Some(size) = max_size.filter(|s| *s > 0) {
            state.bounds.max_size = size;
        }
        if let Some(entries) = max_entries.filter(|e| *e > 0) {
            state.bounds.max_entries = entries;
        }
        state.bounds
    }

    /// Snapshot of the entry for `key`.
    pub fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Records a cache hit. Returns false if the key is unknown.
    pub fn touch(&self, key: &CacheKey) -> bool {
        let now = self.clock.now();
        match self.state.lock().entries.get_mut(key) {
            Some(entry) => {
                entry.touch(now);
                true
            }
            None => false,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.state.lock().total_size()
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Data file paths of every entry, sorted.
    pub fn all_file_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .state
            .lock()
            .entries
            .values()
            .map(|entry| entry.path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn is_writing(&self, key: &CacheKey) -> bool {
        self.state.lock().writers.contains(key)
    }

    pub fn stats(&self) -> DirectoryStats {
        let state = self.state.lock();
        let count_state =
            |wanted: EntryState| state.entries.values().filter(|e| e.state == wanted).count();

        DirectoryStats {
            entry_count: state.entries.len(),
            complete_entries: count_state(EntryState::Complete),
            partial_entries: count_state(EntryState::Partial),
            failed_entries: count_state(EntryState::Failed),
            writing_entries: state.writers.len(),
            pinned_entries: state.readers.len(),
            total_bytes: state.total_size(),
            max_size: state.bounds.max_size,
            max_entries: state.bounds.max_entries,
        }
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Opens the single write handle for `key`, creating a Pending entry or
    /// resuming a stored prefix.
    ///
    /// The handle's [`downloaded`](WriteHandle::downloaded) is the resume
    /// offset. `expected_size` is the full resource length when known.
    ///
    /// # Errors
    ///
    /// - [`PreloadError::AlreadyWriting`] if another handle for `key` is open
    /// - [`PreloadError::Io`] if the data file cannot be opened
    #[instrument(skip(self), fields(dir = %self.root.display()))]
    pub async fn begin_write(
        self: &Arc<Self>,
        key: &CacheKey,
        expected_size: Option<u64>,
    ) -> Result<WriteHandle> {
        let now = self.clock.now();
        let (path, recorded) = {
            let mut state = self.state.lock();
            if !state.writers.insert(key.clone()) {
                return Err(PreloadError::AlreadyWriting(key.to_string()));
            }

            let path = self.file_path(key);
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(key.clone(), path.clone(), now));
            entry.state = EntryState::Downloading;
            if expected_size.is_some() {
                entry.total_bytes = expected_size;
            }
            entry.touch(now);
            (path, entry.downloaded_bytes)
        };

        let (file, offset) = match open_data_file(&path, recorded).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to open cache data file");
                self.release_writer(key, Some(EntryState::Failed));
                return Err(e.into());
            }
        };

        if let Some(entry) = self.state.lock().entries.get_mut(key) {
            entry.downloaded_bytes = offset;
        }

        let handle = WriteHandle {
            directory: Arc::clone(self),
            key: key.clone(),
            file,
            downloaded: offset,
            finished: false,
        };

        self.enforce_bounds();
        self.persist_or_warn().await;

        debug!(key = %key, offset, "Write handle opened");
        Ok(handle)
    }

    /// Appends `bytes` to the handle's data file and records the new length.
    ///
    /// On a disk failure the entry becomes Failed and the bytes already
    /// stored are kept.
    pub async fn append_bytes(&self, handle: &mut WriteHandle, bytes: &[u8]) -> Result<u64> {
        self.check_owner(handle)?;
        if bytes.is_empty() {
            return Ok(handle.downloaded);
        }

        let written = async {
            handle.file.write_all(bytes).await?;
            handle.file.flush().await
        }
        .await;

        if let Err(e) = written {
            if let Some(entry) = self.state.lock().entries.get_mut(&handle.key) {
                entry.state = EntryState::Failed;
            }
            warn!(key = %handle.key, error = %e, "Cache append failed");
            return Err(e.into());
        }

        handle.downloaded += bytes.len() as u64;
        let now = self.clock.now();
        if let Some(entry) = self.state.lock().entries.get_mut(&handle.key) {
            entry.downloaded_bytes = handle.downloaded;
            entry.touch(now);
        }

        let report = self.enforce_bounds();
        if !report.evicted.is_empty() {
            self.persist_or_warn().await;
        }

        Ok(handle.downloaded)
    }

    /// Records the full resource length once the source reports it.
    pub fn set_expected_size(&self, handle: &WriteHandle, total: u64) {
        if let Some(entry) = self.state.lock().entries.get_mut(&handle.key) {
            entry.total_bytes = Some(total);
        }
    }

    /// Finishes a write and releases the write lock.
    ///
    /// The entry becomes Complete when the stored length reaches the known
    /// total, or, with no known total, when `source_exhausted` is set.
    /// Otherwise it is Partial.
    ///
    /// # Errors
    ///
    /// Returns [`PreloadError::EntryRemoved`] if the entry was deleted while
    /// the handle was open; its data file is removed.
    #[instrument(skip(self, handle), fields(key = %handle.key, bytes = handle.downloaded))]
    pub async fn commit(&self, mut handle: WriteHandle, source_exhausted: bool) -> Result<CacheEntry> {
        self.check_owner(&handle)?;
        handle.file.flush().await?;
        handle.finished = true;

        let now = self.clock.now();
        let committed = {
            let mut state = self.state.lock();
            state.writers.remove(&handle.key);
            match state.entries.get_mut(&handle.key) {
                Some(entry) => {
                    entry.downloaded_bytes = handle.downloaded;
                    let complete = match entry.total_bytes {
                        Some(total) => handle.downloaded >= total,
                        None => source_exhausted,
                    };
                    if complete && entry.total_bytes.is_none() {
                        entry.total_bytes = Some(handle.downloaded);
                    }
                    entry.state = if complete {
                        EntryState::Complete
                    } else {
                        EntryState::Partial
                    };
                    entry.touch(now);
                    Some(entry.clone())
                }
                None => None,
            }
        };

        let Some(entry) = committed else {
            remove_data_file(&self.file_path(&handle.key));
            return Err(PreloadError::EntryRemoved(handle.key.to_string()));
        };

        self.enforce_bounds();
        self.persist_or_warn().await;

        debug!(state = entry.state.description(), "Write committed");
        Ok(entry)
    }

    /// Releases the write lock without deleting stored bytes.
    #[instrument(skip(self, handle), fields(key = %handle.key, bytes = handle.downloaded))]
    pub async fn abort(&self, mut handle: WriteHandle, state: AbortState) -> Result<CacheEntry> {
        self.check_owner(&handle)?;
        if let Err(e) = handle.file.flush().await {
            warn!(error = %e, "Flush failed while aborting write");
        }
        handle.finished = true;

        let entry = self
            .release_writer(&handle.key, Some(state.into()))
            .ok_or_else(|| PreloadError::EntryRemoved(handle.key.to_string()))?;
        self.persist_or_warn().await;

        debug!(state = entry.state.description(), "Write aborted");
        Ok(entry)
    }

    /// Removes the entry and its data file. Returns false if the key did not
    /// exist.
    ///
    /// If a write handle is open, the file is removed when that handle
    /// finishes and its commit reports [`PreloadError::EntryRemoved`].
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let removed = {
            let mut state = self.state.lock();
            self.remove_locked(&mut state, key)
        };

        match removed {
            Some(entry) => {
                debug!(key = %key, bytes = entry.downloaded_bytes, "Cache entry deleted");
                self.persist_or_warn().await;
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// Opens a reader over the stored prefix of `key`.
    ///
    /// The entry is pinned (never evicted) until the reader is dropped, and
    /// its last access is updated. Returns `None` if nothing is stored.
    pub async fn open_read(self: &Arc<Self>, key: &CacheKey) -> Result<Option<CacheReader>> {
        let now = self.clock.now();
        let path = {
            let mut state = self.state.lock();
            let Some(entry) = state.entries.get_mut(key) else {
                return Ok(None);
            };
            if entry.downloaded_bytes == 0 {
                return Ok(None);
            }
            entry.touch(now);
            let path = entry.path.clone();
            *state.readers.entry(key.clone()).or_insert(0) += 1;
            path
        };

        let pin = ReaderPin {
            directory: Arc::clone(self),
            key: key.clone(),
        };
        let file = File::open(&path).await?;

        Ok(Some(CacheReader { pin, file }))
    }

    // ========================================================================
    // Eviction & persistence
    // ========================================================================

    /// Runs the directory's eviction policy against its current bounds.
    pub fn enforce_bounds(&self) -> EvictionReport {
        let bounds = self.bounds();
        self.policy
            .enforce_bounds(self, bounds.max_size, bounds.max_entries)
    }

    pub(crate) fn evict_with(
        &self,
        policy: &EvictionPolicy,
        max_size: u64,
        max_entries: usize,
    ) -> EvictionReport {
        let now = self.clock.now();
        let mut report = EvictionReport {
            max_size,
            max_entries,
            ..Default::default()
        };

        let warn_now = {
            let mut state = self.state.lock();
            loop {
                if state.total_size() <= max_size && state.entries.len() <= max_entries {
                    break;
                }
                let Some(key) = policy.next_victim(&state, now) else {
                    report.bounds_exceeded = true;
                    report.retry_after = policy.grace_remaining(&state, now);
                    break;
                };
                if let Some(mut entry) = self.remove_locked(&mut state, &key) {
                    report.bytes_freed += entry.downloaded_bytes;
                    entry.state = EntryState::Evicted;
                    report.evicted.push(entry);
                }
            }

            report.total_size = state.total_size();
            report.entry_count = state.entries.len();

            let first_warning = report.bounds_exceeded && !state.bounds_warned;
            state.bounds_warned = report.bounds_exceeded;
            first_warning
        };

        for entry in &report.evicted {
            debug!(key = %entry.key, bytes = entry.downloaded_bytes, "Cache entry evicted");
            self.emit(CacheEvent::Evicted {
                directory: self.root.display().to_string(),
                key: entry.key.to_string(),
                bytes: entry.downloaded_bytes,
            });
        }

        if warn_now {
            warn!(
                dir = %self.root.display(),
                total_size = report.total_size,
                entry_count = report.entry_count,
                max_size,
                max_entries,
                "Cache bounds exceeded; remaining entries are in use"
            );
            self.emit(CacheEvent::BoundsExceeded {
                directory: self.root.display().to_string(),
                total_size: report.total_size,
                entry_count: report.entry_count,
                max_size,
                max_entries,
            });
        }

        if let Some(delay) = report.retry_after {
            self.schedule_recheck(delay);
        }

        report
    }

    /// Runs [`enforce_bounds`](Self::enforce_bounds) again once `delay` has
    /// passed. At most one deferred pass is pending per directory; it holds
    /// only a weak reference, so a dropped directory cancels it.
    fn schedule_recheck(&self, delay: Duration) {
        if self.recheck_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.recheck_pending.store(false, Ordering::Release);
            return;
        };

        debug!(dir = %self.root.display(), delay_ms = delay.as_millis() as u64, "Eviction recheck scheduled");
        let this = self.this.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(directory) = this.upgrade() else {
                return;
            };
            directory.recheck_pending.store(false, Ordering::Release);
            let report = directory.enforce_bounds();
            if !report.evicted.is_empty() {
                directory.persist_or_warn().await;
            }
        });
    }

    /// Writes the index to disk.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = {
            let state = self.state.lock();
            IndexFile::new(state.entries.values().cloned().collect())
        };
        index::save(&self.index_path, &snapshot).await
    }

    async fn persist_or_warn(&self) {
        if let Err(e) = self.persist().await {
            warn!(dir = %self.root.display(), error = %e, "Failed to persist cache index");
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn check_owner(&self, handle: &WriteHandle) -> Result<()> {
        if std::ptr::eq(Arc::as_ptr(&handle.directory), self) {
            Ok(())
        } else {
            Err(PreloadError::InvalidRequest(format!(
                "write handle for {} belongs to another directory",
                handle.key
            )))
        }
    }

    /// Drops the key from the writer set and records the final state.
    /// `None` turns an in-progress entry into Partial.
    ///
    /// Returns `None` if the entry was deleted meanwhile; the deferred data
    /// file removal happens here.
    fn release_writer(&self, key: &CacheKey, final_state: Option<EntryState>) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        state.writers.remove(key);
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.state = final_state.unwrap_or(match entry.state {
                    EntryState::Pending | EntryState::Downloading => EntryState::Partial,
                    other => other,
                });
                Some(entry.clone())
            }
            None => {
                remove_data_file(&self.file_path(key));
                None
            }
        }
    }

    fn remove_locked(&self, state: &mut DirectoryState, key: &CacheKey) -> Option<CacheEntry> {
        let entry = state.entries.remove(key)?;
        if !state.writers.contains(key) {
            remove_data_file(&entry.path);
        }
        Some(entry)
    }

    fn unpin(&self, key: &CacheKey) {
        let mut state = self.state.lock();
        if let Some(count) = state.readers.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.readers.remove(key);
            }
        }
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            // No subscribers is not an error
            let _ = bus.emit(CoreEvent::Cache(event));
        }
    }
}

async fn open_data_file(path: &Path, recorded: u64) -> std::io::Result<(File, u64)> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;

    // Resume from what is actually on disk, never past the recorded length.
    let on_disk = file.metadata().await?.len();
    let offset = on_disk.min(recorded);
    if on_disk != offset {
        file.set_len(offset).await?;
    }
    file.seek(SeekFrom::Start(offset)).await?;

    Ok((file, offset))
}

fn remove_data_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache data file"),
    }
}

// ============================================================================
// Handles
// ============================================================================

/// Exclusive write access to one entry.
///
/// Dropping an unfinished handle releases the lock and leaves the entry
/// Partial.
pub struct WriteHandle {
    directory: Arc<CacheDirectory>,
    key: CacheKey,
    file: File,
    downloaded: u64,
    finished: bool,
}

impl WriteHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Bytes stored so far, including the resumed prefix.
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn directory(&self) -> &Arc<CacheDirectory> {
        &self.directory
    }

    /// Shorthand for [`CacheDirectory::append_bytes`].
    pub async fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let directory = Arc::clone(&self.directory);
        directory.append_bytes(self, bytes).await
    }
}

impl std::fmt::Debug for WriteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHandle")
            .field("key", &self.key)
            .field("downloaded", &self.downloaded)
            .finish()
    }
}

impl Drop for WriteHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.directory.release_writer(&self.key, None);
        }
    }
}

struct ReaderPin {
    directory: Arc<CacheDirectory>,
    key: CacheKey,
}

impl Drop for ReaderPin {
    fn drop(&mut self) {
        self.directory.unpin(&self.key);
    }
}

/// Read access to a stored prefix. Keeps the entry pinned while alive.
pub struct CacheReader {
    pin: ReaderPin,
    file: File,
}

impl CacheReader {
    pub fn key(&self) -> &CacheKey {
        &self.pin.key
    }

    /// Bytes currently readable. Grows while a writer is appending.
    pub fn available_bytes(&self) -> u64 {
        self.pin
            .directory
            .lookup(&self.pin.key)
            .map_or(0, |entry| entry.downloaded_bytes)
    }

    /// Reads up to `len` bytes at `offset`, clamped to the stored prefix.
    pub async fn read_range(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        let available = self.available_bytes();
        if offset >= available || len == 0 {
            return Ok(Bytes::new());
        }

        let len = (available - offset).min(len as u64) as usize;
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let available = self.available_bytes();
        self.read_range(0, available as usize).await
    }
}

impl std::fmt::Debug for CacheReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheReader")
            .field("key", &self.pin.key)
            .finish()
    }
}
