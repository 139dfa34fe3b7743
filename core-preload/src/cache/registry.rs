//! Open cache directories, keyed by path.

use super::directory::{CacheDirectory, DirectoryOptions};
use crate::error::{PreloadError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Lazily opens each cache directory once and hands out shared handles.
///
/// Owned by one engine; there is no process-wide registry.
#[derive(Debug)]
pub struct DirectoryRegistry {
    options: DirectoryOptions,
    // Held across `open` so a directory is never loaded twice.
    directories: Mutex<HashMap<PathBuf, Arc<CacheDirectory>>>,
    closed: AtomicBool,
}

impl DirectoryRegistry {
    pub fn new(options: DirectoryOptions) -> Self {
        Self {
            options,
            directories: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the open directory at `path`, opening (and creating) it on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns [`PreloadError::Released`] once [`close`](Self::close) has been
    /// called, including for opens that were waiting on the lock.
    pub async fn get_or_open(&self, path: &Path) -> Result<Arc<CacheDirectory>> {
        let id = normalize(path);
        let mut directories = self.directories.lock().await;
        if self.is_closed() {
            return Err(PreloadError::Released);
        }
        if let Some(directory) = directories.get(&id) {
            return Ok(Arc::clone(directory));
        }

        let directory = CacheDirectory::open(&id, self.options.clone()).await?;
        if self.is_closed() {
            debug!(dir = %id.display(), "Registry closed while opening directory");
            return Err(PreloadError::Released);
        }
        debug!(dir = %id.display(), "Registered cache directory");
        directories.insert(id, Arc::clone(&directory));
        Ok(directory)
    }

    /// Like [`get_or_open`](Self::get_or_open), but never creates a
    /// directory that does not exist on disk.
    pub async fn open_existing(&self, path: &Path) -> Result<Option<Arc<CacheDirectory>>> {
        if let Some(directory) = self.get(path).await {
            return Ok(Some(directory));
        }
        if !tokio::fs::metadata(path).await.is_ok_and(|meta| meta.is_dir()) {
            return Ok(None);
        }
        self.get_or_open(path).await.map(Some)
    }

    /// Returns the directory only if it is already open.
    pub async fn get(&self, path: &Path) -> Option<Arc<CacheDirectory>> {
        self.directories.lock().await.get(&normalize(path)).cloned()
    }

    pub async fn directories(&self) -> Vec<Arc<CacheDirectory>> {
        self.directories.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.directories.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Refuses every later open. Directories already open stay available
    /// until [`clear`](Self::clear).
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drops every handle. Files on disk are untouched.
    pub async fn clear(&self) -> usize {
        let mut directories = self.directories.lock().await;
        let count = directories.len();
        directories.clear();
        count
    }
}

/// Collapses `.` components and trailing separators so equivalent spellings
/// share one directory handle.
fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}
