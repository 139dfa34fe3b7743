//! Preload engine configuration

use crate::key::KeyNormalization;
use crate::manifest::VariantPolicy;
use std::time::Duration;

/// Default download shard size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
/// Default per-directory size cap (60 MiB).
pub const DEFAULT_MAX_DIR_SIZE: u64 = 60 * 1024 * 1024;
/// Default per-directory entry cap.
pub const DEFAULT_MAX_DIR_ENTRIES: usize = 10;
/// Default number of concurrent fetch tasks.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 2;
/// Entries accessed more recently than this are never evicted.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(2);

/// Configuration for the preload engine.
#[derive(Debug, Clone)]
pub struct PreloadConfig {
    /// Number of fetch tasks allowed to stream at once (default: 2)
    pub worker_pool_size: usize,

    /// Largest chunk appended per write; larger network chunks are split
    pub chunk_size: usize,

    /// Directory size cap used until a request supplies one (default: 60 MiB)
    pub default_max_dir_size: u64,

    /// Directory entry cap used until a request supplies one (default: 10)
    pub default_max_dir_entries: usize,

    /// Recently read entries are protected from eviction for this long
    pub grace_window: Duration,

    /// URL → key normalization rules
    pub key_normalization: KeyNormalization,

    /// Manifest variant selection
    pub variant_policy: VariantPolicy,

    /// File name of the per-directory index
    pub index_file_name: String,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_max_dir_size: DEFAULT_MAX_DIR_SIZE,
            default_max_dir_entries: DEFAULT_MAX_DIR_ENTRIES,
            grace_window: DEFAULT_GRACE_WINDOW,
            key_normalization: KeyNormalization::default(),
            variant_policy: VariantPolicy::default(),
            index_file_name: "index.json".to_string(),
        }
    }
}

impl PreloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn with_default_max_dir_size(mut self, bytes: u64) -> Self {
        self.default_max_dir_size = bytes;
        self
    }

    pub fn with_default_max_dir_entries(mut self, entries: usize) -> Self {
        self.default_max_dir_entries = entries;
        self
    }

    pub fn with_grace_window(mut self, window: Duration) -> Self {
        self.grace_window = window;
        self
    }

    pub fn with_key_normalization(mut self, normalization: KeyNormalization) -> Self {
        self.key_normalization = normalization;
        self
    }

    pub fn with_variant_policy(mut self, policy: VariantPolicy) -> Self {
        self.variant_policy = policy;
        self
    }

    pub fn with_index_file_name(mut self, name: impl Into<String>) -> Self {
        self.index_file_name = name.into();
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_pool_size == 0 {
            return Err("worker_pool_size must be at least 1".to_string());
        }

        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than 0".to_string());
        }

        if self.default_max_dir_size == 0 {
            return Err("default_max_dir_size must be greater than 0".to_string());
        }

        if self.default_max_dir_entries == 0 {
            return Err("default_max_dir_entries must be at least 1".to_string());
        }

        if self.index_file_name.is_empty()
            || self.index_file_name.contains(['/', '\\'])
            || self.index_file_name.ends_with(".cache")
        {
            return Err("index_file_name must be a plain file name without the .cache suffix".to_string());
        }

        Ok(())
    }
}
