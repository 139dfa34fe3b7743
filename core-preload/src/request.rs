//! Preload request value type.

use crate::error::{PreloadError, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Bytes preloaded per request when the caller does not say otherwise.
pub const DEFAULT_PRELOAD_BYTES: u64 = 1024 * 1024;

/// One video to preload into one cache directory.
///
/// Immutable once built. The engine consumes it for a single fetch task and
/// hands it back to listeners by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadRequest {
    id: Uuid,
    name: Option<String>,
    url: Option<String>,
    manifest_json: Option<String>,
    cache_dir: PathBuf,
    cache_size: u64,
    cache_dir_max_size: Option<u64>,
    cache_dir_max_entries: Option<usize>,
    business_line: String,
}

impl PreloadRequest {
    pub fn builder() -> PreloadRequestBuilder {
        PreloadRequestBuilder::default()
    }

    /// Shorthand for a plain URL request with default limits.
    pub fn for_url(url: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::builder().url(url).cache_dir(cache_dir).build()
    }

    /// Correlation id, unique per request.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Manifest text. Takes precedence over [`url`](Self::url) when present.
    pub fn manifest_json(&self) -> Option<&str> {
        self.manifest_json.as_deref()
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Maximum bytes to preload for this request.
    pub fn cache_size(&self) -> u64 {
        self.cache_size
    }

    /// Directory-wide size cap, if the caller set one.
    pub fn cache_dir_max_size(&self) -> Option<u64> {
        self.cache_dir_max_size
    }

    /// Directory-wide entry cap, if the caller set one.
    pub fn cache_dir_max_entries(&self) -> Option<usize> {
        self.cache_dir_max_entries
    }

    /// Free-form tag used for logs and metrics only.
    pub fn business_line(&self) -> &str {
        &self.business_line
    }
}

#[derive(Debug, Default)]
pub struct PreloadRequestBuilder {
    name: Option<String>,
    url: Option<String>,
    manifest_json: Option<String>,
    cache_dir: Option<PathBuf>,
    cache_size: Option<u64>,
    cache_dir_max_size: Option<u64>,
    cache_dir_max_entries: Option<usize>,
    business_line: Option<String>,
}

impl PreloadRequestBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn manifest_json(mut self, json: impl Into<String>) -> Self {
        self.manifest_json = Some(json.into());
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn cache_size(mut self, bytes: u64) -> Self {
        self.cache_size = Some(bytes);
        self
    }

    /// Zero leaves the directory's current cap untouched.
    pub fn cache_dir_max_size(mut self, bytes: u64) -> Self {
        self.cache_dir_max_size = (bytes > 0).then_some(bytes);
        self
    }

    /// Zero leaves the directory's current cap untouched.
    pub fn cache_dir_max_entries(mut self, entries: usize) -> Self {
        self.cache_dir_max_entries = (entries > 0).then_some(entries);
        self
    }

    pub fn business_line(mut self, tag: impl Into<String>) -> Self {
        self.business_line = Some(tag.into());
        self
    }

    /// Builds the request.
    ///
    /// Only presence is checked here; URL and manifest contents are validated
    /// when the engine resolves the request, so a bad manifest becomes a
    /// per-request error instead of a rejected batch.
    pub fn build(self) -> Result<PreloadRequest> {
        let url = self.url.filter(|u| !u.trim().is_empty());
        let manifest_json = self.manifest_json.filter(|m| !m.trim().is_empty());

        if url.is_none() && manifest_json.is_none() {
            return Err(PreloadError::InvalidRequest(
                "A url or manifest_json is required".to_string(),
            ));
        }

        let cache_dir = self
            .cache_dir
            .filter(|d| !d.as_os_str().is_empty())
            .ok_or_else(|| {
                PreloadError::InvalidRequest(
                    "Cache directory is required. Use .cache_dir() to set it.".to_string(),
                )
            })?;

        let cache_size = self.cache_size.unwrap_or(DEFAULT_PRELOAD_BYTES);
        if cache_size == 0 {
            return Err(PreloadError::InvalidRequest(
                "cache_size must be greater than 0".to_string(),
            ));
        }

        Ok(PreloadRequest {
            id: Uuid::new_v4(),
            name: self.name,
            url,
            manifest_json,
            cache_dir,
            cache_size,
            cache_dir_max_size: self.cache_dir_max_size,
            cache_dir_max_entries: self.cache_dir_max_entries,
            business_line: self.business_line.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let request = PreloadRequest::for_url("https://cdn.example.com/v/1.mp4", "/tmp/preload")
            .unwrap();

        assert_eq!(request.cache_size(), DEFAULT_PRELOAD_BYTES);
        assert_eq!(request.cache_dir_max_size(), None);
        assert_eq!(request.business_line(), "");
        assert!(request.manifest_json().is_none());
    }

    #[test]
    fn test_builder_requires_source() {
        let err = PreloadRequest::builder()
            .cache_dir("/tmp/preload")
            .url("   ")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("url or manifest_json"));
    }

    #[test]
    fn test_builder_requires_cache_dir() {
        let err = PreloadRequest::builder()
            .url("https://cdn.example.com/v/1.mp4")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Cache directory is required"));
    }

    #[test]
    fn test_zero_caps_are_unset() {
        let request = PreloadRequest::builder()
            .url("https://cdn.example.com/v/1.mp4")
            .cache_dir("/tmp/preload")
            .cache_dir_max_size(0)
            .cache_dir_max_entries(0)
            .build()
            .unwrap();

        assert_eq!(request.cache_dir_max_size(), None);
        assert_eq!(request.cache_dir_max_entries(), None);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = PreloadRequest::for_url("https://a/x", "/tmp").unwrap();
        let b = PreloadRequest::for_url("https://a/x", "/tmp").unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_malformed_manifest_still_builds() {
        let request = PreloadRequest::builder()
            .manifest_json("{not json")
            .cache_dir("/tmp/preload")
            .build();
        assert!(request.is_ok());
    }
}
