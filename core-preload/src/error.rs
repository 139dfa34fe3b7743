//! # Preload Error Types
//!
//! Every failure in this crate degrades to "this one preload did not
//! complete". Errors are reported per request through listeners and never
//! abort a batch.

use bridge_traits::BridgeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during preload and cache operations.
#[derive(Error, Debug)]
pub enum PreloadError {
    // ========================================================================
    // Request Errors
    // ========================================================================
    /// Manifest JSON is malformed or contains no playable variant.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Request is missing a source or carries an unusable URL.
    #[error("Invalid preload request: {0}")]
    InvalidRequest(String),

    // ========================================================================
    // Cache Directory Errors
    // ========================================================================
    /// Cache directory cannot be created, read or written.
    #[error("Cache directory unavailable: {}: {reason}", path.display())]
    DirectoryUnavailable { path: PathBuf, reason: String },

    /// A write handle for this key is already open.
    #[error("Cache entry is already being written: {0}")]
    AlreadyWriting(String),

    /// The entry was deleted while its write handle was open.
    #[error("Cache entry was removed while open: {0}")]
    EntryRemoved(String),

    /// Eviction could not bring the directory within bounds.
    #[error(
        "Cache bounds exceeded: {total_size}/{max_size} bytes, {entry_count}/{max_entries} entries"
    )]
    BoundsExceeded {
        total_size: u64,
        entry_count: usize,
        max_size: u64,
        max_entries: usize,
    },

    /// Index file could not be encoded or decoded.
    #[error("Cache index error: {0}")]
    Index(#[from] serde_json::Error),

    // ========================================================================
    // Fetch Errors
    // ========================================================================
    /// The source failed before or during streaming.
    #[error("Fetch failed: {0}")]
    FetchError(String),

    /// Error surfaced by a host bridge.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The engine was released; no further work is accepted.
    #[error("Preload engine has been released")]
    Released,

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, host-facing error codes delivered to `on_preload_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadErrorCode {
    InvalidManifest,
    InvalidRequest,
    DirectoryUnavailable,
    AlreadyWriting,
    IoError,
    FetchError,
    BoundsExceeded,
    Released,
}

impl PreloadErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreloadErrorCode::InvalidManifest => "invalid_manifest",
            PreloadErrorCode::InvalidRequest => "invalid_request",
            PreloadErrorCode::DirectoryUnavailable => "directory_unavailable",
            PreloadErrorCode::AlreadyWriting => "already_writing",
            PreloadErrorCode::IoError => "io_error",
            PreloadErrorCode::FetchError => "fetch_error",
            PreloadErrorCode::BoundsExceeded => "bounds_exceeded",
            PreloadErrorCode::Released => "released",
        }
    }
}

impl std::fmt::Display for PreloadErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PreloadError {
    /// Maps the error onto its host-facing code.
    pub fn code(&self) -> PreloadErrorCode {
        match self {
            PreloadError::InvalidManifest(_) => PreloadErrorCode::InvalidManifest,
            PreloadError::InvalidRequest(_) => PreloadErrorCode::InvalidRequest,
            PreloadError::DirectoryUnavailable { .. } => PreloadErrorCode::DirectoryUnavailable,
            PreloadError::AlreadyWriting(_) => PreloadErrorCode::AlreadyWriting,
            PreloadError::BoundsExceeded { .. } => PreloadErrorCode::BoundsExceeded,
            PreloadError::FetchError(_) | PreloadError::Bridge(_) => PreloadErrorCode::FetchError,
            PreloadError::Released | PreloadError::Runtime(_) => PreloadErrorCode::Released,
            PreloadError::Io(_) | PreloadError::Index(_) | PreloadError::EntryRemoved(_) => {
                PreloadErrorCode::IoError
            }
        }
    }

    /// Whether a later identical request may pick up where this one stopped.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            PreloadError::FetchError(_)
                | PreloadError::Bridge(_)
                | PreloadError::AlreadyWriting(_)
                | PreloadError::Io(_)
        )
    }

    pub(crate) fn directory_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PreloadError::DirectoryUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for preload operations.
pub type Result<T> = std::result::Result<T, PreloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            PreloadError::InvalidManifest("eof".into()).code(),
            PreloadErrorCode::InvalidManifest
        );
        assert_eq!(
            PreloadError::Bridge(BridgeError::Timeout("u".into())).code(),
            PreloadErrorCode::FetchError
        );
        assert_eq!(
            PreloadError::Io(std::io::Error::other("disk full")).code(),
            PreloadErrorCode::IoError
        );
        assert_eq!(PreloadErrorCode::DirectoryUnavailable.as_str(), "directory_unavailable");
    }

    #[test]
    fn test_resumable() {
        assert!(PreloadError::FetchError("reset".into()).is_resumable());
        assert!(!PreloadError::InvalidManifest("eof".into()).is_resumable());
        assert!(!PreloadError::Released.is_resumable());
    }

    #[test]
    fn test_error_code_serializes_snake_case() {
        let json = serde_json::to_string(&PreloadErrorCode::InvalidManifest).unwrap();
        assert_eq!(json, "\"invalid_manifest\"");
    }
}
