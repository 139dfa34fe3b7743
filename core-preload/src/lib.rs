//! # Video Preload Cache
//!
//! Speculatively downloads a bounded prefix of upcoming videos into an
//! on-disk cache, serves those bytes back to the player, and keeps every
//! cache directory within its size and entry-count bounds.
//!
//! ## Overview
//!
//! ```text
//!  PreloadRequest ──> PreloadEngine ──> CacheKeyResolver ──> CacheKey
//!                         │
//!                         ├──> DirectoryRegistry ──> CacheDirectory ──> EvictionPolicy
//!                         │                               ▲
//!                         └──> FetchCoordinator ──────────┘ (WriteHandle per key)
//!                                   │
//!                                   └──> ByteFetcher (host bridge)
//! ```
//!
//! - [`key`] / [`manifest`]: request → cache key, including multi-variant manifests
//! - [`cache`]: the on-disk index, write/read handles, eviction
//! - [`fetch`]: per-key deduplicated downloads on a bounded worker pool
//! - [`engine`]: batches, listeners, stop/release, external queries

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod key;
pub mod listener;
pub mod manifest;
pub mod request;

pub use cache::{
    AbortState, CacheDirectory, CacheEntry, CacheReader, DirectoryOptions, DirectoryStats,
    EntryState, EvictionPolicy, EvictionReport, WriteHandle,
};
pub use config::PreloadConfig;
pub use engine::{BatchHandle, BatchState, PreloadEngine, StopHandle};
pub use error::{PreloadError, PreloadErrorCode, Result};
pub use fetch::{FetchCoordinator, FetchHandle, FetchOutcome, FetchStatus};
pub use key::{CacheKey, CacheKeyResolver, KeyNormalization, ResolvedSource};
pub use listener::{ListenerId, ListenerRegistry, PreloadEvent, PreloadListener};
pub use manifest::{Manifest, Variant, VariantPolicy};
pub use request::PreloadRequest;
