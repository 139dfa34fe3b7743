//! # Preload Cache Module
//!
//! Bounded on-disk storage for preloaded video prefixes.
//!
//! ## Overview
//!
//! Each cache directory is independent: its own index, its own bounds, its
//! own lock. Key features:
//! - One data file per key, named from the key hash
//! - Persistent `index.json`, reconciled with the files on every open
//! - Single writer per key, resumable partial entries
//! - LRU eviction that never touches entries in use
//! - Pinned readers for the player-side read path
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     CacheDirectory                     │
//! │  - begin_write() / append_bytes()      │
//! │  - commit() / abort()                  │
//! │  - open_read() / delete()              │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> index.json (serde JSON, atomic rename)
//!          ├──> <sha256>.cache data files
//!          └──> EvictionPolicy (after every growth)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_preload::cache::{CacheDirectory, DirectoryOptions};
//! use core_preload::CacheKey;
//!
//! # async fn example() -> core_preload::Result<()> {
//! let dir = CacheDirectory::open("/tmp/preload", DirectoryOptions::default()).await?;
//! let key = CacheKey::new("https://cdn.example.com/v.mp4");
//!
//! let mut handle = dir.begin_write(&key, None).await?;
//! dir.append_bytes(&mut handle, b"...").await?;
//! let entry = dir.commit(handle, false).await?;
//! println!("{} bytes, {:?}", entry.downloaded_bytes, entry.state);
//! # Ok(())
//! # }
//! ```

mod directory;
mod entry;
mod eviction;
mod index;
mod registry;
mod stats;

pub use directory::{
    AbortState, CacheDirectory, CacheReader, DirectoryBounds, DirectoryOptions, WriteHandle,
};
pub use entry::{CacheEntry, EntryState};
pub use eviction::{EvictionPolicy, EvictionReport};
pub use registry::DirectoryRegistry;
pub use stats::DirectoryStats;
