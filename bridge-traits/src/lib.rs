//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the preload core and the platform
//! layer. The core never talks to the network directly: every byte it caches
//! arrives through a [`ByteFetcher`](fetch::ByteFetcher) supplied by the host.
//!
//! ## Traits
//!
//! ### Networking
//! - [`ByteFetcher`](fetch::ByteFetcher) - Sequential byte streams starting at an offset
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS      | host-injected       | 📋 Planned |
//! | Android  | host-injected       | 📋 Planned |
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with a descriptive error when a required capability is
//! missing:
//!
//! ```ignore
//! let fetcher = builder.byte_fetcher
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "ByteFetcher".to_string(),
//!         message: "No byte fetcher provided. \
//!                  Desktop: enable the 'desktop-shims' feature. \
//!                  Mobile: inject the player's network stack.".to_string(),
//!     })?;
//! ```
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! across the fetch worker pool.

pub mod error;
pub mod fetch;
pub mod time;

pub use error::BridgeError;

pub use fetch::{ByteChunkStream, ByteFetcher, ByteStream};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
