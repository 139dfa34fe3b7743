//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `ByteFetcher` using `reqwest` with HTTP `Range` requests
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ReqwestByteFetcher;
//! use std::sync::Arc;
//!
//! let fetcher = Arc::new(ReqwestByteFetcher::new()?);
//! let config = CoreConfig::builder()
//!     .byte_fetcher(fetcher)
//!     .build()?;
//! ```

mod fetch;

pub use fetch::ReqwestByteFetcher;
