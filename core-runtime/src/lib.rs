//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the video preload core:
//! - Logging and tracing infrastructure
//! - Configuration management (bridge injection)
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the preload engine depends on.
//! It establishes the logging conventions, the fail-fast capability checks,
//! and the broadcast channel hosts use to observe cache activity.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
