//! # Core Configuration Module
//!
//! Provides bridge injection and runtime settings for the preload core.
//!
//! ## Overview
//!
//! The configuration system uses a builder to construct a `CoreConfig` holding
//! the host capabilities the engine needs. It enforces fail-fast validation
//! so a missing bridge is reported at startup rather than on the first
//! preload request.
//!
//! ## Required Dependencies
//!
//! - `ByteFetcher` - Streams media bytes from an offset (desktop default: reqwest)
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `Clock` - Time source for last-access bookkeeping (default: `SystemClock`)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .byte_fetcher(Arc::new(MyFetcher::default()))
//!     .event_buffer_size(256)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{ByteFetcher, Clock, SystemClock};
use std::sync::Arc;

/// Core configuration for the preload runtime.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Streaming byte fetcher used by every fetch task
    pub byte_fetcher: Arc<dyn ByteFetcher>,

    /// Time source for cache bookkeeping
    pub clock: Arc<dyn Clock>,

    /// Per-subscriber buffer of the event bus
    pub event_buffer_size: usize,

    /// Publish preload and cache events on the event bus
    pub enable_event_bus: bool,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("byte_fetcher", &"ByteFetcher { ... }")
            .field("clock", &"Clock { ... }")
            .field("event_buffer_size", &self.event_buffer_size)
            .field("enable_event_bus", &self.enable_event_bus)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > 65_536 {
            return Err(Error::Config(
                "Event buffer size exceeds maximum of 65,536 events".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn byte_fetcher_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "ByteFetcher".to_string(),
        message: "ByteFetcher implementation is required to download media. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestByteFetcher. \
                 Mobile: inject the player's network stack as a ByteFetcher."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_byte_fetcher() -> Result<Arc<dyn ByteFetcher>> {
    use bridge_desktop::ReqwestByteFetcher;

    let fetcher = ReqwestByteFetcher::new().map_err(|e| {
        Error::Internal(format!("Failed to initialize default ByteFetcher: {}", e))
    })?;
    let fetcher: Arc<dyn ByteFetcher> = Arc::new(fetcher);
    Ok(fetcher)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_byte_fetcher() -> Result<Arc<dyn ByteFetcher>> {
    Err(byte_fetcher_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    byte_fetcher: Option<Arc<dyn ByteFetcher>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
    enable_event_bus: bool,
}

impl CoreConfigBuilder {
    /// Sets the byte fetcher (required unless `desktop-shims` is enabled).
    pub fn byte_fetcher(mut self, fetcher: Arc<dyn ByteFetcher>) -> Self {
        self.byte_fetcher = Some(fetcher);
        self
    }

    /// Overrides the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Mirrors listener events onto the runtime event bus.
    pub fn enable_event_bus(mut self, enabled: bool) -> Self {
        self.enable_event_bus = enabled;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when no `ByteFetcher` is injected and no
    ///   platform default is compiled in
    /// - [`Error::Config`] when a value is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let byte_fetcher = match self.byte_fetcher {
            Some(fetcher) => fetcher,
            None => provide_default_byte_fetcher()?,
        };

        let config = CoreConfig {
            byte_fetcher,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            enable_event_bus: self.enable_event_bus,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::ByteStream;

    struct EmptyFetcher;

    #[async_trait]
    impl ByteFetcher for EmptyFetcher {
        async fn open_stream(&self, _url: &str, range_start: u64) -> BridgeResult<ByteStream> {
            Ok(ByteStream::from_chunks(range_start, Some(0), Vec::new()))
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_byte_fetcher() {
        let result = CoreConfig::builder().build();

        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("ByteFetcher"));
        assert!(err_msg.contains("desktop-shims"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_builder_injects_desktop_fetcher() {
        assert!(CoreConfig::builder().build().is_ok());
    }

    #[test]
    fn test_builder_defaults() {
        let config = CoreConfig::builder()
            .byte_fetcher(Arc::new(EmptyFetcher))
            .build()
            .unwrap();

        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(!config.enable_event_bus);
    }

    #[test]
    fn test_builder_rejects_zero_buffer() {
        let result = CoreConfig::builder()
            .byte_fetcher(Arc::new(EmptyFetcher))
            .event_buffer_size(0)
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Event buffer size must be greater than 0"));
    }

    #[test]
    fn test_debug_hides_bridges() {
        let config = CoreConfig::builder()
            .byte_fetcher(Arc::new(EmptyFetcher))
            .enable_event_bus(true)
            .build()
            .unwrap();

        let debug = format!("{:?}", config);
        assert!(debug.contains("ByteFetcher { ... }"));
        assert!(debug.contains("enable_event_bus: true"));
    }
}
