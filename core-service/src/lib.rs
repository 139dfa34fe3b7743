//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (the byte fetcher
//! and the clock) into the preload engine and exposes the operations a video
//! player binding needs: start/stop/release, listener registration, and the
//! cache file queries used to hand preloaded bytes to the player. Desktop
//! apps typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`); mobile hosts inject their own network stack.
//!
//! ```ignore
//! use core_service::{CoreDependencies, CoreService};
//! use core_preload::{PreloadConfig, PreloadRequest};
//!
//! let service = CoreService::new(CoreDependencies::new(fetcher), PreloadConfig::default())?;
//! service.add_listener(my_listener);
//! service.preload(vec![PreloadRequest::for_url(url, cache_dir)?])?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::{ByteFetcher, Clock, SystemClock};
use core_preload::{
    BatchHandle, DirectoryStats, ListenerId, PreloadConfig, PreloadEngine, PreloadListener,
    PreloadRequest, StopHandle,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::CoreEvent;
use core_runtime::logging::{init_logging, LoggingConfig};
use tokio::sync::broadcast;
use tracing::info;

/// Aggregated handle to all bridge dependencies the core requires.
#[derive(Clone)]
pub struct CoreDependencies {
    pub byte_fetcher: Arc<dyn ByteFetcher>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    /// Construct a dependency bundle using the system clock.
    pub fn new(byte_fetcher: Arc<dyn ByteFetcher>) -> Self {
        Self {
            byte_fetcher,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for CoreDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreDependencies")
            .field("byte_fetcher", &"ByteFetcher { ... }")
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    deps: Arc<CoreDependencies>,
    engine: PreloadEngine,
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("engine", &self.engine)
            .finish()
    }
}

impl CoreService {
    /// Create a new service from the provided dependencies.
    ///
    /// Must be called inside a Tokio runtime; the engine spawns its work on
    /// the current one. The event bus is always enabled so hosts can
    /// subscribe with [`subscribe_events`](Self::subscribe_events).
    pub fn new(deps: CoreDependencies, config: PreloadConfig) -> Result<Self> {
        let core = CoreConfig::builder()
            .byte_fetcher(Arc::clone(&deps.byte_fetcher))
            .clock(Arc::clone(&deps.clock))
            .enable_event_bus(true)
            .build()
            .map_err(capability_error)?;

        let engine = PreloadEngine::new(core, config)?;
        info!("Core service initialized");

        Ok(Self {
            deps: Arc::new(deps),
            engine,
        })
    }

    /// Access the bridge dependencies being used by the service.
    pub fn dependencies(&self) -> Arc<CoreDependencies> {
        Arc::clone(&self.deps)
    }

    /// The underlying engine, for the player-side read path.
    pub fn engine(&self) -> &PreloadEngine {
        &self.engine
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Starts preloading `requests` in order. Returns immediately.
    pub fn preload(&self, requests: Vec<PreloadRequest>) -> Result<BatchHandle> {
        Ok(self.engine.start(requests)?)
    }

    pub fn stop(&self) -> StopHandle {
        self.engine.stop()
    }

    /// Stops all work and detaches every listener. Cached files stay on disk.
    pub fn release(&self) -> StopHandle {
        self.engine.release()
    }

    pub fn is_released(&self) -> bool {
        self.engine.is_released()
    }

    // ------------------------------------------------------------------
    // Listeners & events
    // ------------------------------------------------------------------

    pub fn add_listener(&self, listener: Arc<dyn PreloadListener>) -> ListenerId {
        self.engine.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.engine.remove_listener(id)
    }

    pub fn subscribe_events(&self) -> Option<broadcast::Receiver<CoreEvent>> {
        self.engine.subscribe_events()
    }

    // ------------------------------------------------------------------
    // Cache queries
    // ------------------------------------------------------------------

    pub async fn get_all_cache_file_paths(&self, cache_dir: impl AsRef<Path>) -> Vec<PathBuf> {
        self.engine.all_cache_file_paths(cache_dir.as_ref()).await
    }

    pub async fn get_cache_file_path(
        &self,
        url: &str,
        cache_dir: impl AsRef<Path>,
    ) -> Option<PathBuf> {
        self.engine.cache_file_path(url, cache_dir.as_ref()).await
    }

    /// Stored byte count for `url`, or -1 when nothing is cached.
    pub async fn get_cache_file_real_size(&self, url: &str, cache_dir: impl AsRef<Path>) -> i64 {
        self.engine.cache_file_real_size(url, cache_dir.as_ref()).await
    }

    pub async fn delete_cache_file(&self, url: &str, cache_dir: impl AsRef<Path>) -> bool {
        self.engine.delete_cache_file(url, cache_dir.as_ref()).await
    }

    pub async fn directory_stats(&self, cache_dir: impl AsRef<Path>) -> Option<DirectoryStats> {
        self.engine.directory_stats(cache_dir.as_ref()).await
    }
}

fn capability_error(err: core_runtime::Error) -> CoreError {
    match err {
        core_runtime::Error::CapabilityMissing {
            capability,
            message,
        } => CoreError::CapabilityMissing {
            capability,
            message,
        },
        other => CoreError::Runtime(other),
    }
}

/// Installs the global tracing subscriber.
///
/// Optional: hosts with their own subscriber skip this.
pub fn init_service_logging(config: LoggingConfig) -> Result<()> {
    init_logging(config).map_err(|err| CoreError::InitializationFailed(err.to_string()))
}

/// Convenience bootstrapper for desktop hosts, using the reqwest fetcher.
///
/// ```
/// # #[cfg(feature = "desktop-shims")]
/// # async fn example() -> core_service::Result<()> {
/// use core_preload::PreloadConfig;
/// use core_service::bootstrap_desktop;
///
/// let core = bootstrap_desktop(PreloadConfig::default())?;
/// let paths = core.get_all_cache_file_paths("/tmp/preload").await;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub fn bootstrap_desktop(config: PreloadConfig) -> Result<CoreService> {
    let fetcher = bridge_desktop::ReqwestByteFetcher::new()
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;
    CoreService::new(CoreDependencies::new(Arc::new(fetcher)), config)
}
