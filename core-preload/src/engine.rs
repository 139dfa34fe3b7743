//! # Preload Engine
//!
//! Entry point for hosts: accepts batches of [`PreloadRequest`]s, routes each
//! to its cache directory and the fetch coordinator, and reports progress to
//! registered [`PreloadListener`]s.
//!
//! ## Batch lifecycle
//!
//! ```text
//! Idle ──start()──> Running ──all requests settled──> Completed
//!                      │
//!                      ├──stop()────> Stopped
//!                      └──release()─> Released
//! ```
//!
//! A request that cannot be resolved, or whose directory cannot be opened,
//! gets `on_preload_error` and nothing else; the rest of the batch proceeds.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_preload::{PreloadConfig, PreloadEngine, PreloadRequest};
//! use core_runtime::config::CoreConfig;
//!
//! # async fn example() -> core_preload::Result<()> {
//! let engine = PreloadEngine::new(CoreConfig::builder().build()?, PreloadConfig::default())?;
//! let request = PreloadRequest::builder()
//!     .url("https://cdn.example.com/v/1.mp4")
//!     .cache_dir("/data/preload")
//!     .cache_size(2 * 1024 * 1024)
//!     .build()?;
//!
//! let batch = engine.start(vec![request])?;
//! batch.wait().await;
//! # Ok(())
//! # }
//! ```

use crate::cache::{CacheDirectory, DirectoryOptions, DirectoryRegistry, DirectoryStats};
use crate::config::PreloadConfig;
use crate::error::{PreloadError, Result};
use crate::fetch::{FetchCoordinator, FetchHandle, FetchOutcome, FetchStatus};
use crate::key::{CacheKey, CacheKeyResolver};
use crate::listener::{ListenerId, ListenerRegistry, PreloadEvent, PreloadListener};
use crate::request::PreloadRequest;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus};
use core_runtime::logging::redact_url;
use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// State of one submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchState {
    Idle,
    Running,
    /// Every request reached success or error
    Completed,
    /// `stop()` was called while the batch was running
    Stopped,
    /// `release()` was called while the batch was running
    Released,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::Stopped | BatchState::Released
        )
    }
}

/// Observer of one batch started with [`PreloadEngine::start`].
#[derive(Debug, Clone)]
pub struct BatchHandle {
    id: Uuid,
    request_count: usize,
    state: watch::Receiver<BatchState>,
}

impl BatchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    pub fn state(&self) -> BatchState {
        *self.state.borrow()
    }

    /// Waits until the batch reaches a terminal state.
    pub async fn wait(mut self) -> BatchState {
        let result = self
            .state
            .wait_for(BatchState::is_terminal)
            .await
            .map(|state| *state);
        match result {
            Ok(state) => state,
            Err(_) => *self.state.borrow(),
        }
    }
}

/// Completion of a `stop()` or `release()` call.
///
/// Dropping the handle does not cancel the stop.
#[derive(Debug)]
pub struct StopHandle {
    join: JoinHandle<usize>,
}

impl StopHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits until every cancelled task has finished. Returns how many tasks
    /// were stopped.
    pub async fn wait(self) -> usize {
        match self.join.await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Stop task did not complete");
                0
            }
        }
    }
}

struct EngineInner {
    resolver: CacheKeyResolver,
    registry: DirectoryRegistry,
    coordinator: FetchCoordinator,
    listeners: ListenerRegistry,
    event_bus: Option<Arc<EventBus>>,
    runtime: Handle,
    released: AtomicBool,
    /// Parent token of every running batch; replaced on `stop()`
    generation: Mutex<CancellationToken>,
    batches: Mutex<HashMap<Uuid, Arc<watch::Sender<BatchState>>>>,
}

/// The preload engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PreloadEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for PreloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadEngine")
            .field("coordinator", &self.inner.coordinator)
            .field("listeners", &self.inner.listeners)
            .field("released", &self.is_released())
            .finish()
    }
}

impl PreloadEngine {
    /// Builds an engine bound to the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`PreloadError::Runtime`] if called outside a Tokio runtime or if
    ///   either configuration is invalid
    pub fn new(core: CoreConfig, config: PreloadConfig) -> Result<Self> {
        core.validate()?;
        config
            .validate()
            .map_err(|msg| PreloadError::Runtime(core_runtime::Error::Config(msg)))?;

        let runtime = Handle::try_current()
            .map_err(|e| PreloadError::Runtime(core_runtime::Error::RuntimeUnavailable(e.to_string())))?;

        let event_bus = core
            .enable_event_bus
            .then(|| Arc::new(EventBus::new(core.event_buffer_size)));

        let mut options = DirectoryOptions::from_config(&config, Arc::clone(&core.clock));
        if let Some(bus) = &event_bus {
            options = options.with_event_bus(Arc::clone(bus));
        }

        let coordinator = FetchCoordinator::new(
            Arc::clone(&core.byte_fetcher),
            config.worker_pool_size,
            config.chunk_size,
            runtime.clone(),
        );

        info!(
            workers = config.worker_pool_size,
            chunk_size = config.chunk_size,
            max_dir_size = config.default_max_dir_size,
            max_dir_entries = config.default_max_dir_entries,
            policy = config.variant_policy.description(),
            "Preload engine created"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                resolver: CacheKeyResolver::new(config.key_normalization.clone(), config.variant_policy),
                registry: DirectoryRegistry::new(options),
                coordinator,
                listeners: ListenerRegistry::new(),
                event_bus,
                runtime,
                released: AtomicBool::new(false),
                generation: Mutex::new(CancellationToken::new()),
                batches: Mutex::new(HashMap::new()),
            }),
        })
    }

    // ========================================================================
    // Listeners & events
    // ========================================================================

    pub fn add_listener(&self, listener: Arc<dyn PreloadListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    /// Returns false if `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Subscribes to the mirrored event stream. `None` when the event bus is
    /// disabled in [`CoreConfig`].
    pub fn subscribe_events(&self) -> Option<broadcast::Receiver<CoreEvent>> {
        self.inner.event_bus.as_ref().map(|bus| bus.subscribe())
    }

    pub fn event_bus(&self) -> Option<Arc<EventBus>> {
        self.inner.event_bus.clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts preloading `requests` in order. Returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`PreloadError::Released`] after [`release`](Self::release).
    pub fn start(&self, requests: Vec<PreloadRequest>) -> Result<BatchHandle> {
        if self.is_released() {
            return Err(PreloadError::Released);
        }

        let id = Uuid::new_v4();
        let request_count = requests.len();
        let (state_tx, state_rx) = watch::channel(BatchState::Idle);
        let state_tx = Arc::new(state_tx);
        let cancel = self.inner.generation.lock().child_token();
        self.inner.batches.lock().insert(id, Arc::clone(&state_tx));

        let inner = Arc::clone(&self.inner);
        let requests: Vec<Arc<PreloadRequest>> = requests.into_iter().map(Arc::new).collect();
        self.inner.runtime.spawn(async move {
            // A stop that landed before this task ran already settled the batch.
            state_tx.send_if_modified(|state| {
                if *state == BatchState::Idle {
                    *state = BatchState::Running;
                    true
                } else {
                    false
                }
            });
            inner.run_batch(id, requests, cancel).await;
            state_tx.send_if_modified(|state| {
                if *state == BatchState::Running {
                    *state = BatchState::Completed;
                    true
                } else {
                    false
                }
            });
            inner.batches.lock().remove(&id);
        });

        Ok(BatchHandle {
            id,
            request_count,
            state: state_rx,
        })
    }

    /// Cancels all running and queued work. Entries stay Partial and resume
    /// on the next identical request. Returns immediately.
    pub fn stop(&self) -> StopHandle {
        self.inner.cancel_batches(BatchState::Stopped);
        let stopping = self.inner.coordinator.stop_all();
        StopHandle {
            join: self.inner.runtime.spawn(stopping),
        }
    }

    /// Stops all work, detaches every listener and drops all directory
    /// handles. Files on disk are kept. Later `start` calls fail.
    pub fn release(&self) -> StopHandle {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return StopHandle {
                join: self.inner.runtime.spawn(async { 0 }),
            };
        }

        let detached = self.inner.listeners.clear();
        self.inner.registry.close();
        self.inner.cancel_batches(BatchState::Released);
        let stopping = self.inner.coordinator.stop_all();
        let inner = Arc::clone(&self.inner);
        info!(listeners = detached, "Releasing preload engine");

        StopHandle {
            join: self.inner.runtime.spawn(async move {
                let stopped = stopping.await;
                let dropped = inner.registry.clear().await;
                debug!(directories = dropped, "Directory handles dropped");
                stopped
            }),
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Number of fetch tasks queued or running.
    pub fn inflight_count(&self) -> usize {
        self.inner.coordinator.inflight_count()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Opens (creating if needed) the cache directory at `cache_dir`, for
    /// the player-side read path.
    pub async fn directory(&self, cache_dir: &Path) -> Result<Arc<CacheDirectory>> {
        if self.is_released() {
            return Err(PreloadError::Released);
        }
        self.inner.registry.get_or_open(cache_dir).await
    }

    /// Data file paths of every entry in `cache_dir`.
    pub async fn all_cache_file_paths(&self, cache_dir: &Path) -> Vec<PathBuf> {
        match self.inner.existing_directory(cache_dir).await {
            Some(directory) => directory.all_file_paths(),
            None => Vec::new(),
        }
    }

    /// Data file path of `url`'s entry, if it has one.
    pub async fn cache_file_path(&self, url: &str, cache_dir: &Path) -> Option<PathBuf> {
        let (directory, key) = self.inner.locate(url, cache_dir).await?;
        directory.lookup(&key).map(|entry| entry.path)
    }

    /// Stored byte count of `url`'s entry, or -1 when unknown.
    pub async fn cache_file_real_size(&self, url: &str, cache_dir: &Path) -> i64 {
        let Some((directory, key)) = self.inner.locate(url, cache_dir).await else {
            return -1;
        };
        directory
            .lookup(&key)
            .map_or(-1, |entry| i64::try_from(entry.downloaded_bytes).unwrap_or(i64::MAX))
    }

    /// Deletes `url`'s entry and data file. Returns false if there was none.
    pub async fn delete_cache_file(&self, url: &str, cache_dir: &Path) -> bool {
        match self.inner.locate(url, cache_dir).await {
            Some((directory, key)) => directory.delete(&key).await,
            None => false,
        }
    }

    pub async fn directory_stats(&self, cache_dir: &Path) -> Option<DirectoryStats> {
        self.inner
            .existing_directory(cache_dir)
            .await
            .map(|directory| directory.stats())
    }
}

impl EngineInner {
    fn emit(&self, event: PreloadEvent) {
        self.listeners.emit(&event);
        if let Some(bus) = &self.event_bus {
            // No subscribers is not an error
            let _ = bus.emit(event.to_core_event());
        }
    }

    fn is_cancelled(&self, batch: &CancellationToken) -> bool {
        batch.is_cancelled() || self.released.load(Ordering::SeqCst)
    }

    fn cancel_batches(&self, terminal: BatchState) {
        let previous = std::mem::take(&mut *self.generation.lock());
        previous.cancel();

        for state in self.batches.lock().values() {
            state.send_if_modified(|current| {
                if current.is_terminal() {
                    false
                } else {
                    *current = terminal;
                    true
                }
            });
        }
    }

    async fn existing_directory(&self, cache_dir: &Path) -> Option<Arc<CacheDirectory>> {
        if self.released.load(Ordering::SeqCst) || cache_dir.as_os_str().is_empty() {
            return None;
        }
        match self.registry.open_existing(cache_dir).await {
            Ok(directory) => directory,
            Err(e) => {
                warn!(dir = %cache_dir.display(), error = %e, "Cache directory query failed");
                None
            }
        }
    }

    async fn locate(&self, url: &str, cache_dir: &Path) -> Option<(Arc<CacheDirectory>, CacheKey)> {
        if url.trim().is_empty() {
            return None;
        }
        let key = self.resolver.key_for_url(url).ok()?;
        let directory = self.existing_directory(cache_dir).await?;
        Some((directory, key))
    }

    #[instrument(skip(self, requests, cancel), fields(count = requests.len()))]
    async fn run_batch(
        self: &Arc<Self>,
        id: Uuid,
        requests: Vec<Arc<PreloadRequest>>,
        cancel: CancellationToken,
    ) {
        info!(batch = %id, "Preload batch started");
        let mut observers = Vec::new();

        for request in requests {
            if self.is_cancelled(&cancel) {
                debug!(batch = %id, "Batch stopped before all requests were submitted");
                break;
            }
            if let Some(observer) = self.submit_request(request, &cancel).await {
                observers.push(observer);
            }
        }

        join_all(observers).await;
        info!(batch = %id, "Preload batch settled");
    }

    /// Routes one request. Returns a future that reports the fetch outcome,
    /// or `None` if the request already settled or the batch was cancelled.
    async fn submit_request(
        self: &Arc<Self>,
        request: Arc<PreloadRequest>,
        cancel: &CancellationToken,
    ) -> Option<BoxFuture<'static, ()>> {
        let source = match self.resolver.resolve(&request) {
            Ok(source) => source,
            Err(e) => {
                warn!(request = %request.id(), error = %e, "Skipping unresolvable preload request");
                self.emit_error(&request, &e);
                return None;
            }
        };

        let directory = match self.registry.get_or_open(request.cache_dir()).await {
            Ok(directory) => directory,
            Err(_) if self.is_cancelled(cancel) => return None,
            Err(e) => {
                warn!(request = %request.id(), error = %e, "Skipping preload request");
                self.emit_error(&request, &e);
                return None;
            }
        };
        // stop() or release() may have run while the directory was opening.
        if self.is_cancelled(cancel) {
            debug!(request = %request.id(), "Batch cancelled before submission");
            return None;
        }
        directory.set_bounds(request.cache_dir_max_size(), request.cache_dir_max_entries());

        debug!(
            request = %request.id(),
            url = %redact_url(&source.url),
            key = %source.key,
            business_line = request.business_line(),
            "Preload request accepted"
        );
        self.emit(PreloadEvent::Start {
            request: Arc::clone(&request),
            key: Some(source.key.clone()),
        });

        if let Some(entry) = directory.lookup(&source.key) {
            if entry.satisfies(request.cache_size()) {
                directory.touch(&source.key);
                debug!(key = %source.key, bytes = entry.downloaded_bytes, "Preload already satisfied");
                self.emit(PreloadEvent::Success {
                    request,
                    key: source.key,
                    cache_file_path: entry.path,
                    cache_file_size: entry.downloaded_bytes,
                });
                return None;
            }
        }

        let handle = self.coordinator.submit_unless_cancelled(
            directory,
            source,
            request.cache_size(),
            cancel,
        )?;
        Some(Arc::clone(self).observe(request, handle).boxed())
    }

    /// Forwards progress of `handle` to listeners until the fetch ends.
    async fn observe(self: Arc<Self>, request: Arc<PreloadRequest>, handle: FetchHandle) {
        let mut status = handle.subscribe();
        let mut last_reported = None;

        loop {
            let current = status.borrow_and_update().clone();
            match current {
                FetchStatus::Queued => {}
                FetchStatus::Running { downloaded, .. } => {
                    if last_reported != Some(downloaded) {
                        last_reported = Some(downloaded);
                        self.emit(PreloadEvent::Traffic {
                            request: Arc::clone(&request),
                            key: handle.key().clone(),
                            downloaded,
                            target: request.cache_size(),
                        });
                    }
                }
                FetchStatus::Finished(outcome) => {
                    self.report_outcome(&request, &handle, outcome);
                    return;
                }
            }

            if status.changed().await.is_err() {
                // Sender gone without a final status; report whatever it left.
                if let FetchStatus::Finished(outcome) = status.borrow().clone() {
                    self.report_outcome(&request, &handle, outcome);
                }
                return;
            }
        }
    }

    fn report_outcome(&self, request: &Arc<PreloadRequest>, handle: &FetchHandle, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Completed(entry) => {
                info!(
                    key = %handle.key(),
                    bytes = entry.downloaded_bytes,
                    state = entry.state.description(),
                    "Preload succeeded"
                );
                self.emit(PreloadEvent::Success {
                    request: Arc::clone(request),
                    key: handle.key().clone(),
                    cache_file_path: entry.path,
                    cache_file_size: entry.downloaded_bytes,
                });
            }
            FetchOutcome::Cancelled(_) => {
                debug!(key = %handle.key(), "Preload cancelled");
            }
            FetchOutcome::Failed(error) => {
                self.emit_error(request, &error);
            }
        }
    }

    fn emit_error(&self, request: &Arc<PreloadRequest>, error: &PreloadError) {
        self.emit(PreloadEvent::Error {
            request: Arc::clone(request),
            code: error.code(),
            message: error.to_string(),
        });
    }
}
