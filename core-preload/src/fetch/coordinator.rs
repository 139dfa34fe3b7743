//! Fetch coordinator: deduplication, worker pool, cooperative stop.

use super::task::FetchTask;
use super::{FetchOutcome, FetchStatus};
use crate::cache::CacheDirectory;
use crate::key::{CacheKey, ResolvedSource};
use bridge_traits::fetch::ByteFetcher;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type TaskKey = (PathBuf, CacheKey);

struct InflightTask {
    id: u64,
    status: watch::Receiver<FetchStatus>,
    cancel: CancellationToken,
    byte_limit: u64,
    /// Earlier tasks for the same key this one waits behind
    predecessors: Vec<watch::Receiver<FetchStatus>>,
}

/// Schedules fetch tasks onto a bounded worker pool.
pub struct FetchCoordinator {
    fetcher: Arc<dyn ByteFetcher>,
    permits: Arc<Semaphore>,
    chunk_size: usize,
    runtime: Handle,
    inflight: Arc<Mutex<HashMap<TaskKey, InflightTask>>>,
    /// Parent of every task token; replaced on each `stop_all`
    generation: Mutex<CancellationToken>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("available_workers", &self.permits.available_permits())
            .field("chunk_size", &self.chunk_size)
            .field("inflight", &self.inflight.lock().len())
            .finish()
    }
}

impl FetchCoordinator {
    /// Creates a coordinator running at most `worker_pool_size` downloads at
    /// once and appending at most `chunk_size` bytes per write. Tasks are
    /// spawned on `runtime`.
    pub fn new(
        fetcher: Arc<dyn ByteFetcher>,
        worker_pool_size: usize,
        chunk_size: usize,
        runtime: Handle,
    ) -> Self {
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            chunk_size: chunk_size.max(1),
            runtime,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            generation: Mutex::new(CancellationToken::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Submits a download of up to `byte_limit` bytes of `source` into
    /// `directory`.
    ///
    /// If a task for the same key in the same directory is running with a
    /// limit of at least `byte_limit`, the returned handle observes that
    /// task. A larger `byte_limit` queues a follow-up task that resumes the
    /// entry once the running one releases it.
    pub fn submit(
        &self,
        directory: Arc<CacheDirectory>,
        source: ResolvedSource,
        byte_limit: u64,
    ) -> FetchHandle {
        let generation = self.generation.lock();
        self.submit_locked(&generation, directory, source, byte_limit)
    }

    /// Like [`submit`](Self::submit), but submits nothing once `cancel` has
    /// fired.
    ///
    /// The check and the submission happen under the generation lock, so a
    /// token cancelled before a concurrent [`stop_all`](Self::stop_all) either
    /// blocks the submission or the new task is cancelled by that stop.
    pub fn submit_unless_cancelled(
        &self,
        directory: Arc<CacheDirectory>,
        source: ResolvedSource,
        byte_limit: u64,
        cancel: &CancellationToken,
    ) -> Option<FetchHandle> {
        let generation = self.generation.lock();
        if cancel.is_cancelled() {
            debug!(key = %source.key, "Fetch not submitted; caller was stopped");
            return None;
        }
        Some(self.submit_locked(&generation, directory, source, byte_limit))
    }

    fn submit_locked(
        &self,
        generation: &CancellationToken,
        directory: Arc<CacheDirectory>,
        source: ResolvedSource,
        byte_limit: u64,
    ) -> FetchHandle {
        let task_key = (directory.root().to_path_buf(), source.key.clone());
        let mut inflight = self.inflight.lock();

        let mut predecessors = Vec::new();
        let predecessor = match inflight.get(&task_key) {
            Some(task) if !task.cancel.is_cancelled() && task.byte_limit >= byte_limit => {
                debug!(key = %source.key, "Attached to running fetch");
                return FetchHandle {
                    key: source.key,
                    directory: task_key.0,
                    status: task.status.clone(),
                    attached: true,
                };
            }
            // Stopped, or running towards a smaller limit: run after it
            // releases the entry.
            Some(task) => {
                if !task.cancel.is_cancelled() {
                    debug!(
                        key = %source.key,
                        running_limit = task.byte_limit,
                        byte_limit,
                        "Extending running fetch"
                    );
                }
                predecessors.extend(
                    task.predecessors
                        .iter()
                        .filter(|status| !status.borrow().is_finished())
                        .cloned(),
                );
                predecessors.push(task.status.clone());
                Some(task.status.clone())
            }
            None => None,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = generation.child_token();
        let (status_tx, status_rx) = watch::channel(FetchStatus::Queued);
        inflight.insert(
            task_key.clone(),
            InflightTask {
                id,
                status: status_rx.clone(),
                cancel: cancel.clone(),
                byte_limit,
                predecessors,
            },
        );
        drop(inflight);

        let task = FetchTask {
            fetcher: Arc::clone(&self.fetcher),
            permits: Arc::clone(&self.permits),
            chunk_size: self.chunk_size,
            directory,
            source: source.clone(),
            byte_limit,
            cancel,
            predecessor,
        };

        let inflight = Arc::clone(&self.inflight);
        let removal_key = task_key.clone();
        self.runtime.spawn(async move {
            let outcome = task.run(&status_tx).await;

            {
                let mut inflight = inflight.lock();
                if inflight.get(&removal_key).is_some_and(|t| t.id == id) {
                    inflight.remove(&removal_key);
                }
            }
            status_tx.send_replace(FetchStatus::Finished(outcome));
        });

        debug!(key = %source.key, byte_limit, "Fetch submitted");
        FetchHandle {
            key: source.key,
            directory: task_key.0,
            status: status_rx,
            attached: false,
        }
    }

    /// Cancels every queued and running task.
    ///
    /// Cancellation takes effect at the next chunk boundary. The returned
    /// future resolves once every cancelled task has finished; it does not
    /// borrow the coordinator. Submissions made after this call run normally.
    pub fn stop_all(&self) -> impl std::future::Future<Output = usize> + Send + 'static {
        let previous = std::mem::take(&mut *self.generation.lock());
        previous.cancel();

        let (count, pending) = {
            let inflight = self.inflight.lock();
            let pending: Vec<watch::Receiver<FetchStatus>> = inflight
                .values()
                .flat_map(|task| task.predecessors.iter().chain(std::iter::once(&task.status)))
                .cloned()
                .collect();
            (inflight.len(), pending)
        };
        info!(tasks = count, "Stopping all fetch tasks");

        async move {
            for mut status in pending {
                // A dropped sender means the task is gone as well.
                let _ = status.wait_for(FetchStatus::is_finished).await;
            }
            count
        }
    }

    /// Number of tasks queued or running.
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn is_inflight(&self, directory: &Path, key: &CacheKey) -> bool {
        self.inflight
            .lock()
            .contains_key(&(directory.to_path_buf(), key.clone()))
    }

    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Observer of one fetch task.
#[derive(Debug, Clone)]
pub struct FetchHandle {
    key: CacheKey,
    directory: PathBuf,
    status: watch::Receiver<FetchStatus>,
    attached: bool,
}

impl FetchHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// True if this submission joined a task that was already running.
    ///
    /// Only happens when the running task's limit covers this submission's,
    /// so the outcome carries at least the requested bytes when it succeeds.
    pub fn is_deduplicated(&self) -> bool {
        self.attached
    }

    pub fn status(&self) -> FetchStatus {
        self.status.borrow().clone()
    }

    /// Receiver that sees every status change of the task.
    pub fn subscribe(&self) -> watch::Receiver<FetchStatus> {
        self.status.clone()
    }

    /// Waits for the task to finish.
    pub async fn wait(mut self) -> FetchOutcome {
        let result = self
            .status
            .wait_for(FetchStatus::is_finished)
            .await
            .map(|status| status.clone());
        let finished = match result {
            Ok(status) => status,
            Err(_) => self.status.borrow().clone(),
        };
        match finished {
            FetchStatus::Finished(outcome) => outcome,
            _ => FetchOutcome::Cancelled(None),
        }
    }
}
