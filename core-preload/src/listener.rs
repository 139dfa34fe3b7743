//! Preload listeners and the events they receive.

use crate::error::PreloadErrorCode;
use crate::key::CacheKey;
use crate::request::PreloadRequest;
use core_runtime::events::{CoreEvent, RequestEvent};
use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Host callbacks for preload progress.
///
/// Every method has an empty default. Callbacks run on runtime worker
/// threads and should return quickly.
pub trait PreloadListener: Send + Sync {
    fn on_preload_start(&self, _request: &PreloadRequest) {}

    /// The request's bytes are in the cache: either `cache_size` bytes or
    /// the whole resource if it is smaller.
    fn on_preload_success(
        &self,
        _cache_file_path: &Path,
        _cache_file_size: u64,
        _request: &PreloadRequest,
    ) {
    }

    fn on_preload_error(&self, _code: PreloadErrorCode, _request: &PreloadRequest) {}

    fn on_preload_traffic(&self, _request: &PreloadRequest, _downloaded: u64, _target: u64) {}
}

/// Typed preload lifecycle event.
#[derive(Debug, Clone)]
pub enum PreloadEvent {
    Start {
        request: Arc<PreloadRequest>,
        /// Absent when the request failed before a key was derived
        key: Option<CacheKey>,
    },
    Success {
        request: Arc<PreloadRequest>,
        key: CacheKey,
        cache_file_path: PathBuf,
        cache_file_size: u64,
    },
    Error {
        request: Arc<PreloadRequest>,
        code: PreloadErrorCode,
        message: String,
    },
    Traffic {
        request: Arc<PreloadRequest>,
        key: CacheKey,
        downloaded: u64,
        target: u64,
    },
}

impl PreloadEvent {
    pub fn request(&self) -> &PreloadRequest {
        match self {
            PreloadEvent::Start { request, .. }
            | PreloadEvent::Success { request, .. }
            | PreloadEvent::Error { request, .. }
            | PreloadEvent::Traffic { request, .. } => request,
        }
    }

    /// Invokes the matching listener callback.
    pub fn dispatch(&self, listener: &dyn PreloadListener) {
        match self {
            PreloadEvent::Start { request, .. } => listener.on_preload_start(request),
            PreloadEvent::Success {
                request,
                cache_file_path,
                cache_file_size,
                ..
            } => listener.on_preload_success(cache_file_path, *cache_file_size, request),
            PreloadEvent::Error { request, code, .. } => listener.on_preload_error(*code, request),
            PreloadEvent::Traffic {
                request,
                downloaded,
                target,
                ..
            } => listener.on_preload_traffic(request, *downloaded, *target),
        }
    }

    /// Event-bus form of this event.
    pub fn to_core_event(&self) -> CoreEvent {
        let request_id = self.request().id().to_string();
        let event = match self {
            PreloadEvent::Start { request, key } => RequestEvent::Started {
                request_id,
                key: key.as_ref().map(CacheKey::to_string),
                business_line: request.business_line().to_string(),
            },
            PreloadEvent::Success {
                key,
                cache_file_path,
                cache_file_size,
                ..
            } => RequestEvent::Succeeded {
                request_id,
                key: key.to_string(),
                cache_file_path: cache_file_path.display().to_string(),
                cache_file_size: *cache_file_size,
            },
            PreloadEvent::Error { code, message, .. } => RequestEvent::Failed {
                request_id,
                code: code.to_string(),
                message: message.clone(),
            },
            PreloadEvent::Traffic {
                key,
                downloaded,
                target,
                ..
            } => RequestEvent::Progress {
                request_id,
                key: key.to_string(),
                downloaded_bytes: *downloaded,
                target_bytes: *target,
            },
        };
        CoreEvent::Request(event)
    }
}

/// Registration token returned by `add_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Registered listeners, in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn PreloadListener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn PreloadListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn clear(&self) -> usize {
        let mut listeners = self.listeners.write();
        let count = listeners.len();
        listeners.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every listener registered right now.
    ///
    /// The list is snapshotted first, so callbacks may add or remove
    /// listeners without deadlocking.
    pub fn emit(&self, event: &PreloadEvent) {
        let snapshot: Vec<Arc<dyn PreloadListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            event.dispatch(listener.as_ref());
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
