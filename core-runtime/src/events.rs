//! # Event Bus System
//!
//! Host-facing broadcast of preload and cache activity using
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Listener callbacks registered on the engine are the primary notification
//! path. The event bus mirrors the same activity as serializable values so a
//! host bridge (JNI, NAPI, FFI) can forward them without holding Rust
//! callbacks:
//! - **Event Types**: `CoreEvent` wrapping `RequestEvent` and `CacheEvent`
//! - **EventBus**: broadcast channel for publishing events
//! - **EventStream**: receiver wrapper with filtering
//!
//! ```text
//! ┌───────────────┐   emit   ┌───────────┐  subscribe  ┌─────────────┐
//! │ PreloadEngine ├─────────>│           ├────────────>│ Host bridge │
//! └───────────────┘          │ EventBus  │             └─────────────┘
//! ┌───────────────┐   emit   │           │  subscribe  ┌─────────────┐
//! │ CacheDirectory├─────────>│           ├────────────>│  Telemetry  │
//! └───────────────┘          └───────────┘             └─────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Per-request preload lifecycle
    Request(RequestEvent),
    /// Directory-level cache maintenance
    Cache(CacheEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Request(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Request(RequestEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::BoundsExceeded { .. }) => EventSeverity::Warning,
            CoreEvent::Request(RequestEvent::Succeeded { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Evicted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Request Events
// ============================================================================

/// Lifecycle of a single preload request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RequestEvent {
    Started {
        request_id: String,
        /// Cache key, absent when resolution failed before start
        key: Option<String>,
        business_line: String,
    },
    /// Bytes were appended for this request.
    Progress {
        request_id: String,
        key: String,
        downloaded_bytes: u64,
        target_bytes: u64,
    },
    Succeeded {
        request_id: String,
        key: String,
        cache_file_path: String,
        cache_file_size: u64,
    },
    Failed {
        request_id: String,
        /// Stable error code (e.g. `invalid_manifest`)
        code: String,
        message: String,
    },
}

impl RequestEvent {
    fn description(&self) -> &str {
        match self {
            RequestEvent::Started { .. } => "Preload started",
            RequestEvent::Progress { .. } => "Preload progress",
            RequestEvent::Succeeded { .. } => "Preload succeeded",
            RequestEvent::Failed { .. } => "Preload failed",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Maintenance activity on one cache directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Directory index loaded and reconciled with the files on disk.
    DirectoryLoaded {
        directory: String,
        entries: usize,
        orphans_removed: usize,
    },
    Evicted {
        directory: String,
        key: String,
        bytes: u64,
    },
    /// Eviction stopped with every remaining entry in use.
    BoundsExceeded {
        directory: String,
        total_size: u64,
        entry_count: usize,
        max_size: u64,
        max_entries: usize,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::DirectoryLoaded { .. } => "Cache directory loaded",
            CacheEvent::Evicted { .. } => "Cache entry evicted",
            CacheEvent::BoundsExceeded { .. } => "Cache bounds exceeded",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Sends never block; a bus with no subscribers simply drops the event.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error when there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let cache_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Cache(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once every sender is dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
