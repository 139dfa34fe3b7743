//! Shared fixtures for preload integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::fetch::{ByteChunkStream, ByteFetcher, ByteStream};
use bytes::Bytes;
use core_preload::{PreloadErrorCode, PreloadListener, PreloadRequest};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Unique, not yet created directory under the system temp dir.
pub fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4()))
}

/// `len` bytes of a repeating pattern, so misplaced ranges show up.
pub fn payload(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

/// How a scripted source behaves.
#[derive(Clone)]
pub enum Script {
    /// Serve `data` in `chunk`-sized pieces
    Serve { data: Bytes, chunk: usize },
    /// Serve without reporting a total size
    ServeUnsized { data: Bytes, chunk: usize },
    /// Refuse to open with this HTTP status
    Refuse(u16),
    /// Serve until `fail_at` bytes, then error
    BreakAt { data: Bytes, chunk: usize, fail_at: usize },
    /// Each chunk waits for a permit from `gate`
    Gated {
        data: Bytes,
        chunk: usize,
        gate: Arc<Semaphore>,
    },
}

/// In-memory [`ByteFetcher`] driven by per-URL scripts.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<(String, u64)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url: &str, script: Script) {
        self.scripts.lock().insert(url.to_string(), script);
    }

    pub fn serve(&self, url: &str, data: Bytes, chunk: usize) {
        self.script(url, Script::Serve { data, chunk });
    }

    /// Every `(url, range_start)` passed to `open_stream`, in order.
    pub fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, url: &str) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, offset)| *offset)
            .collect()
    }
}

#[async_trait]
impl ByteFetcher for ScriptedFetcher {
    async fn open_stream(&self, url: &str, range_start: u64) -> BridgeResult<ByteStream> {
        self.calls.lock().push((url.to_string(), range_start));
        let script = self
            .scripts
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| BridgeError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })?;

        let start = range_start as usize;
        let stream = match script {
            Script::Serve { data, chunk } => {
                let total = data.len() as u64;
                ByteStream::new(range_start, Some(total), chunks(data, start, chunk, None, None))
            }
            Script::ServeUnsized { data, chunk } => {
                ByteStream::new(range_start, None, chunks(data, start, chunk, None, None))
            }
            Script::Refuse(status) => {
                return Err(BridgeError::HttpStatus {
                    status,
                    url: url.to_string(),
                })
            }
            Script::BreakAt {
                data,
                chunk,
                fail_at,
            } => {
                let total = data.len() as u64;
                ByteStream::new(
                    range_start,
                    Some(total),
                    chunks(data, start, chunk, Some(fail_at), None),
                )
            }
            Script::Gated { data, chunk, gate } => {
                let total = data.len() as u64;
                ByteStream::new(
                    range_start,
                    Some(total),
                    chunks(data, start, chunk, None, Some(gate)),
                )
            }
        };
        Ok(stream)
    }
}

fn chunks(
    data: Bytes,
    start: usize,
    chunk: usize,
    fail_at: Option<usize>,
    gate: Option<Arc<Semaphore>>,
) -> ByteChunkStream {
    stream::unfold(start, move |pos| {
        let data = data.clone();
        let gate = gate.clone();
        async move {
            if pos >= data.len() {
                return None;
            }
            if fail_at.is_some_and(|limit| pos >= limit) {
                let err = BridgeError::OperationFailed("connection reset".to_string());
                return Some((Err(err), data.len()));
            }
            if let Some(gate) = gate {
                gate.acquire().await.ok()?.forget();
            }
            let mut end = (pos + chunk).min(data.len());
            if let Some(limit) = fail_at {
                end = end.min(limit.max(pos + 1));
            }
            Some((Ok(data.slice(pos..end)), end))
        }
    })
    .boxed()
}

/// Listener callbacks, as recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Start(String),
    Success {
        url: String,
        path: PathBuf,
        size: u64,
    },
    Error {
        url: String,
        code: PreloadErrorCode,
    },
    Traffic {
        url: String,
        downloaded: u64,
        target: u64,
    },
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub fn starts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Start(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn successes(&self) -> Vec<(String, PathBuf, u64)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Success { url, path, size } => Some((url, path, size)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(String, PreloadErrorCode)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Error { url, code } => Some((url, code)),
                _ => None,
            })
            .collect()
    }

    pub fn traffic(&self) -> Vec<(String, u64, u64)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Traffic {
                    url,
                    downloaded,
                    target,
                } => Some((url, downloaded, target)),
                _ => None,
            })
            .collect()
    }
}

fn label(request: &PreloadRequest) -> String {
    request
        .name()
        .or(request.url())
        .unwrap_or("<manifest>")
        .to_string()
}

impl PreloadListener for RecordingListener {
    fn on_preload_start(&self, request: &PreloadRequest) {
        self.events.lock().push(Recorded::Start(label(request)));
    }

    fn on_preload_success(&self, path: &Path, size: u64, request: &PreloadRequest) {
        self.events.lock().push(Recorded::Success {
            url: label(request),
            path: path.to_path_buf(),
            size,
        });
    }

    fn on_preload_error(&self, code: PreloadErrorCode, request: &PreloadRequest) {
        self.events.lock().push(Recorded::Error {
            url: label(request),
            code,
        });
    }

    fn on_preload_traffic(&self, request: &PreloadRequest, downloaded: u64, target: u64) {
        self.events.lock().push(Recorded::Traffic {
            url: label(request),
            downloaded,
            target,
        });
    }
}

/// Polls `condition` every few milliseconds for up to five seconds.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
