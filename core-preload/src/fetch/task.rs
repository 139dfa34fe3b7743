//! A single download into one cache entry.

use super::{FetchOutcome, FetchStatus};
use crate::cache::{AbortState, CacheDirectory, WriteHandle};
use crate::error::{PreloadError, Result};
use crate::key::ResolvedSource;
use bridge_traits::fetch::{ByteFetcher, ByteStream};
use core_runtime::logging::redact_url;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub(crate) struct FetchTask {
    pub fetcher: Arc<dyn ByteFetcher>,
    pub permits: Arc<Semaphore>,
    pub chunk_size: usize,
    pub directory: Arc<CacheDirectory>,
    pub source: ResolvedSource,
    pub byte_limit: u64,
    pub cancel: CancellationToken,
    /// An earlier task for the same key that may still hold the write lock
    pub predecessor: Option<watch::Receiver<FetchStatus>>,
}

impl FetchTask {
    #[instrument(
        name = "fetch_task",
        skip_all,
        fields(key = %self.source.key, limit = self.byte_limit)
    )]
    pub async fn run(mut self, status: &watch::Sender<FetchStatus>) -> FetchOutcome {
        if let Some(mut predecessor) = self.predecessor.take() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled_before_start(),
                _ = predecessor.wait_for(FetchStatus::is_finished) => {}
            }
        }

        // Fair semaphore: queued tasks start in submission order.
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return self.cancelled_before_start(),
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    return FetchOutcome::Failed(Arc::new(PreloadError::FetchError(
                        "worker pool closed".to_string(),
                    )))
                }
            },
        };

        match self.download(status).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Fetch failed");
                FetchOutcome::Failed(Arc::new(e))
            }
        }
    }

    fn cancelled_before_start(&self) -> FetchOutcome {
        debug!("Fetch cancelled while queued");
        FetchOutcome::Cancelled(self.directory.lookup(&self.source.key))
    }

    async fn download(&self, status: &watch::Sender<FetchStatus>) -> Result<FetchOutcome> {
        let key = &self.source.key;
        let mut handle = self.directory.begin_write(key, None).await?;
        let offset = handle.downloaded();

        let already_complete = self
            .directory
            .lookup(key)
            .and_then(|entry| entry.total_bytes)
            .is_some_and(|total| offset >= total);
        if already_complete || offset >= self.byte_limit {
            debug!(offset, "Entry already satisfies the limit");
            let entry = self.directory.commit(handle, false).await?;
            return Ok(FetchOutcome::Completed(entry));
        }

        status.send_replace(FetchStatus::Running {
            downloaded: offset,
            limit: self.byte_limit,
        });

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return self.stop(handle).await,
            opened = self.open_stream(offset) => opened,
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => return self.fail(handle, e).await,
        };

        if stream.range_start != offset {
            let e = PreloadError::FetchError(format!(
                "source resumed at {} instead of {}",
                stream.range_start, offset
            ));
            return self.fail(handle, e).await;
        }
        if let Some(total) = stream.total_size {
            self.directory.set_expected_size(&handle, total);
        }

        let mut chunks = stream.chunks;
        let mut exhausted = false;

        while handle.downloaded() < self.byte_limit {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.stop(handle).await,
                next = chunks.next() => next,
            };

            let mut chunk = match next {
                None => {
                    exhausted = true;
                    break;
                }
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return self.fail(handle, e.into()).await,
            };

            let remaining = self.byte_limit - handle.downloaded();
            if chunk.len() as u64 > remaining {
                chunk.truncate(remaining as usize);
            }

            for piece in chunk.chunks(self.chunk_size) {
                if let Err(e) = self.directory.append_bytes(&mut handle, piece).await {
                    return self.fail(handle, e).await;
                }
                status.send_replace(FetchStatus::Running {
                    downloaded: handle.downloaded(),
                    limit: self.byte_limit,
                });
            }
        }

        let entry = self.directory.commit(handle, exhausted).await?;
        debug!(
            bytes = entry.downloaded_bytes,
            state = entry.state.description(),
            "Fetch committed"
        );
        Ok(FetchOutcome::Completed(entry))
    }

    /// Opens the master URL, falling back to each backup in turn. Failover
    /// only happens here, before any byte has been received.
    async fn open_stream(&self, offset: u64) -> Result<ByteStream> {
        let mut last_error = None;

        for (attempt, url) in self.source.candidates().enumerate() {
            match self.fetcher.open_stream(url, offset).await {
                Ok(stream) => {
                    if attempt > 0 {
                        info!(url = %redact_url(url), attempt, "Opened backup source");
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(url = %redact_url(url), error = %e, "Failed to open source");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => e.into(),
            None => PreloadError::FetchError("no source URL".to_string()),
        })
    }

    async fn stop(&self, handle: WriteHandle) -> Result<FetchOutcome> {
        let entry = self.directory.abort(handle, AbortState::Partial).await?;
        debug!(bytes = entry.downloaded_bytes, "Fetch cancelled");
        Ok(FetchOutcome::Cancelled(Some(entry)))
    }

    async fn fail(&self, handle: WriteHandle, error: PreloadError) -> Result<FetchOutcome> {
        if let Err(abort_error) = self.directory.abort(handle, AbortState::Failed).await {
            warn!(error = %abort_error, "Failed to record fetch failure");
        }
        Err(error)
    }
}
