//! Byte fetcher implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    fetch::{ByteFetcher, ByteStream},
};
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Reqwest-based byte fetcher
///
/// Issues `GET` requests with an open-ended `Range: bytes=N-` header when
/// resuming, and streams the body without buffering it.
pub struct ReqwestByteFetcher {
    client: Client,
}

impl ReqwestByteFetcher {
    /// Create a fetcher with default timeouts.
    pub fn new() -> Result<Self> {
        Self::with_connect_timeout(Duration::from_secs(10))
    }

    /// Create a fetcher with a custom connect timeout.
    ///
    /// No overall request timeout is set: preload bodies are long-lived
    /// streams and cancellation is driven by the caller.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(4)
            .user_agent("video-preload-core/0.1.0")
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn map_send_error(url: &str, err: reqwest::Error) -> BridgeError {
        if err.is_timeout() {
            BridgeError::Timeout(url.to_string())
        } else {
            BridgeError::OperationFailed(err.to_string())
        }
    }
}

/// Parse a `Content-Range` value such as `bytes 100-199/1000` or `bytes */1000`.
///
/// Returns the first byte position (if any) and the complete length (if known).
fn parse_content_range(value: &str) -> Option<(Option<u64>, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;

    let total = match total.trim() {
        "*" => None,
        n => Some(n.parse().ok()?),
    };

    let start = match range.trim() {
        "*" => None,
        r => {
            let (start, _end) = r.split_once('-')?;
            Some(start.trim().parse().ok()?)
        }
    };

    Some((start, total))
}

fn content_range(response: &reqwest::Response) -> Option<(Option<u64>, Option<u64>)> {
    response
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range)
}

#[async_trait]
impl ByteFetcher for ReqwestByteFetcher {
    async fn open_stream(&self, url: &str, range_start: u64) -> Result<ByteStream> {
        let mut request = self.client.get(url);
        if range_start > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", range_start));
        }

        debug!(url = without_query(url), range_start, "Opening byte stream");

        let response = request
            .send()
            .await
            .map_err(|e| Self::map_send_error(url, e))?;

        let status = response.status();

        // Offset at or past the end: nothing left to fetch.
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            let total = content_range(&response).and_then(|(_, total)| total);
            debug!(url = without_query(url), range_start, ?total, "Range not satisfiable, source exhausted");
            return Ok(ByteStream::from_chunks(range_start, total, Vec::new()));
        }

        if !status.is_success() {
            return Err(BridgeError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let total_size = if status == StatusCode::PARTIAL_CONTENT {
            match content_range(&response) {
                Some((Some(start), total)) if start == range_start => total,
                Some((start, _)) => {
                    return Err(BridgeError::OperationFailed(format!(
                        "Server answered range {:?}, requested {}",
                        start, range_start
                    )));
                }
                None => None,
            }
        } else if range_start > 0 {
            warn!(url = without_query(url), range_start, status = status.as_u16(), "Server ignored range request");
            return Err(BridgeError::OperationFailed(format!(
                "Server ignored range request at offset {}",
                range_start
            )));
        } else {
            response.content_length()
        };

        let chunks = response
            .bytes_stream()
            .map_err(|e| {
                if e.is_timeout() {
                    BridgeError::Timeout(e.to_string())
                } else {
                    BridgeError::OperationFailed(e.to_string())
                }
            })
            .boxed();

        Ok(ByteStream::new(range_start, total_size, chunks))
    }
}

/// Signed CDN URLs carry their credentials in the query string.
fn without_query(url: &str) -> &str {
    url.split(&['?', '#'][..]).next().unwrap_or(url)
}
