//! Byte Fetcher Bridge
//!
//! The preload core consumes remote media as plain sequential byte streams.
//! Transport concerns (TLS, redirects, connection pooling, retries) belong to
//! the host implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;

use crate::error::Result;

/// Boxed stream of body chunks produced by a [`ByteFetcher`].
pub type ByteChunkStream = BoxStream<'static, Result<Bytes>>;

/// An open byte stream positioned at `range_start`.
pub struct ByteStream {
    /// Offset of the first byte yielded by `chunks`.
    pub range_start: u64,
    /// Full length of the remote resource when the transport reports it.
    pub total_size: Option<u64>,
    /// Body chunks, in order.
    pub chunks: ByteChunkStream,
}

impl ByteStream {
    pub fn new(range_start: u64, total_size: Option<u64>, chunks: ByteChunkStream) -> Self {
        Self {
            range_start,
            total_size,
            chunks,
        }
    }

    /// Build a stream from already-materialized chunks.
    ///
    /// Used by in-memory fetchers and tests.
    pub fn from_chunks(range_start: u64, total_size: Option<u64>, chunks: Vec<Bytes>) -> Self {
        let chunks = stream::iter(chunks.into_iter().map(Ok)).boxed();
        Self::new(range_start, total_size, chunks)
    }

    /// Bytes remaining after `range_start`, if the total is known.
    pub fn remaining(&self) -> Option<u64> {
        self.total_size
            .map(|total| total.saturating_sub(self.range_start))
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("range_start", &self.range_start)
            .field("total_size", &self.total_size)
            .finish_non_exhaustive()
    }
}

/// Streaming byte-range fetcher.
///
/// Implementations must yield the resource's bytes sequentially starting at
/// `range_start`. A server that ignores the range and answers from offset 0
/// must be reported as an error rather than silently returning the wrong
/// bytes.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::fetch::{ByteFetcher, ByteStream};
///
/// async fn head_bytes(fetcher: &dyn ByteFetcher, url: &str) -> Result<Vec<u8>> {
///     let mut stream = fetcher.open_stream(url, 0).await?;
///     let mut out = Vec::new();
///     while let Some(chunk) = stream.chunks.next().await {
///         out.extend_from_slice(&chunk?);
///     }
///     Ok(out)
/// }
/// ```
#[async_trait]
pub trait ByteFetcher: Send + Sync {
    /// Open a stream over `url` beginning at byte `range_start`.
    async fn open_stream(&self, url: &str, range_start: u64) -> Result<ByteStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use mockall::mock;

    mock! {
        Fetcher {}

        #[async_trait]
        impl ByteFetcher for Fetcher {
            async fn open_stream(&self, url: &str, range_start: u64) -> Result<ByteStream>;
        }
    }

    #[tokio::test]
    async fn test_from_chunks_yields_in_order() {
        let mut stream = ByteStream::from_chunks(
            0,
            Some(6),
            vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")],
        );

        let mut collected = Vec::new();
        while let Some(chunk) = stream.chunks.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(collected, b"abcdef");
    }

    #[test]
    fn test_remaining() {
        let stream = ByteStream::from_chunks(4, Some(10), Vec::new());
        assert_eq!(stream.remaining(), Some(6));

        let unknown = ByteStream::from_chunks(4, None, Vec::new());
        assert_eq!(unknown.remaining(), None);
    }

    #[tokio::test]
    async fn test_mock_fetcher_reports_status() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_open_stream().returning(|url, _| {
            Err(BridgeError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })
        });

        let err = fetcher
            .open_stream("https://cdn.example.com/a.mp4", 0)
            .await
            .unwrap_err();
        assert!(err.is_network_error());
        assert!(err.to_string().contains("404"));
    }
}
