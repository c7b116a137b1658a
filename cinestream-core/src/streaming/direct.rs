//! Pass-through streaming of a file range from a content reader.
//!
//! Bytes are read sequentially from a reader seeked to the range start, so
//! playback only waits on the pieces it actually reaches.

use std::io::SeekFrom;
use std::path::Path;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use super::RangePlan;
use crate::content::FileReader;

/// Size of chunks read from the content reader.
const CHUNK_SIZE: usize = 256 * 1024;

/// A planned range together with the body that produces it.
pub struct DirectStream {
    pub plan: RangePlan,
    pub content_type: String,
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
}

impl std::fmt::Debug for DirectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectStream")
            .field("plan", &self.plan)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// MIME type from the file extension.
pub fn content_type_for(path: &str) -> String {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    // mime_guess has no entry for these container types
    match extension.as_deref() {
        Some("mkv") => "video/x-matroska".to_string(),
        Some("ts") => "video/MP2T".to_string(),
        Some("m3u8") => "application/vnd.apple.mpegurl".to_string(),
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

struct RangeState {
    reader: FileReader,
    seek_to: Option<u64>,
    remaining: u64,
    delivered: u64,
}

/// Streams exactly `plan.content_length()` bytes starting at `plan.start`.
///
/// An error before any byte was produced is yielded to the transport. A read
/// failure or early end of file after bytes were delivered ends the stream
/// quietly; a disconnected client is the usual cause.
pub fn range_stream(reader: FileReader, plan: RangePlan) -> BoxStream<'static, std::io::Result<Bytes>> {
    let state = RangeState {
        reader,
        seek_to: Some(plan.start),
        remaining: plan.content_length(),
        delivered: 0,
    };

    stream::unfold(state, |mut state| async move {
        if let Some(start) = state.seek_to.take()
            && let Err(e) = state.reader.seek(SeekFrom::Start(start)).await
        {
            warn!(start, error = %e, "Failed to seek content reader");
            state.remaining = 0;
            return Some((Err(e), state));
        }

        if state.remaining == 0 {
            return None;
        }

        let want = (CHUNK_SIZE as u64).min(state.remaining) as usize;
        let mut buffer = vec![0u8; want];
        match state.reader.read(&mut buffer).await {
            Ok(0) => {
                debug!(
                    delivered = state.delivered,
                    missing = state.remaining,
                    "Content reader ended before range end"
                );
                None
            }
            Ok(read) => {
                buffer.truncate(read);
                state.remaining -= read as u64;
                state.delivered += read as u64;
                Some((Ok(Bytes::from(buffer)), state))
            }
            Err(e) if state.delivered > 0 => {
                debug!(delivered = state.delivered, error = %e, "Range stream ended after read failure");
                None
            }
            Err(e) => {
                state.remaining = 0;
                Some((Err(e), state))
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use futures::TryStreamExt;
    use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

    use super::*;

    fn reader(data: Vec<u8>) -> FileReader {
        Box::pin(Cursor::new(data))
    }

    async fn collect(stream: BoxStream<'static, std::io::Result<Bytes>>) -> Vec<u8> {
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    /// Serves `good` bytes, then fails every read.
    struct FlakyReader {
        inner: Cursor<Vec<u8>>,
        good: u64,
    }

    impl AsyncRead for FlakyReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.inner.position() >= self.good {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "peer went away",
                )));
            }
            let position = self.inner.position() as usize;
            let end = (self.good as usize)
                .min(self.inner.get_ref().len())
                .min(position + buf.remaining());
            let chunk = self.inner.get_ref()[position..end].to_vec();
            buf.put_slice(&chunk);
            self.inner.set_position(end as u64);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncSeek for FlakyReader {
        fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
            Pin::new(&mut self.inner).start_seek(position)
        }

        fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
            Pin::new(&mut self.inner).poll_complete(cx)
        }
    }

    #[tokio::test]
    async fn test_full_stream() {
        let data: Vec<u8> = (0..=255).collect();
        let plan = RangePlan::full(256);
        assert_eq!(collect(range_stream(reader(data.clone()), plan)).await, data);
    }

    #[tokio::test]
    async fn test_partial_stream_exact_bytes() {
        let data: Vec<u8> = (0..100).collect();
        let plan = RangePlan::resolve(Some("bytes=10-19"), 100).unwrap();
        let bytes = collect(range_stream(reader(data), plan)).await;
        assert_eq!(bytes, (10..20).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_large_range_spans_chunks() {
        let data = vec![9u8; CHUNK_SIZE * 2 + 17];
        let plan = RangePlan::resolve(Some("bytes=5-"), data.len() as u64).unwrap();
        let bytes = collect(range_stream(reader(data.clone()), plan)).await;
        assert_eq!(bytes.len(), data.len() - 5);
    }

    #[tokio::test]
    async fn test_failure_after_delivery_ends_quietly() {
        let flaky = FlakyReader {
            inner: Cursor::new(vec![1u8; 1000]),
            good: 300,
        };
        let plan = RangePlan::full(1000);
        let results: Vec<std::io::Result<Bytes>> =
            range_stream(Box::pin(flaky), plan).collect().await;

        assert!(results.iter().all(|chunk| chunk.is_ok()));
        let delivered: usize = results.iter().flatten().map(Bytes::len).sum();
        assert_eq!(delivered, 300);
    }

    #[tokio::test]
    async fn test_failure_before_delivery_is_reported() {
        let flaky = FlakyReader {
            inner: Cursor::new(vec![1u8; 10]),
            good: 0,
        };
        let results: Vec<std::io::Result<Bytes>> =
            range_stream(Box::pin(flaky), RangePlan::full(10)).collect().await;

        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("movie.mp4"), "video/mp4");
        assert_eq!(content_type_for("Movie.MKV"), "video/x-matroska");
        assert_eq!(content_type_for("segment001.ts"), "video/MP2T");
        assert_eq!(content_type_for("playlist.m3u8"), "application/vnd.apple.mpegurl");
        assert_eq!(content_type_for("notes"), "application/octet-stream");
    }
}
