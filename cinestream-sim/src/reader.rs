//! Reader that blocks on pieces the swarm has not delivered.

use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio::time::Sleep;

use crate::swarm::SwarmState;

const PIECE_RETRY: Duration = Duration::from_millis(20);

/// Reads one file of a simulated item.
///
/// A read at a missing piece parks until the piece completes, rechecking every
/// few milliseconds, and fails once the item is closed. A read never crosses
/// a piece boundary.
pub struct PieceAwareReader {
    state: Arc<SwarmState>,
    data: Bytes,
    piece_length: u64,
    offset: u64,
    length: u64,
    position: u64,
    retry: Option<Pin<Box<Sleep>>>,
}

impl PieceAwareReader {
    pub(crate) fn new(state: Arc<SwarmState>, piece_length: u64, offset: u64, length: u64) -> Self {
        let data = state.data();
        Self {
            state,
            data,
            piece_length,
            offset,
            length,
            position: 0,
            retry: None,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl AsyncRead for PieceAwareReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.position >= this.length || buf.remaining() == 0 || this.piece_length == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if this.state.closed.is_cancelled() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    format!("content {} closed", this.state.id),
                )));
            }

            let absolute = this.offset + this.position;
            let piece = absolute / this.piece_length;
            if this.state.piece_complete(piece as u32) {
                this.retry = None;
                let piece_end = (piece + 1) * this.piece_length;
                let end = piece_end
                    .min(this.offset + this.length)
                    .min(this.data.len() as u64);
                if end <= absolute {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "piece data shorter than advertised",
                    )));
                }
                let count = (end - absolute).min(buf.remaining() as u64) as usize;
                let start = absolute as usize;
                buf.put_slice(&this.data[start..start + count]);
                this.position += count as u64;
                return Poll::Ready(Ok(()));
            }

            let sleep = this
                .retry
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(PIECE_RETRY)));
            ready!(sleep.as_mut().poll(cx));
            this.retry = None;
        }
    }
}

impl AsyncSeek for PieceAwareReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let target = match position {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => this.length.checked_add_signed(delta),
            SeekFrom::Current(delta) => this.position.checked_add_signed(delta),
        };
        this.position = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        this.retry = None;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SimContent;
    use cinestream_core::ContentId;
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    fn delivered(content: &SimContent) -> Arc<SwarmState> {
        let state = Arc::new(SwarmState::new(ContentId::parse("READ").unwrap()));
        state.deliver(content, 10);
        state
    }

    #[tokio::test]
    async fn test_read_waits_for_missing_piece() {
        let content = SimContent::single("clip", "clip.bin", (0u8..30).collect::<Vec<_>>());
        let state = delivered(&content);
        state.complete_piece(0);

        let mut reader = PieceAwareReader::new(Arc::clone(&state), 10, 0, 30);
        let mut first = [0u8; 16];
        let read = reader.read(&mut first).await.unwrap();
        assert_eq!(read, 10, "a read stops at the piece boundary");
        assert_eq!(&first[..10], &(0u8..10).collect::<Vec<_>>()[..]);

        let pending = tokio::spawn(async move {
            let mut rest = Vec::new();
            reader.read_to_end(&mut rest).await.map(|_| rest)
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!pending.is_finished());

        state.complete_piece(1);
        state.complete_piece(2);
        let rest = pending.await.unwrap().unwrap();
        assert_eq!(rest, (10u8..30).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_reader_covers_only_its_file() {
        let content = SimContent::new(
            "pack",
            vec![
                ("a.txt".to_string(), Bytes::from_static(b"aaaaaaa")),
                ("b.txt".to_string(), Bytes::from_static(b"bbbbbbbbbbbb")),
            ],
        );
        let state = delivered(&content);
        state.complete_piece(0);
        state.complete_piece(1);

        let mut reader = PieceAwareReader::new(state, 10, 7, 12);
        reader.seek(SeekFrom::Start(2)).await.unwrap();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"bbbbbbbbbb");
        assert_eq!(reader.position(), 12);
    }

    #[tokio::test]
    async fn test_close_fails_parked_read() {
        let content = SimContent::single("clip", "clip.bin", vec![1u8; 30]);
        let state = delivered(&content);

        let mut reader = PieceAwareReader::new(Arc::clone(&state), 10, 0, 30);
        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            reader.read(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        state.closed.cancel();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[tokio::test]
    async fn test_seek_before_start_rejected() {
        let content = SimContent::single("clip", "clip.bin", vec![0u8; 10]);
        let mut reader = PieceAwareReader::new(delivered(&content), 10, 0, 10);
        assert!(reader.seek(SeekFrom::Current(-1)).await.is_err());
        assert_eq!(reader.seek(SeekFrom::End(-4)).await.unwrap(), 6);
    }
}
