//! In-process transcoder used in development mode and tests.
//!
//! Cuts the input into fixed-size chunks, writes each as a segment file and
//! keeps `playlist.m3u8` up to date the way a live HLS muxer would.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use super::playlist::write_atomic;
use super::{TranscodeError, TranscodePlan, TranscodeProcess, Transcoder};
use crate::content::FileReader;

#[derive(Debug, Clone)]
pub struct SimulatedTranscoder {
    /// Input bytes per emitted segment
    pub segment_bytes: usize,
    /// Declared length of a full segment
    pub segment_seconds: f64,
    /// Pause after each segment
    pub write_delay: Duration,
}

impl Default for SimulatedTranscoder {
    fn default() -> Self {
        Self {
            segment_bytes: 64 * 1024,
            segment_seconds: 4.0,
            write_delay: Duration::ZERO,
        }
    }
}

impl SimulatedTranscoder {
    pub fn new(segment_bytes: usize, segment_seconds: f64) -> Self {
        Self {
            segment_bytes: segment_bytes.max(1),
            segment_seconds,
            ..Default::default()
        }
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    async fn run(&self, mut input: FileReader, plan: TranscodePlan) -> Result<usize, TranscodeError> {
        if let Some(seconds) = plan.seek_seconds {
            let skip = (seconds / self.segment_seconds * self.segment_bytes as f64) as u64;
            let skipped = tokio::io::copy(&mut (&mut input).take(skip), &mut tokio::io::sink()).await?;
            debug!(skip, skipped, "Simulated transcoder skipped to seek offset");
        }

        let mut playlist = format!(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:{}\n#EXT-X-MEDIA-SEQUENCE:0\n",
            self.segment_seconds.ceil() as u64
        );
        let mut buffer = vec![0u8; self.segment_bytes];
        let mut index = 0;

        loop {
            let filled = fill(&mut input, &mut buffer).await?;
            if filled == 0 {
                break;
            }

            let name = format!("segment{index:03}.ts");
            write_atomic(&plan.output_dir.join(&name), buffer[..filled].to_vec()).await?;

            let duration = self.segment_seconds * filled as f64 / self.segment_bytes as f64;
            let _ = write!(playlist, "#EXTINF:{duration:.6},\n{name}\n");
            write_atomic(&plan.playlist_path(), playlist.clone()).await?;

            index += 1;
            if !self.write_delay.is_zero() {
                tokio::time::sleep(self.write_delay).await;
            }
            if filled < buffer.len() {
                break;
            }
        }

        playlist.push_str("#EXT-X-ENDLIST\n");
        write_atomic(&plan.playlist_path(), playlist).await?;
        Ok(index)
    }
}

/// Reads until `buffer` is full or the input ends.
async fn fill<R: AsyncRead + Unpin + ?Sized>(input: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = input.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl Transcoder for SimulatedTranscoder {
    async fn launch(
        &self,
        input: FileReader,
        plan: &TranscodePlan,
    ) -> Result<TranscodeProcess, TranscodeError> {
        if !plan.output_dir.is_dir() {
            return Err(TranscodeError::SpawnFailed {
                reason: format!("output directory {} missing", plan.output_dir.display()),
            });
        }

        let failure = Arc::new(parking_lot::Mutex::new(None));
        let task_failure = failure.clone();
        let transcoder = self.clone();
        let plan = plan.clone();

        let task = tokio::spawn(async move {
            let output = plan.output_dir.display().to_string();
            match transcoder.run(input, plan).await {
                Ok(segments) => debug!(output, segments, "Simulated transcode finished"),
                Err(e) => {
                    warn!(output, error = %e, "Simulated transcode failed");
                    *task_failure.lock() = Some(e.to_string());
                }
            }
        });

        Ok(TranscodeProcess::in_process(task, failure))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::config::TranscodeConfig;
    use crate::transcode::MediaPlaylist;

    async fn wait_for_end(plan: &TranscodePlan) -> MediaPlaylist {
        for _ in 0..200 {
            if let Ok(text) = tokio::fs::read_to_string(plan.playlist_path()).await
                && let Ok(playlist) = MediaPlaylist::parse(&text)
                && playlist.is_ended()
            {
                return playlist;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("playlist never ended");
    }

    #[tokio::test]
    async fn test_segments_and_playlist_written() {
        let dir = tempfile::tempdir().unwrap();
        let plan = TranscodePlan::new(dir.path(), None, &TranscodeConfig::default());
        let transcoder = SimulatedTranscoder::new(100, 4.0);

        let _process = transcoder
            .launch(Box::pin(Cursor::new(vec![7u8; 250])), &plan)
            .await
            .unwrap();
        let playlist = wait_for_end(&plan).await;

        assert_eq!(
            playlist.segment_uris(),
            vec!["segment000.ts", "segment001.ts", "segment002.ts"]
        );
        assert!((playlist.declared_duration() - 10.0).abs() < 1e-6);
        let last = std::fs::read(dir.path().join("segment002.ts")).unwrap();
        assert_eq!(last.len(), 50);
    }

    #[tokio::test]
    async fn test_seek_skips_input() {
        let dir = tempfile::tempdir().unwrap();
        let plan = TranscodePlan::new(dir.path(), Some(8.0), &TranscodeConfig::default());
        let transcoder = SimulatedTranscoder::new(100, 4.0);

        let _process = transcoder
            .launch(Box::pin(Cursor::new(vec![1u8; 400])), &plan)
            .await
            .unwrap();
        let playlist = wait_for_end(&plan).await;

        assert_eq!(playlist.segments().count(), 2);
    }

    #[tokio::test]
    async fn test_missing_output_directory_fails_launch() {
        let dir = tempfile::tempdir().unwrap();
        let plan = TranscodePlan::new(&dir.path().join("gone"), None, &TranscodeConfig::default());

        let result = SimulatedTranscoder::default()
            .launch(Box::pin(Cursor::new(vec![0u8; 8])), &plan)
            .await;

        assert!(matches!(result, Err(TranscodeError::SpawnFailed { .. })));
    }
}
