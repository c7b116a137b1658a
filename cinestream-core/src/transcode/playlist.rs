//! Media playlist parsing, duration correction and atomic rewrite.
//!
//! Transcoders cannot know the real duration of a stream they read from a
//! pipe, so the last declared segment length is corrected against an
//! externally known duration before the playlist is served.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use super::TranscodeError;

const ABSOLUTE_DURATION_TAG: &str = "#EXT-X-ABSOLUTE-DURATION:";
const ENDLIST_TAG: &str = "#EXT-X-ENDLIST";

/// Segments shorter than this are never produced by a correction.
const MIN_CORRECTED_SEGMENT: f64 = 0.1;
const DURATION_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, PartialEq)]
enum PlaylistLine {
    Segment {
        duration: f64,
        extinf: String,
        uri: String,
    },
    Other(String),
}

/// A parsed media playlist that renders back to the same text unless edited.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    lines: Vec<PlaylistLine>,
}

impl MediaPlaylist {
    /// # Errors
    ///
    /// - `TranscodeError::Playlist` - Missing header or unreadable `#EXTINF`
    pub fn parse(text: &str) -> Result<Self, TranscodeError> {
        let mut raw = text.lines().map(str::trim_end).peekable();
        if raw.peek().map(|line| line.trim_start()) != Some("#EXTM3U") {
            return Err(TranscodeError::Playlist {
                reason: "missing #EXTM3U header".to_string(),
            });
        }

        let mut lines = Vec::new();
        while let Some(line) = raw.next() {
            let Some(info) = line.strip_prefix("#EXTINF:") else {
                lines.push(PlaylistLine::Other(line.to_string()));
                continue;
            };

            let duration_text = info.split(',').next().unwrap_or_default().trim();
            let duration: f64 = duration_text.parse().map_err(|_| TranscodeError::Playlist {
                reason: format!("unreadable segment duration {duration_text:?}"),
            })?;

            // The URI is the next line that is neither blank nor a tag
            let mut between = Vec::new();
            let mut uri = None;
            for next in raw.by_ref() {
                if next.is_empty() || next.starts_with('#') {
                    between.push(next.to_string());
                } else {
                    uri = Some(next.to_string());
                    break;
                }
            }

            match uri {
                Some(uri) => {
                    lines.push(PlaylistLine::Segment {
                        duration,
                        extinf: line.to_string(),
                        uri,
                    });
                    lines.extend(between.into_iter().map(PlaylistLine::Other));
                }
                None => {
                    // Trailing entry whose URI has not been written yet
                    lines.push(PlaylistLine::Other(line.to_string()));
                    lines.extend(between.into_iter().map(PlaylistLine::Other));
                }
            }
        }

        Ok(Self { lines })
    }

    /// `(duration, uri)` of every complete segment entry.
    pub fn segments(&self) -> impl Iterator<Item = (f64, &str)> {
        self.lines.iter().filter_map(|line| match line {
            PlaylistLine::Segment { duration, uri, .. } => Some((*duration, uri.as_str())),
            PlaylistLine::Other(_) => None,
        })
    }

    pub fn segment_uris(&self) -> Vec<String> {
        self.segments().map(|(_, uri)| uri.to_string()).collect()
    }

    pub fn declared_duration(&self) -> f64 {
        self.segments().map(|(duration, _)| duration).sum()
    }

    pub fn is_ended(&self) -> bool {
        self.lines
            .iter()
            .any(|line| matches!(line, PlaylistLine::Other(text) if text == ENDLIST_TAG))
    }

    /// Makes the declared durations add up to `total` seconds.
    ///
    /// Only the last segment is rewritten, and only when its corrected
    /// length stays above 0.1s. The total is also recorded in an
    /// `#EXT-X-ABSOLUTE-DURATION` tag. Returns whether anything changed.
    pub fn correct_total_duration(&mut self, total: f64) -> bool {
        let declared = self.declared_duration();
        let mut changed = false;

        if (declared - total).abs() > DURATION_TOLERANCE
            && let Some(PlaylistLine::Segment {
                duration, extinf, ..
            }) = self
                .lines
                .iter_mut()
                .rev()
                .find(|line| matches!(line, PlaylistLine::Segment { .. }))
        {
            let corrected = total - (declared - *duration);
            if corrected > MIN_CORRECTED_SEGMENT {
                *duration = corrected;
                *extinf = format!("#EXTINF:{corrected:.3},");
                changed = true;
            } else {
                debug!(declared, total, corrected, "Skipping duration correction");
            }
        }

        let tag = format!("{ABSOLUTE_DURATION_TAG}{total:.3}");
        let existing = self.lines.iter().position(
            |line| matches!(line, PlaylistLine::Other(text) if text.starts_with(ABSOLUTE_DURATION_TAG)),
        );
        match existing {
            Some(index) => {
                if self.lines[index] != PlaylistLine::Other(tag.clone()) {
                    self.lines[index] = PlaylistLine::Other(tag);
                    changed = true;
                }
            }
            None => {
                let at = self
                    .lines
                    .iter()
                    .position(|line| matches!(line, PlaylistLine::Other(text) if text == ENDLIST_TAG))
                    .unwrap_or(self.lines.len());
                self.lines.insert(at, PlaylistLine::Other(tag));
                changed = true;
            }
        }

        changed
    }

    pub fn render(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            match line {
                PlaylistLine::Segment { extinf, uri, .. } => {
                    text.push_str(extinf);
                    text.push('\n');
                    text.push_str(uri);
                    text.push('\n');
                }
                PlaylistLine::Other(other) => {
                    text.push_str(other);
                    text.push('\n');
                }
            }
        }
        text
    }
}

/// Playlist answered for seeks past the end of the media.
pub fn ended_playlist(target_duration: u32) -> String {
    format!("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:{target_duration}\n{ENDLIST_TAG}\n")
}

/// Replaces `path` with `contents` so readers see the old or the new file,
/// never a partial one.
///
/// # Errors
///
/// - `TranscodeError::Io` - Temporary file creation, write or rename failed
pub async fn write_atomic(
    path: &Path,
    contents: impl AsRef<[u8]> + Send + 'static,
) -> Result<(), TranscodeError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::Builder::new()
            .prefix(".staging")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        staged.write_all(contents.as_ref())?;
        staged.flush()?;
        staged.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| TranscodeError::Playlist {
        reason: format!("playlist writer task failed: {e}"),
    })??;
    Ok(())
}

/// Waits until every segment exists and is non-empty, polling each at most
/// `attempts` times. Returns the segments still missing.
pub async fn wait_for_segments(
    dir: &Path,
    uris: &[String],
    attempts: u32,
    interval: Duration,
) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    for uri in uris {
        let path = dir.join(uri);
        let mut ready = false;
        for attempt in 0..attempts.max(1) {
            if let Ok(metadata) = tokio::fs::metadata(&path).await
                && metadata.len() > 0
            {
                ready = true;
                break;
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        if !ready {
            warn!(segment = %path.display(), "Segment not ready after polling");
            missing.push(path);
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    const FFMPEG_OUTPUT: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:5
#EXT-X-MEDIA-SEQUENCE:0
#EXT-X-INDEPENDENT-SEGMENTS
#EXTINF:4.004000,
segment000.ts
#EXTINF:4.004000,
segment001.ts
#EXTINF:2.502500,
segment002.ts
#EXT-X-ENDLIST
";

    #[test]
    fn test_parse_and_render_round_trip() {
        let playlist = MediaPlaylist::parse(FFMPEG_OUTPUT).unwrap();
        assert_eq!(playlist.render(), FFMPEG_OUTPUT);
        assert_eq!(
            playlist.segment_uris(),
            vec!["segment000.ts", "segment001.ts", "segment002.ts"]
        );
        assert!((playlist.declared_duration() - 10.5105).abs() < 1e-9);
        assert!(playlist.is_ended());
    }

    #[test]
    fn test_correct_total_duration_adjusts_last_segment() {
        let mut playlist = MediaPlaylist::parse(FFMPEG_OUTPUT).unwrap();

        assert!(playlist.correct_total_duration(12.0));

        assert!((playlist.declared_duration() - 12.0).abs() < 1e-6);
        let rendered = playlist.render();
        assert!(rendered.contains("#EXTINF:3.992,\nsegment002.ts"));
        assert!(rendered.contains("#EXT-X-ABSOLUTE-DURATION:12.000\n#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_correction_is_idempotent() {
        let mut playlist = MediaPlaylist::parse(FFMPEG_OUTPUT).unwrap();
        playlist.correct_total_duration(12.0);
        let once = playlist.render();

        let mut reparsed = MediaPlaylist::parse(&once).unwrap();
        assert!(!reparsed.correct_total_duration(12.0));
        assert_eq!(reparsed.render(), once);
        assert_eq!(once.matches(ABSOLUTE_DURATION_TAG).count(), 1);
    }

    #[test]
    fn test_tiny_correction_is_skipped() {
        let mut playlist = MediaPlaylist::parse(FFMPEG_OUTPUT).unwrap();

        // Would shrink the last segment to 0.05s
        playlist.correct_total_duration(8.058);

        let last = playlist.segments().last().unwrap().0;
        assert!((last - 2.5025).abs() < 1e-9);
    }

    #[test]
    fn test_incomplete_trailing_entry_kept_verbatim() {
        let text = "#EXTM3U\n#EXTINF:4.000000,\nsegment000.ts\n#EXTINF:4.000000,\n";
        let playlist = MediaPlaylist::parse(text).unwrap();
        assert_eq!(playlist.segment_uris(), vec!["segment000.ts"]);
        assert_eq!(playlist.render(), text);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MediaPlaylist::parse("segment000.ts\n").is_err());
        assert!(MediaPlaylist::parse("#EXTM3U\n#EXTINF:abc,\nsegment000.ts\n").is_err());
    }

    #[test]
    fn test_ended_playlist() {
        let text = ended_playlist(4);
        assert_eq!(
            text,
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-ENDLIST\n"
        );
        let playlist = MediaPlaylist::parse(&text).unwrap();
        assert!(playlist.is_ended());
        assert_eq!(playlist.segments().count(), 0);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlist.m3u8");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, "new contents".to_string()).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new contents");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "staging file must not remain");
    }

    #[tokio::test]
    async fn test_wait_for_segments_reports_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("segment000.ts"), b"data").unwrap();
        std::fs::write(dir.path().join("segment001.ts"), b"").unwrap();

        let uris = vec![
            "segment000.ts".to_string(),
            "segment001.ts".to_string(),
            "segment002.ts".to_string(),
        ];
        let missing = wait_for_segments(dir.path(), &uris, 2, Duration::from_millis(5)).await;

        assert_eq!(
            missing,
            vec![dir.path().join("segment001.ts"), dir.path().join("segment002.ts")]
        );
    }

    #[tokio::test]
    async fn test_wait_for_segments_sees_late_segment() {
        let dir = tempfile::tempdir().unwrap();
        let late = dir.path().join("segment000.ts");
        let writer = {
            let late = late.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                tokio::fs::write(late, b"late").await.unwrap();
            })
        };

        let missing = wait_for_segments(
            dir.path(),
            &["segment000.ts".to_string()],
            50,
            Duration::from_millis(10),
        )
        .await;

        writer.await.unwrap();
        assert!(missing.is_empty());
    }
}
