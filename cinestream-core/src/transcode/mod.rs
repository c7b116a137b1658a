//! Lifecycle of external transcoder processes producing segmented streams.
//!
//! One job exists per `(content, file)` for the playlist variant and is shared
//! by every request for that key. Seek variants are created per request and
//! torn down before the request completes. Each job owns a scratch directory
//! holding `playlist.m3u8` and `segmentNNN.ts` files.

pub mod command;
pub mod job;
pub mod manager;
pub mod pipe;
pub mod playlist;
pub mod process;
pub mod simulated;

use std::fmt;

use uuid::Uuid;

pub use command::TranscodePlan;
pub use job::{JobState, TranscodeJob};
pub use manager::TranscodeJobManager;
pub use playlist::MediaPlaylist;
pub use process::{FfmpegTranscoder, TranscodeProcess, Transcoder};
pub use simulated::SimulatedTranscoder;

use crate::content::ContentId;

pub const PLAYLIST_NAME: &str = "playlist.m3u8";
/// Duration-corrected copy of the playlist. The transcoder never writes it.
pub const SERVED_PLAYLIST_NAME: &str = "served.m3u8";

/// Errors raised by transcode jobs.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Failed to start transcoder: {reason}")]
    SpawnFailed { reason: String },

    #[error("Transcoder exited abnormally: {status}")]
    ProcessExited { status: String },

    #[error("Job {key} was stopped")]
    JobStopped { key: String },

    #[error("Artifact {name} not ready")]
    ArtifactNotReady { name: String },

    #[error("Invalid artifact name: {name}")]
    InvalidArtifactName { name: String },

    #[error("Playlist error: {reason}")]
    Playlist { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unique identifier of one job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry key of a shared playlist job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub content_id: ContentId,
    pub file_index: usize,
}

impl JobKey {
    pub fn new(content_id: ContentId, file_index: usize) -> Self {
        Self {
            content_id,
            file_index,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content_id, self.file_index)
    }
}

/// Output the transcoder is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JobVariant {
    /// Segmented stream from the start of the file
    Playlist,
    /// Segmented stream starting at an offset, discarded after one request
    Seek { offset_seconds: f64 },
}

impl JobVariant {
    pub fn seek_seconds(&self) -> Option<f64> {
        match self {
            JobVariant::Playlist => None,
            JobVariant::Seek { offset_seconds } => Some(*offset_seconds),
        }
    }
}

/// Kind of file a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Playlist,
    Segment,
}

/// Validated artifact file name inside a job directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    name: String,
    kind: ArtifactKind,
}

impl ArtifactName {
    /// # Errors
    ///
    /// - `TranscodeError::InvalidArtifactName` - Path components, or not `.m3u8`/`.ts`
    pub fn parse(name: &str) -> Result<Self, TranscodeError> {
        let invalid = || TranscodeError::InvalidArtifactName {
            name: name.to_string(),
        };

        if name.is_empty()
            || name.contains(['/', '\\'])
            || name.starts_with('.')
            || name.contains("..")
        {
            return Err(invalid());
        }

        let kind = match name.rsplit_once('.').map(|(_, ext)| ext) {
            Some("m3u8") => ArtifactKind::Playlist,
            Some("ts") => ArtifactKind::Segment,
            _ => return Err(invalid()),
        };

        Ok(Self {
            name: name.to_string(),
            kind,
        })
    }

    pub fn playlist() -> Self {
        Self {
            name: PLAYLIST_NAME.to_string(),
            kind: ArtifactKind::Playlist,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &'static str {
        match self.kind {
            ArtifactKind::Playlist => "application/vnd.apple.mpegurl",
            ArtifactKind::Segment => "video/MP2T",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_names() {
        let playlist = ArtifactName::parse("playlist.m3u8").unwrap();
        assert_eq!(playlist.kind(), ArtifactKind::Playlist);
        assert_eq!(playlist.content_type(), "application/vnd.apple.mpegurl");

        let segment = ArtifactName::parse("segment007.ts").unwrap();
        assert_eq!(segment.kind(), ArtifactKind::Segment);
        assert_eq!(segment.content_type(), "video/MP2T");

        for bad in ["", "../playlist.m3u8", "a/b.ts", "movie.mkv", ".hidden.ts", "x..ts"] {
            assert!(ArtifactName::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_job_key_display() {
        let key = JobKey::new(ContentId::parse("ABCD").unwrap(), 2);
        assert_eq!(key.to_string(), "ABCD:2");
    }
}
