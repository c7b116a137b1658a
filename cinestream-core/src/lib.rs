//! Cinestream Core - play-while-downloading media delivery
//!
//! This crate turns a chunked content store whose pieces complete in random
//! order into a stream that can be played from any position: piece scheduling,
//! transcoder job lifecycle, byte-range streaming and progress estimation.

pub mod config;
pub mod content;
pub mod mode;
pub mod progress;
pub mod scheduler;
pub mod service;
pub mod streaming;
pub mod tracing_setup;
pub mod transcode;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export main types for convenient access
pub use config::CinestreamConfig;
pub use content::{ContentError, ContentId};
pub use mode::RuntimeMode;
pub use service::StreamService;
pub use streaming::StreamingError;
pub use transcode::TranscodeError;

/// Classification of failures as seen by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown content id or out-of-range file index
    NotFound,
    /// Metadata or artifact not yet available; retry later
    NotReady,
    /// Malformed identifier, range, index or parameter
    InvalidInput,
    /// Transcoder failed to start or exited abnormally
    ExternalProcess,
    /// Local I/O failure
    Io,
}

/// Core errors that can bubble up from any Cinestream subsystem.
#[derive(Debug, thiserror::Error)]
pub enum CinestreamError {
    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Streaming error: {0}")]
    Streaming(#[from] StreamingError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CinestreamError {
    /// Maps the error onto the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CinestreamError::Content(e) => match e {
                ContentError::NotFound { .. } | ContentError::FileIndexOutOfRange { .. } => {
                    ErrorKind::NotFound
                }
                ContentError::MetadataNotReady { .. } => ErrorKind::NotReady,
                ContentError::InvalidId { .. } | ContentError::InvalidParameter { .. } => {
                    ErrorKind::InvalidInput
                }
                ContentError::Closed { .. } => ErrorKind::NotFound,
                ContentError::Io(_) => ErrorKind::Io,
            },
            CinestreamError::Transcode(e) => match e {
                TranscodeError::ArtifactNotReady { .. } => ErrorKind::NotReady,
                TranscodeError::InvalidArtifactName { .. } => ErrorKind::InvalidInput,
                TranscodeError::SpawnFailed { .. }
                | TranscodeError::ProcessExited { .. }
                | TranscodeError::JobStopped { .. } => ErrorKind::ExternalProcess,
                TranscodeError::Playlist { .. } => ErrorKind::ExternalProcess,
                TranscodeError::Io(_) => ErrorKind::Io,
            },
            CinestreamError::Streaming(e) => match e {
                StreamingError::RangeNotSatisfiable { .. } | StreamingError::MalformedRange { .. } => {
                    ErrorKind::InvalidInput
                }
                StreamingError::Io(_) => ErrorKind::Io,
            },
            CinestreamError::Configuration { .. } => ErrorKind::InvalidInput,
            CinestreamError::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            CinestreamError::Content(e) => match e {
                ContentError::NotFound { id } => format!("Content {id} not found"),
                ContentError::FileIndexOutOfRange { index, file_count } => {
                    format!("File index {index} out of range ({file_count} files)")
                }
                ContentError::MetadataNotReady { .. } => {
                    "Metadata not yet available, retry later".to_string()
                }
                ContentError::InvalidId { reason } => format!("Invalid identifier: {reason}"),
                ContentError::InvalidParameter { reason } => format!("Invalid request: {reason}"),
                ContentError::Closed { id } => format!("Content {id} was removed"),
                ContentError::Io(_) => "Content read error occurred".to_string(),
            },
            CinestreamError::Transcode(e) => match e {
                TranscodeError::ArtifactNotReady { .. } => "HLS file not ready".to_string(),
                TranscodeError::InvalidArtifactName { name } => {
                    format!("Invalid artifact name: {name}")
                }
                _ => "Transcoding failed".to_string(),
            },
            CinestreamError::Streaming(e) => match e {
                StreamingError::RangeNotSatisfiable { .. } => {
                    "Requested range not satisfiable".to_string()
                }
                StreamingError::MalformedRange { header } => format!("Invalid range: {header}"),
                StreamingError::Io(_) => "Streaming error occurred".to_string(),
            },
            CinestreamError::Configuration { .. } => "Configuration error occurred".to_string(),
            CinestreamError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidInput | ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, CinestreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let not_found: CinestreamError = ContentError::NotFound {
            id: "ABCD".to_string(),
        }
        .into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert!(not_found.is_user_error());

        let not_ready: CinestreamError = TranscodeError::ArtifactNotReady {
            name: "playlist.m3u8".to_string(),
        }
        .into();
        assert_eq!(not_ready.kind(), ErrorKind::NotReady);
        assert_eq!(not_ready.user_message(), "HLS file not ready");

        let spawn: CinestreamError = TranscodeError::SpawnFailed {
            reason: "no such file".to_string(),
        }
        .into();
        assert_eq!(spawn.kind(), ErrorKind::ExternalProcess);
        assert!(!spawn.is_user_error());
    }

    #[test]
    fn test_range_errors_are_invalid_input() {
        let error: CinestreamError = StreamingError::RangeNotSatisfiable { total: 10 }.into();
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
    }
}
