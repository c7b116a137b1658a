//! HTTP request handlers organized by functionality

pub mod api;
pub mod error;
pub mod hls;
pub mod stream;

// Re-export handler functions
pub use api::{
    AddBody, DurationBody, PrioritizeBody, add_content, content_status, file_progress, health,
    prioritize, remove_content, set_duration,
};
pub use error::ApiError;
pub use hls::{artifact_response, playlist_artifact, seek_artifact};
pub use stream::stream_file;

/// Parses a numeric path segment.
pub(crate) fn parse_index(raw: &str) -> Result<usize, ApiError> {
    raw.parse().map_err(|_| ApiError::BadRequest {
        reason: format!("file index {raw:?} is not a number"),
    })
}
