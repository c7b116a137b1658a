//! Segmented stream artifacts: playlists and segments

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use cinestream_core::service::{Artifact, ArtifactBody};
use tokio_util::io::ReaderStream;

use super::{ApiError, parse_index};
use crate::server::AppState;

/// `GET /hls/{id}/{file_idx}/{filename}`
pub async fn playlist_artifact(
    State(state): State<AppState>,
    Path((id, file_idx, filename)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let file_idx = parse_index(&file_idx)?;
    let artifact = state
        .service
        .playlist_artifact(&id, file_idx, &filename)
        .await?;
    Ok(artifact_response(artifact))
}

/// `GET /hls/{id}/{file_idx}/seek/{seconds}/{filename}`
pub async fn seek_artifact(
    State(state): State<AppState>,
    Path((id, file_idx, seconds, filename)): Path<(String, String, String, String)>,
) -> Result<Response, ApiError> {
    let file_idx = parse_index(&file_idx)?;
    let seconds: f64 = seconds.parse().map_err(|_| ApiError::BadRequest {
        reason: format!("seek offset {seconds:?} is not a number"),
    })?;
    let artifact = state
        .service
        .seek_artifact(&id, file_idx, seconds, &filename)
        .await?;
    Ok(artifact_response(artifact))
}

/// Serves an artifact inline with its media type.
pub fn artifact_response(artifact: Artifact) -> Response {
    let content_type = artifact.content_type();
    let disposition = HeaderValue::from_str(&format!(
        "inline; filename=\"{}\"",
        artifact.name.as_str()
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    let (length, body) = match artifact.body {
        ArtifactBody::Memory(bytes) => (bytes.len() as u64, Body::from(bytes)),
        ArtifactBody::File { file, length } => {
            (length, Body::from_stream(ReaderStream::new(file)))
        }
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(length)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        body,
    )
        .into_response()
}
