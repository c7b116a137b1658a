//! Direct byte-range streaming of untranscoded files

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::{ApiError, parse_index};
use crate::server::AppState;

/// `GET /stream/{id}/{file_idx}`
///
/// Honors a single `Range` header; answers 206 with `Content-Range` for
/// ranged requests and 200 otherwise.
pub async fn stream_file(
    State(state): State<AppState>,
    Path((id, file_idx)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let file_idx = parse_index(&file_idx)?;
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    let stream = state.service.direct_stream(&id, file_idx, range).await?;
    let plan = stream.plan;
    debug!(content = %id, file = file_idx, start = plan.start, end = plan.end, partial = plan.partial, "Streaming range");

    let status = if plan.partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let content_type = HeaderValue::from_str(&stream.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut response = (
        status,
        [
            (header::CONTENT_TYPE, content_type),
            (header::ACCEPT_RANGES, HeaderValue::from_static("bytes")),
            (header::CONTENT_LENGTH, HeaderValue::from(plan.content_length())),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        Body::from_stream(stream.body),
    )
        .into_response();

    if let Some(content_range) = plan.content_range()
        && let Ok(value) = HeaderValue::from_str(&content_range)
    {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    Ok(response)
}
