//! Mapping of service failures onto HTTP responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use cinestream_core::{CinestreamError, ErrorKind, StreamingError};
use serde_json::json;
use tracing::{debug, error};

/// Error returned by every handler. The body is `{"error": message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] CinestreamError),

    #[error("{reason}")]
    BadRequest { reason: String },
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest {
            reason: rejection.body_text(),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Service(CinestreamError::Streaming(StreamingError::RangeNotSatisfiable {
                ..
            })) => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Service(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::NotReady => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorKind::ExternalProcess | ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Service(e) => e.user_message(),
            ApiError::BadRequest { reason } => reason.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let mut response = (status, Json(json!({ "error": self.message() }))).into_response();
        let headers = response.headers_mut();
        match &self {
            ApiError::Service(CinestreamError::Streaming(StreamingError::RangeNotSatisfiable {
                total,
            })) => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
            }
            _ if status == StatusCode::SERVICE_UNAVAILABLE => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
            }
            _ => {}
        }
        response
    }
}
