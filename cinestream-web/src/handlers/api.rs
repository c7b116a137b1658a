//! JSON handlers for content management, progress and prioritization

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use cinestream_core::service::{
    AddRequest, AddResponse, ContentStatus, PrioritizeResponse, ProgressReport,
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, parse_index};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct AddBody {
    #[serde(rename = "infoHash")]
    pub info_hash: Option<String>,
    #[serde(rename = "magnetURI")]
    pub magnet_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritizeBody {
    pub info_hash: String,
    pub file_idx: usize,
    pub percentage: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationBody {
    pub info_hash: String,
    pub file_idx: usize,
    pub duration: f64,
}

/// `POST /add`
pub async fn add_content(
    State(state): State<AppState>,
    body: Result<Json<AddBody>, JsonRejection>,
) -> Result<Json<AddResponse>, ApiError> {
    let Json(body) = body?;
    let response = state
        .service
        .add_content(AddRequest {
            info_hash: body.info_hash,
            magnet: body.magnet_uri,
        })
        .await?;
    Ok(Json(response))
}

/// `GET /status/{id}`
pub async fn content_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContentStatus>, ApiError> {
    Ok(Json(state.service.status(&id).await?))
}

/// `GET /progress/{id}/{file_idx}`
pub async fn file_progress(
    State(state): State<AppState>,
    Path((id, file_idx)): Path<(String, String)>,
) -> Result<Json<ProgressReport>, ApiError> {
    let file_idx = parse_index(&file_idx)?;
    Ok(Json(state.service.file_progress(&id, file_idx).await?))
}

/// `POST /prioritize`
pub async fn prioritize(
    State(state): State<AppState>,
    body: Result<Json<PrioritizeBody>, JsonRejection>,
) -> Result<Json<PrioritizeResponse>, ApiError> {
    let Json(body) = body?;
    let response = state
        .service
        .prioritize(&body.info_hash, body.file_idx, body.percentage)
        .await?;
    Ok(Json(response))
}

/// `POST /duration`
pub async fn set_duration(
    State(state): State<AppState>,
    body: Result<Json<DurationBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    state
        .service
        .set_duration(&body.info_hash, body.file_idx, body.duration)
        .await?;
    Ok(Json(json!({
        "message": "duration recorded",
        "duration": body.duration,
    })))
}

/// `DELETE /remove/{id}`
pub async fn remove_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.service.remove(&id).await?;
    Ok(Json(json!({ "message": "removed", "infoHash": id })))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let contents = state.service.content_ids().await.len();
    let jobs = state.service.jobs().job_count().await;
    Json(json!({
        "status": "ok",
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "contents": contents,
        "transcodeJobs": jobs,
    }))
}
