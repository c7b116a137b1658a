//! Shared setup for HTTP-level tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use bytes::Bytes;
use cinestream_core::content::ContentClient;
use cinestream_core::transcode::SimulatedTranscoder;
use cinestream_core::{CinestreamConfig, StreamService};
use cinestream_web::{AppState, router};
use serde_json::Value;
use tower::ServiceExt;

/// Service with test timings, scratch output under `scratch` and a
/// transcoder emitting 100-byte, 4-second segments.
pub fn service(client: Arc<dyn ContentClient>, scratch: &Path) -> Arc<StreamService> {
    let mut config = CinestreamConfig::for_testing();
    config.transcode.scratch_root = scratch.to_path_buf();
    StreamService::start(config, client, Arc::new(SimulatedTranscoder::new(100, 4.0)))
}

pub fn app(service: &Arc<StreamService>) -> Router {
    router(AppState::new(Arc::clone(service)))
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!(
                "body is not JSON ({e}): {}",
                String::from_utf8_lossy(&self.body)
            )
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Reply {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    Reply {
        status,
        headers,
        body,
    }
}

pub async fn get(app: &Router, uri: &str) -> Reply {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn get_range(app: &Router, uri: &str, range: &str) -> Reply {
    let request = Request::get(uri)
        .header(header::RANGE, range)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Reply {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn delete(app: &Router, uri: &str) -> Reply {
    send(app, Request::delete(uri).body(Body::empty()).unwrap()).await
}

/// Polls `uri` until `done` accepts the JSON reply.
pub async fn poll_json(app: &Router, uri: &str, mut done: impl FnMut(&Value) -> bool) -> Value {
    for _ in 0..200 {
        let reply = get(app, uri).await;
        if reply.status == StatusCode::OK {
            let json = reply.json();
            if done(&json) {
                return json;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("{uri} never reached the expected state");
}

/// Sum of the `#EXTINF` durations in a playlist.
pub fn declared_seconds(playlist: &str) -> f64 {
    playlist
        .lines()
        .filter_map(|line| line.strip_prefix("#EXTINF:"))
        .filter_map(|rest| rest.split(',').next())
        .filter_map(|value| value.trim().parse::<f64>().ok())
        .sum()
}

pub fn segment_uris(playlist: &str) -> Vec<String> {
    playlist
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
