//! Streaming against the simulated swarm, where reads wait for pieces

use std::sync::Arc;

use axum::http::{StatusCode, header};
use cinestream_core::ContentId;
use cinestream_sim::{SimContent, SimulatedContentClient, SwarmConfig};
use serde_json::json;

use crate::harness::{app, declared_seconds, get, poll_json, post_json, service};

const MOVIE_LENGTH: usize = 480;

fn published(id: &str) -> (Arc<SimulatedContentClient>, SimContent) {
    let client = Arc::new(SimulatedContentClient::new(SwarmConfig::for_testing()));
    let content = SimContent::synthetic("Sim Movie", "sim-movie.mkv", MOVIE_LENGTH, 11);
    client.publish(ContentId::parse(id).unwrap(), content.clone());
    (client, content)
}

#[tokio::test]
async fn test_direct_stream_waits_for_pieces() {
    let scratch = tempfile::tempdir().unwrap();
    let (client, content) = published("SIMA");
    let service = service(client, scratch.path());
    let app = app(&service);
    post_json(&app, "/add", json!({ "infoHash": "SIMA" })).await;
    poll_json(&app, "/status/SIMA", |status| status["metadataCompleted"] == true).await;

    let full = get(&app, "/stream/SIMA/0").await;

    assert_eq!(full.status, StatusCode::OK);
    assert_eq!(full.header(header::CONTENT_TYPE), Some("video/x-matroska"));
    assert_eq!(full.body, content.concatenated());

    let status = poll_json(&app, "/status/SIMA", |status| status["bytesCompleted"] == MOVIE_LENGTH).await;
    assert_eq!(status["percentCompleted"], 100.0);
    service.shutdown().await;
}

#[tokio::test]
async fn test_playlist_and_segments_follow_download() {
    let scratch = tempfile::tempdir().unwrap();
    let (client, content) = published("SIMB");
    let service = service(client, scratch.path());
    let app = app(&service);
    post_json(&app, "/add", json!({ "infoHash": "SIMB" })).await;
    poll_json(&app, "/status/SIMB", |status| status["metadataCompleted"] == true).await;

    let playlist = get(&app, "/hls/SIMB/0/playlist.m3u8").await;
    assert_eq!(playlist.status, StatusCode::OK);
    assert_eq!(
        playlist.header(header::CONTENT_TYPE),
        Some("application/vnd.apple.mpegurl")
    );
    assert!(playlist.text().starts_with("#EXTM3U"));
    assert!(playlist.text().contains("segment000.ts"));

    let segment = get(&app, "/hls/SIMB/0/segment000.ts").await;
    assert_eq!(segment.status, StatusCode::OK);
    assert_eq!(segment.header(header::CONTENT_TYPE), Some("video/MP2T"));
    assert_eq!(segment.body, content.concatenated().slice(0..100));

    let traversal = get(&app, "/hls/SIMB/0/..%2Fsecret.ts").await;
    assert_eq!(traversal.status, StatusCode::BAD_REQUEST);
    service.shutdown().await;
}

#[tokio::test]
async fn test_seek_playlist_and_past_end() {
    let scratch = tempfile::tempdir().unwrap();
    let (client, _) = published("SIMC");
    let service = service(client, scratch.path());
    let app = app(&service);
    post_json(&app, "/add", json!({ "infoHash": "SIMC" })).await;
    poll_json(&app, "/status/SIMC", |status| status["metadataCompleted"] == true).await;
    post_json(
        &app,
        "/duration",
        json!({ "infoHash": "SIMC", "fileIdx": 0, "duration": 20.0 }),
    )
    .await;

    let seek = get(&app, "/hls/SIMC/0/seek/8/playlist.m3u8").await;
    assert_eq!(seek.status, StatusCode::OK);
    let text = seek.text();
    assert!(
        (declared_seconds(&text) - 12.0).abs() < 0.01,
        "seek playlist should cover the remaining 12s:\n{text}"
    );

    let past_end = get(&app, "/hls/SIMC/0/seek/19.95/playlist.m3u8").await;
    assert_eq!(past_end.status, StatusCode::OK);
    assert!(past_end.text().contains("#EXT-X-ENDLIST"));
    assert_eq!(declared_seconds(&past_end.text()), 0.0);

    let health = get(&app, "/health").await.json();
    assert_eq!(health["transcodeJobs"], 0, "seek jobs are not registered");
    service.shutdown().await;
}
