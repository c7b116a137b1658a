//! Full playback workflow against the simulated swarm

use std::sync::Arc;

use axum::http::StatusCode;
use cinestream_core::ContentId;
use cinestream_sim::{SimContent, SimulatedContentClient, SwarmConfig};
use serde_json::json;

use crate::harness::{
    app, declared_seconds, delete, get, poll_json, post_json, segment_uris, service,
};

#[tokio::test]
async fn test_add_seek_and_play_before_download_completes() {
    let scratch = tempfile::tempdir().unwrap();
    let client = Arc::new(SimulatedContentClient::new(SwarmConfig::for_testing()));
    let service = service(client.clone(), scratch.path());
    let app = app(&service);

    // Nothing published yet: the item is known but has no metadata
    let added = post_json(&app, "/add", json!({ "infoHash": "ABCD" })).await;
    assert_eq!(added.status, StatusCode::OK);
    let status = get(&app, "/status/ABCD").await.json();
    assert_eq!(status["metadataCompleted"], false);

    let progress = get(&app, "/progress/ABCD/0").await.json();
    assert_eq!(progress["ready"], false);

    // Ten pieces of 16 bytes, one file
    client.publish(
        ContentId::parse("ABCD").unwrap(),
        SimContent::synthetic("Short Film", "short-film.mkv", 160, 21),
    );
    let status = poll_json(&app, "/status/ABCD", |status| status["files"].is_array()).await;
    assert_eq!(status["files"][0]["length"], 160);

    let seek = post_json(
        &app,
        "/prioritize",
        json!({ "infoHash": "ABCD", "fileIdx": 0, "percentage": 50.0 }),
    )
    .await
    .json();
    let start = seek["startPriority"].as_u64().unwrap();
    let end = seek["endPriority"].as_u64().unwrap();
    assert_eq!(seek["seekPositionPiece"], 5);
    assert!(start <= end && end <= 9, "window {start}..={end} outside the file");

    let duration = post_json(
        &app,
        "/duration",
        json!({ "infoHash": "ABCD", "fileIdx": 0, "duration": 6.4 }),
    )
    .await;
    assert_eq!(duration.status, StatusCode::OK);

    let playlist = get(&app, "/hls/ABCD/0/playlist.m3u8").await;
    assert_eq!(playlist.status, StatusCode::OK);
    let text = playlist.text();
    assert!(
        (declared_seconds(&text) - 6.4).abs() < 0.01,
        "playlist should add up to the known duration:\n{text}"
    );
    assert!(text.contains("#EXT-X-ABSOLUTE-DURATION:6.400"));

    for uri in segment_uris(&text) {
        let segment = get(&app, &format!("/hls/ABCD/0/{uri}")).await;
        assert_eq!(segment.status, StatusCode::OK, "{uri}");
        assert!(!segment.body.is_empty(), "{uri} is empty");
    }

    let progress = poll_json(&app, "/progress/ABCD/0", |progress| {
        progress["percent_by_pieces"] == 100.0
    })
    .await;
    assert_eq!(progress["ready"], true);
    assert_eq!(progress["duration"], 6.4);

    assert_eq!(delete(&app, "/remove/ABCD").await.status, StatusCode::OK);
    let health = get(&app, "/health").await.json();
    assert_eq!(health["contents"], 0);
    assert_eq!(health["transcodeJobs"], 0);
    service.shutdown().await;
}

#[tokio::test]
async fn test_readding_removed_item_starts_a_fresh_download() {
    let scratch = tempfile::tempdir().unwrap();
    let client = Arc::new(SimulatedContentClient::new(SwarmConfig::for_testing()));
    client.publish(
        ContentId::parse("FRESH").unwrap(),
        SimContent::synthetic("Clip", "clip.mp4", 64, 4),
    );
    let service = service(client, scratch.path());
    let app = app(&service);

    post_json(&app, "/add", json!({ "infoHash": "FRESH" })).await;
    poll_json(&app, "/status/FRESH", |status| status["bytesCompleted"] == 64).await;
    delete(&app, "/remove/FRESH").await;

    let again = post_json(
        &app,
        "/add",
        json!({ "magnetURI": "magnet:?xt=urn:btih:FRESH&dn=Clip" }),
    )
    .await
    .json();
    assert_eq!(again["alreadyPresent"], false);
    let status = poll_json(&app, "/status/FRESH", |status| status["metadataCompleted"] == true).await;
    assert_eq!(status["name"], "Clip");
    service.shutdown().await;
}
