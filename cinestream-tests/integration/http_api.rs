//! JSON endpoints: add, status, progress, prioritize, duration, remove

use std::sync::Arc;

use axum::http::{StatusCode, header};
use cinestream_core::ContentId;
use cinestream_core::content::{ContentInfo, ContentSource, PiecePriority};
use cinestream_core::testing::{MockContentClient, MockContentSource};
use serde_json::json;

use crate::harness::{app, delete, get, post_json, service};

fn id(raw: &str) -> ContentId {
    ContentId::parse(raw).unwrap()
}

#[tokio::test]
async fn test_add_then_status_reports_metadata_state() {
    let scratch = tempfile::tempdir().unwrap();
    let client = Arc::new(MockContentClient::new());
    let service = service(client.clone(), scratch.path());
    let app = app(&service);

    let added = post_json(&app, "/add", json!({ "infoHash": "ABCD" })).await;
    assert_eq!(added.status, StatusCode::OK);
    assert_eq!(added.json()["infoHash"], "ABCD");
    assert_eq!(added.json()["alreadyPresent"], false);

    let again = post_json(&app, "/add", json!({ "magnetURI": "magnet:?xt=urn:btih:ABCD" })).await;
    assert_eq!(again.json()["alreadyPresent"], true);

    let status = get(&app, "/status/ABCD").await.json();
    assert_eq!(status["metadataCompleted"], false);
    assert!(status.get("files").is_none());

    client.source(&id("ABCD")).unwrap().publish_info(ContentInfo::from_files(
        "movie",
        10,
        &[("movie.mkv".to_string(), 100)],
    ));

    let status = get(&app, "/status/ABCD").await.json();
    assert_eq!(status["metadataCompleted"], true);
    assert_eq!(status["name"], "movie");
    assert_eq!(status["length"], 100);
    assert_eq!(status["files"][0]["path"], "movie.mkv");
    service.shutdown().await;
}

#[tokio::test]
async fn test_bad_requests_are_rejected_with_json_errors() {
    let scratch = tempfile::tempdir().unwrap();
    let service = service(Arc::new(MockContentClient::new()), scratch.path());
    let app = app(&service);

    let missing_id = post_json(&app, "/add", json!({})).await;
    assert_eq!(missing_id.status, StatusCode::BAD_REQUEST);
    assert!(missing_id.json()["error"].is_string());

    let bad_id = post_json(&app, "/add", json!({ "infoHash": "../../etc" })).await;
    assert_eq!(bad_id.status, StatusCode::BAD_REQUEST);

    let wrong_shape = post_json(&app, "/prioritize", json!({ "infoHash": "ABCD" })).await;
    assert_eq!(wrong_shape.status, StatusCode::BAD_REQUEST);

    let bad_index = get(&app, "/progress/ABCD/first").await;
    assert_eq!(bad_index.status, StatusCode::BAD_REQUEST);

    let unknown = get(&app, "/status/NOPE").await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    service.shutdown().await;
}

#[tokio::test]
async fn test_prioritize_waits_for_metadata() {
    let scratch = tempfile::tempdir().unwrap();
    let service = service(Arc::new(MockContentClient::new()), scratch.path());
    let app = app(&service);
    post_json(&app, "/add", json!({ "infoHash": "ABCD" })).await;

    let reply = post_json(
        &app,
        "/prioritize",
        json!({ "infoHash": "ABCD", "fileIdx": 0, "percentage": 50.0 }),
    )
    .await;

    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.header(header::RETRY_AFTER), Some("1"));
    service.shutdown().await;
}

#[tokio::test]
async fn test_prioritize_marks_window_and_reports_it() {
    let scratch = tempfile::tempdir().unwrap();
    let client = Arc::new(MockContentClient::new());
    let info = ContentInfo::from_files("movie", 10, &[("movie.mkv".to_string(), 1000)]);
    let source = client.stage(MockContentSource::with_info(id("ABCD"), info));
    let service = service(client, scratch.path());
    let app = app(&service);
    post_json(&app, "/add", json!({ "infoHash": "ABCD" })).await;

    let reply = post_json(
        &app,
        "/prioritize",
        json!({ "infoHash": "ABCD", "fileIdx": 0, "percentage": 50.0 }),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let body = reply.json();
    assert_eq!(body["seekPositionBytes"], 500);
    assert_eq!(body["seekPositionPiece"], 50);
    assert_eq!(body["startPriority"], 50);
    assert_eq!(body["endPriority"], 70);
    assert_eq!(source.priority(60), Some(PiecePriority::Now));

    let near_end = post_json(
        &app,
        "/prioritize",
        json!({ "infoHash": "ABCD", "fileIdx": 0, "percentage": 99.9 }),
    )
    .await;
    assert_eq!(near_end.json()["ignored"], true);

    let out_of_range = post_json(
        &app,
        "/prioritize",
        json!({ "infoHash": "ABCD", "fileIdx": 0, "percentage": 120.0 }),
    )
    .await;
    assert_eq!(out_of_range.status, StatusCode::BAD_REQUEST);

    let requested = get(&app, "/status/ABCD").await.json();
    assert!(requested["requestedPieces"].as_u64().is_some_and(|count| count >= 21));
    service.shutdown().await;
}

#[tokio::test]
async fn test_progress_counts_file_pieces() {
    let scratch = tempfile::tempdir().unwrap();
    let client = Arc::new(MockContentClient::new());
    let info = ContentInfo::from_files(
        "show",
        10,
        &[("notes.txt".to_string(), 20), ("episode.mp4".to_string(), 80)],
    );
    let source = client.stage(MockContentSource::with_info(id("SHOW"), info));
    source.complete_pieces(2..6);
    let service = service(client, scratch.path());
    let app = app(&service);
    post_json(&app, "/add", json!({ "infoHash": "SHOW" })).await;

    let progress = get(&app, "/progress/SHOW/1").await.json();

    assert_eq!(progress["ready"], true);
    assert_eq!(progress["file_path"], "episode.mp4");
    assert_eq!(progress["length_bytes"], 80);
    assert_eq!(progress["completed_pieces_in_file_range"], 4);
    assert_eq!(progress["total_pieces_in_file_range"], 8);
    assert_eq!(progress["percent_by_pieces"], 50.0);

    let unknown_file = get(&app, "/progress/SHOW/7").await;
    assert_eq!(unknown_file.status, StatusCode::NOT_FOUND);
    service.shutdown().await;
}

#[tokio::test]
async fn test_duration_validation_and_remove() {
    let scratch = tempfile::tempdir().unwrap();
    let client = Arc::new(MockContentClient::new());
    let service = service(client.clone(), scratch.path());
    let app = app(&service);
    post_json(&app, "/add", json!({ "infoHash": "ABCD" })).await;

    let accepted = post_json(
        &app,
        "/duration",
        json!({ "infoHash": "ABCD", "fileIdx": 0, "duration": 42.5 }),
    )
    .await;
    assert_eq!(accepted.status, StatusCode::OK);
    assert_eq!(accepted.json()["duration"], 42.5);

    let negative = post_json(
        &app,
        "/duration",
        json!({ "infoHash": "ABCD", "fileIdx": 0, "duration": -1.0 }),
    )
    .await;
    assert_eq!(negative.status, StatusCode::BAD_REQUEST);

    let removed = delete(&app, "/remove/ABCD").await;
    assert_eq!(removed.status, StatusCode::OK);
    assert!(client.source(&id("ABCD")).is_some_and(|source| source.is_closed()));
    assert_eq!(get(&app, "/status/ABCD").await.status, StatusCode::NOT_FOUND);
    assert_eq!(delete(&app, "/remove/ABCD").await.status, StatusCode::NOT_FOUND);
    service.shutdown().await;
}

#[tokio::test]
async fn test_health_counts_contents() {
    let scratch = tempfile::tempdir().unwrap();
    let service = service(Arc::new(MockContentClient::new()), scratch.path());
    let app = app(&service);
    post_json(&app, "/add", json!({ "infoHash": "ONE" })).await;
    post_json(&app, "/add", json!({ "infoHash": "TWO" })).await;

    let health = get(&app, "/health").await.json();

    assert_eq!(health["status"], "ok");
    assert_eq!(health["contents"], 2);
    assert_eq!(health["transcodeJobs"], 0);
    service.shutdown().await;
}
