//! Byte-range streaming over HTTP
//!
//! Requests beyond the file answer 416 with `Content-Range: bytes */len`
//! instead of an empty or truncated body.

use std::sync::Arc;

use axum::http::{StatusCode, header};
use cinestream_core::ContentId;
use cinestream_core::testing::{MockContentClient, MockContentSource};
use serde_json::json;

use crate::harness::{app, get, get_range, post_json, service};

fn movie_bytes() -> Vec<u8> {
    (0..100u8).collect()
}

async fn staged_movie(client: &MockContentClient) {
    let source = client.stage(MockContentSource::with_data(
        ContentId::parse("ABCD").unwrap(),
        10,
        &[("cover.jpg", vec![0xFF; 10]), ("movie.mp4", movie_bytes())],
    ));
    source.complete_all();
}

#[tokio::test]
async fn test_partial_and_full_responses() {
    let scratch = tempfile::tempdir().unwrap();
    let client = Arc::new(MockContentClient::new());
    staged_movie(&client).await;
    let service = service(client, scratch.path());
    let app = app(&service);
    post_json(&app, "/add", json!({ "infoHash": "ABCD" })).await;

    let partial = get_range(&app, "/stream/ABCD/1", "bytes=10-19").await;
    assert_eq!(partial.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(partial.header(header::CONTENT_RANGE), Some("bytes 10-19/100"));
    assert_eq!(partial.header(header::CONTENT_LENGTH), Some("10"));
    assert_eq!(partial.header(header::CONTENT_TYPE), Some("video/mp4"));
    assert_eq!(partial.header(header::ACCEPT_RANGES), Some("bytes"));
    assert_eq!(&partial.body[..], &movie_bytes()[10..20]);

    let suffix = get_range(&app, "/stream/ABCD/1", "bytes=-5").await;
    assert_eq!(suffix.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(&suffix.body[..], &movie_bytes()[95..]);

    let open_ended = get_range(&app, "/stream/ABCD/1", "bytes=90-").await;
    assert_eq!(open_ended.header(header::CONTENT_RANGE), Some("bytes 90-99/100"));

    let full = get(&app, "/stream/ABCD/1").await;
    assert_eq!(full.status, StatusCode::OK);
    assert!(full.header(header::CONTENT_RANGE).is_none());
    assert_eq!(full.body.to_vec(), movie_bytes());
    service.shutdown().await;
}

#[tokio::test]
async fn test_end_past_file_is_clamped() {
    let scratch = tempfile::tempdir().unwrap();
    let client = Arc::new(MockContentClient::new());
    staged_movie(&client).await;
    let service = service(client, scratch.path());
    let app = app(&service);
    post_json(&app, "/add", json!({ "infoHash": "ABCD" })).await;

    let reply = get_range(&app, "/stream/ABCD/1", "bytes=95-5000").await;

    assert_eq!(reply.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(reply.header(header::CONTENT_RANGE), Some("bytes 95-99/100"));
    assert_eq!(reply.body.len(), 5);
    service.shutdown().await;
}

#[tokio::test]
async fn test_unsatisfiable_and_malformed_ranges() {
    let scratch = tempfile::tempdir().unwrap();
    let client = Arc::new(MockContentClient::new());
    staged_movie(&client).await;
    let service = service(client, scratch.path());
    let app = app(&service);
    post_json(&app, "/add", json!({ "infoHash": "ABCD" })).await;

    let beyond = get_range(&app, "/stream/ABCD/1", "bytes=100-").await;
    assert_eq!(beyond.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(beyond.header(header::CONTENT_RANGE), Some("bytes */100"));

    let malformed = get_range(&app, "/stream/ABCD/1", "items=0-5").await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);

    let missing_file = get(&app, "/stream/ABCD/9").await;
    assert_eq!(missing_file.status, StatusCode::NOT_FOUND);
    service.shutdown().await;
}
