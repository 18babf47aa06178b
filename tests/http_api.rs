#![cfg(feature = "http")]

mod support;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use support::{MockDaemon, engine_with, sample_torrent};
use tower::ServiceExt;

use uni_downloader::server::build_router;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn post_empty(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::post(uri).body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn test_submit_and_fetch_url() {
    let daemon = MockDaemon::new();
    let app = build_router(engine_with(&daemon).app_state());

    let (status, body) = post_json(
        &app,
        "/api/v1/downloads/url",
        json!({"url": "https://example.com/video.mp4"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["deferred"], false);
    assert_eq!(body["task"]["status"], "queued");
    assert_eq!(body["task"]["category"], "video");
    assert_eq!(body["task"]["progress"]["total_formatted"], "unknown");

    let id = body["task_id"].as_str().unwrap().to_string();
    let (status, body) = get(&app, &format!("/api/v1/downloads/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["task_id"], id.as_str());
    assert_eq!(body["task"]["source"], "https://example.com/video.mp4");
}

#[tokio::test]
async fn test_invalid_input_uses_error_envelope() {
    let daemon = MockDaemon::new();
    let app = build_router(engine_with(&daemon).app_state());

    let (status, body) = post_json(
        &app,
        "/api/v1/downloads/magnet",
        json!({"magnet": "magnet:?dn=missing-hash"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "INVALID_INPUT");
    assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));

    let (status, body) = post_json(&app, "/api/v1/downloads/batch", json!({"urls": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_INPUT");

    let (status, body) = get(&app, "/api/v1/downloads?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let daemon = MockDaemon::new();
    let app = build_router(engine_with(&daemon).app_state());

    for uri in [
        "/api/v1/downloads/not-a-uuid",
        "/api/v1/downloads/6f1c2b0e-8a43-4c52-9b0c-3f0f6c1c2d4e",
    ] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "NOT_FOUND");
    }
}

#[tokio::test]
async fn test_batch_text_and_list_filters() {
    let daemon = MockDaemon::new();
    let app = build_router(engine_with(&daemon).app_state());

    let (status, body) = post_json(
        &app,
        "/api/v1/downloads/batch",
        json!({"text": "http://a/song.mp3\n# skipped\n\nnot-a-url\nhttp://a/clip.mkv"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], 2);
    assert_eq!(body["fail_count"], 1);
    assert_eq!(body["per_line_errors"][0]["line_no"], 4);

    let (_, body) = get(&app, "/api/v1/downloads").await;
    assert_eq!(body["count"], 2);
    let (_, body) = get(&app, "/api/v1/downloads?category=audio").await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["downloads"][0]["file_name"], "song.mp3");
    let (_, body) = get(&app, "/api/v1/downloads?status=all&limit=1").await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_torrent_upload_takes_raw_body() {
    let daemon = MockDaemon::new();
    let app = build_router(engine_with(&daemon).app_state());

    let request = Request::post("/api/v1/downloads/torrent")
        .header(header::CONTENT_TYPE, "application/x-bittorrent")
        .body(Body::from(sample_torrent()))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["kind"], "torrent");
    assert_eq!(body["task"]["file_name"], "movie.mkv");
}

#[tokio::test]
async fn test_actions_when_daemon_unreachable() {
    let daemon = MockDaemon::new();
    let engine = engine_with(&daemon);
    let app = build_router(engine.app_state());

    let (_, body) = post_json(
        &app,
        "/api/v1/downloads/url",
        json!({"url": "http://a/x.zip"}),
    )
    .await;
    let id = body["task_id"].as_str().unwrap().to_string();

    daemon.set_reachable(false);
    let (status, body) = post_empty(&app, &format!("/api/v1/downloads/{}/pause", id)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error_code"], "DAEMON_UNREACHABLE");

    let (_, body) = post_empty(&app, "/api/v1/sync").await;
    assert_eq!(body["cycle"]["daemon_reachable"], false);
    assert_eq!(body["cycle"]["marked_stale"], 1);

    let (_, body) = get(&app, "/api/v1/health").await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["total_tasks"], 1);
    assert_eq!(body["delivery_mode"], "poll");

    let (_, body) = get(&app, &format!("/api/v1/downloads/{}", id)).await;
    assert_eq!(body["task"]["status"], "queued");
    assert_eq!(body["task"]["stale"], true);
}

#[tokio::test]
async fn test_pause_resume_retry_remove_routes() {
    let daemon = MockDaemon::new();
    let app = build_router(engine_with(&daemon).app_state());

    let (_, body) = post_json(
        &app,
        "/api/v1/downloads/url",
        json!({"url": "http://a/y.zip"}),
    )
    .await;
    let id = body["task_id"].as_str().unwrap().to_string();

    let (status, body) = post_empty(&app, &format!("/api/v1/downloads/{}/pause", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["status"], "paused");

    let (_, body) = post_empty(&app, &format!("/api/v1/downloads/{}/resume", id)).await;
    assert_eq!(body["task"]["status"], "active");

    let (status, body) = post_empty(&app, &format!("/api/v1/downloads/{}/retry", id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "INVALID_STATE");

    let request = Request::delete(format!("/api/v1/downloads/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task_id"], id.as_str());

    let (status, _) = get(&app, &format!("/api/v1/downloads/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_statistics_route() {
    let daemon = MockDaemon::new();
    let app = build_router(engine_with(&daemon).app_state());

    let (status, body) = get(&app, "/api/v1/statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statistics"]["num_active"], 0);
    assert_eq!(body["statistics"]["download_speed_formatted"], "0 B/s");

    daemon.set_reachable(false);
    let (status, body) = get(&app, "/api/v1/statistics").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_generic_submission_dispatches_on_type() {
    let daemon = MockDaemon::new();
    let app = build_router(engine_with(&daemon).app_state());

    // 没有 type 时按 url 处理
    let (status, body) = post_json(
        &app,
        "/api/v1/downloads",
        json!({"url": "https://example.com/album.flac"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["kind"], "url");
    assert_eq!(body["task"]["category"], "audio");

    let magnet = "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a&dn=ubuntu.iso";
    let (status, body) = post_json(
        &app,
        "/api/v1/downloads",
        json!({"type": "magnet", "url": magnet}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["kind"], "magnet");
    assert_eq!(body["task"]["file_name"], "ubuntu.iso");

    let (status, body) = post_json(
        &app,
        "/api/v1/downloads",
        json!({"type": "batch", "urls": ["http://a/1.zip", "ftp://b/2.iso"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], 2);

    let (_, body) = get(&app, "/api/v1/downloads").await;
    assert_eq!(body["count"], 4);
    assert_eq!(daemon.call_count("aria2.addUri"), 4);
}

#[tokio::test]
async fn test_generic_submission_rejects_bad_requests() {
    let daemon = MockDaemon::new();
    let app = build_router(engine_with(&daemon).app_state());

    for body in [
        json!({"type": "url"}),
        json!({"type": "magnet", "url": ""}),
        json!({"type": "batch"}),
        json!({"type": "ed2k", "url": "ed2k://|file|a|1|x|/"}),
    ] {
        let (status, body) = post_json(&app, "/api/v1/downloads", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "INVALID_INPUT");
    }
    assert_eq!(daemon.call_count("aria2.addUri"), 0);
}

#[tokio::test]
async fn test_delete_with_force_flag() {
    let daemon = MockDaemon::new();
    let app = build_router(engine_with(&daemon).app_state());

    let (_, body) = post_json(
        &app,
        "/api/v1/downloads/url",
        json!({"url": "http://a/z.zip"}),
    )
    .await;
    let id = body["task_id"].as_str().unwrap().to_string();

    let request = Request::delete(format!("/api/v1/downloads/{}?force=true", id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["force"], true);
    assert_eq!(daemon.call_count("aria2.forceRemove"), 1);
    assert_eq!(daemon.call_count("aria2.remove"), 0);
    assert_eq!(daemon.live_count(), 0);
}

#[tokio::test]
async fn test_system_test_reports_daemon_version() {
    let daemon = MockDaemon::new();
    let app = build_router(engine_with(&daemon).app_state());

    let (status, body) = get(&app, "/api/v1/system/test").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["version"], "1.37.0");
    assert_eq!(body["enabled_features"][0], "BitTorrent");

    daemon.set_reachable(false);
    let (status, body) = get(&app, "/api/v1/system/test").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error_code"], "DAEMON_UNREACHABLE");
}
