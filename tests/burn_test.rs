mod common;

use axum::http::StatusCode;
use axum::Router;
use common::*;
use safeshare_backend::entities::{prelude::*, rooms};
use sea_orm::EntityTrait;
use serde_json::json;
use std::time::Duration;

async fn join(app: &Router, room_id: &str, device: &str, ip: &str) {
    let (status, body) = request(
        app,
        "POST",
        "/api/room-access",
        &[("x-device-id", device), ("x-forwarded-for", ip)],
        Some(json!({ "roomId": room_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "join failed: {}", body);
}

async fn grant(
    app: &Router,
    file_key: &str,
    device: &str,
) -> (StatusCode, serde_json::Value) {
    request(
        app,
        "GET",
        &format!("/api/download?fileKey={}", file_key),
        &[("x-device-id", device)],
        None,
    )
    .await
}

async fn start(app: &Router, room_id: &str, file_id: &str, device: &str) -> StatusCode {
    let (status, _) = request(
        app,
        "POST",
        "/api/download/start",
        &[("x-device-id", device)],
        Some(json!({ "roomId": room_id, "fileId": file_id })),
    )
    .await;
    status
}

async fn end(app: &Router, room_id: &str, file_id: &str, device: &str, success: bool) -> StatusCode {
    let (status, _) = request(
        app,
        "POST",
        "/api/download/end",
        &[("x-device-id", device)],
        Some(json!({ "roomId": room_id, "fileId": file_id, "success": success })),
    )
    .await;
    status
}

/// A countdown long enough that the `terminating` state is observable
/// between the burn and the destruction.
fn slow_countdown_config() -> safeshare_backend::config::AppConfig {
    safeshare_backend::config::AppConfig {
        destruction_countdown: Duration::from_millis(400),
        ..test_config()
    }
}

#[tokio::test]
async fn test_burn_single_download_lifecycle() {
    // One burn file, one winner; the file and then the room destroy
    // themselves on schedule.
    let h = setup_app_with(slow_countdown_config()).await;
    let (room_id, author_token) = create_room(&h.app, "burn", None).await;
    let (file_id, file_key) = upload_file(&h.app, &room_id, &author_token, "secret.txt", 64).await;

    join(&h.app, &room_id, "d1", "10.2.0.1").await;
    join(&h.app, &room_id, "d2", "10.2.0.2").await;

    // winner flow
    let (status, body) = grant(&h.app, &file_key, "d1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["burnMode"], true);
    assert!(body["signedUrl"].as_str().unwrap().contains("X-Amz-Expires=300"));
    assert_eq!(start(&h.app, &room_id, &file_id, "d1").await, StatusCode::OK);
    assert_eq!(end(&h.app, &room_id, &file_id, "d1", true).await, StatusCode::OK);

    // loser sees Gone immediately (download_count already 1)
    let (status, _) = grant(&h.app, &file_key, "d2").await;
    assert_eq!(status, StatusCode::GONE);

    // after the burn delay the blob and row are gone, room terminating
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!h.storage.objects.contains_key(&file_key));
    assert!(Files::find_by_id(&file_id).one(&h.db).await.unwrap().is_none());
    let room = Rooms::find_by_id(&room_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(room.remaining_files, 0);
    assert_eq!(room.status, rooms::STATUS_TERMINATING);
    assert!(room.termination_started_at.is_some());

    // after the countdown, with no download in flight, the room is gone
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(Rooms::find_by_id(&room_id).one(&h.db).await.unwrap().is_none());
}

#[tokio::test]
async fn test_burn_concurrent_download_conflicts() {
    // A second grant between /start and /end answers 409; after /end
    // it answers 410.
    let h = setup_app().await;
    let (room_id, author_token) = create_room(&h.app, "burn", None).await;
    let (file_id, file_key) = upload_file(&h.app, &room_id, &author_token, "secret.txt", 64).await;

    join(&h.app, &room_id, "d1", "10.3.0.1").await;
    join(&h.app, &room_id, "d2", "10.3.0.2").await;
    join(&h.app, &room_id, "d3", "10.3.0.3").await;

    let (status, _) = grant(&h.app, &file_key, "d1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(start(&h.app, &room_id, &file_id, "d1").await, StatusCode::OK);

    // in-flight: busy
    let (status, _) = grant(&h.app, &file_key, "d2").await;
    assert_eq!(status, StatusCode::CONFLICT);

    assert_eq!(end(&h.app, &room_id, &file_id, "d1", true).await, StatusCode::OK);

    // consumed: gone (still before the destruction countdown finishes)
    let (status, _) = grant(&h.app, &file_key, "d3").await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn test_failed_download_clears_lock_without_burning() {
    let h = setup_app().await;
    let (room_id, author_token) = create_room(&h.app, "burn", None).await;
    let (file_id, file_key) = upload_file(&h.app, &room_id, &author_token, "secret.txt", 64).await;

    join(&h.app, &room_id, "d1", "10.4.0.1").await;

    assert_eq!(start(&h.app, &room_id, &file_id, "d1").await, StatusCode::OK);
    assert_eq!(end(&h.app, &room_id, &file_id, "d1", false).await, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(200)).await;

    // nothing burned, lock released, room still active
    let room = Rooms::find_by_id(&room_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(room.status, rooms::STATUS_ACTIVE);
    assert_eq!(room.active_downloads, 0);
    let file = Files::find_by_id(&file_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(file.download_count, 0);
    assert!(h.storage.objects.contains_key(&file_key));
}

#[tokio::test]
async fn test_terminating_room_waits_for_inflight_download() {
    // Invariant: a terminating room never destroys while a download is in
    // progress. The countdown keeps rescheduling until the refcount drains.
    let h = setup_app().await;
    let (room_id, author_token) = create_room(&h.app, "burn", None).await;
    let (file_id, _) = upload_file(&h.app, &room_id, &author_token, "a.txt", 64).await;

    join(&h.app, &room_id, "d1", "10.5.0.1").await;
    join(&h.app, &room_id, "d2", "10.5.0.2").await;

    // d2 holds a download slot through the whole burn
    assert_eq!(start(&h.app, &room_id, &file_id, "d2").await, StatusCode::OK);

    assert_eq!(start(&h.app, &room_id, &file_id, "d1").await, StatusCode::OK);
    assert_eq!(end(&h.app, &room_id, &file_id, "d1", true).await, StatusCode::OK);

    // burn delay (50ms) + countdown (100ms) pass, but d2 is still live
    tokio::time::sleep(Duration::from_millis(400)).await;
    let room = Rooms::find_by_id(&room_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(room.status, rooms::STATUS_TERMINATING);
    assert_eq!(room.active_downloads, 1);

    // d2 finishes; next countdown tick destroys the room
    assert_eq!(end(&h.app, &room_id, &file_id, "d2", false).await, StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(Rooms::find_by_id(&room_id).one(&h.db).await.unwrap().is_none());
}

#[tokio::test]
async fn test_repeated_end_counts_burn_download_once() {
    let h = setup_app().await;
    let (room_id, author_token) = create_room(&h.app, "burn", None).await;
    // a second file keeps the room alive long enough to inspect the first
    let (file_id, _) = upload_file(&h.app, &room_id, &author_token, "a.txt", 64).await;
    upload_file(&h.app, &room_id, &author_token, "b.txt", 64).await;

    join(&h.app, &room_id, "d1", "10.6.0.1").await;

    assert_eq!(start(&h.app, &room_id, &file_id, "d1").await, StatusCode::OK);
    assert_eq!(end(&h.app, &room_id, &file_id, "d1", true).await, StatusCode::OK);
    // duplicate end-call from a confused client
    assert_eq!(end(&h.app, &room_id, &file_id, "d1", true).await, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let room = Rooms::find_by_id(&room_id).one(&h.db).await.unwrap().unwrap();
    // one file consumed, one left; a double-count would read 0 here
    assert_eq!(room.remaining_files, 1);
    assert_eq!(room.status, rooms::STATUS_ACTIVE);
}

#[tokio::test]
async fn test_one_time_file_in_normal_room() {
    let h = setup_app().await;
    let (room_id, author_token) = create_room(&h.app, "normal", None).await;

    // upload with the per-file burn override
    let (status, init) = request(
        &h.app,
        "POST",
        "/api/multipart-upload/initiate",
        &[("x-author-token", author_token.as_str())],
        Some(json!({ "roomId": room_id, "fileName": "once.txt", "fileSize": 32 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let file_key = init["fileKey"].as_str().unwrap().to_string();
    let file_id = init["fileId"].as_str().unwrap().to_string();
    let (status, _) = request(
        &h.app,
        "POST",
        "/api/multipart-upload/complete",
        &[("x-author-token", author_token.as_str())],
        Some(json!({
            "roomId": room_id,
            "uploadId": init["uploadId"],
            "fileKey": file_key,
            "fileName": "once.txt",
            "fileSize": 32,
            "burnAfterDownload": true,
            "parts": [{"partNumber": 1, "etag": "\"e\""}],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    join(&h.app, &room_id, "d1", "10.7.0.1").await;
    join(&h.app, &room_id, "d2", "10.7.0.2").await;

    let (status, body) = grant(&h.app, &file_key, "d1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["burnMode"], true);
    assert_eq!(start(&h.app, &room_id, &file_id, "d1").await, StatusCode::OK);
    assert_eq!(end(&h.app, &room_id, &file_id, "d1", true).await, StatusCode::OK);

    // consumed for everyone, but the room survives
    let (status, _) = grant(&h.app, &file_key, "d2").await;
    assert_eq!(status, StatusCode::GONE);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let room = Rooms::find_by_id(&room_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(room.status, rooms::STATUS_ACTIVE);
}

#[tokio::test]
async fn test_bulk_mark_drains_burn_room() {
    let h = setup_app_with(slow_countdown_config()).await;
    let (room_id, author_token) = create_room(&h.app, "burn", None).await;
    let (file_a, _) = upload_file(&h.app, &room_id, &author_token, "a.txt", 16).await;
    let (file_b, _) = upload_file(&h.app, &room_id, &author_token, "b.txt", 16).await;

    join(&h.app, &room_id, "d1", "10.8.0.1").await;

    let (status, body) = request(
        &h.app,
        "POST",
        "/api/download/bulk-mark",
        &[("x-device-id", "d1")],
        Some(json!({ "roomId": room_id, "fileIds": [file_a, file_b] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filesMarked"], 2);

    let room = Rooms::find_by_id(&room_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(room.remaining_files, 0);
    assert_eq!(room.status, rooms::STATUS_TERMINATING);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(Rooms::find_by_id(&room_id).one(&h.db).await.unwrap().is_none());
}

#[tokio::test]
async fn test_download_requires_authorization() {
    let h = setup_app().await;
    let (room_id, author_token) = create_room(&h.app, "normal", None).await;
    let (_, file_key) = upload_file(&h.app, &room_id, &author_token, "doc.txt", 16).await;

    // no token, no presence
    let (status, _) = request(
        &h.app,
        "GET",
        &format!("/api/download?fileKey={}", file_key),
        &[("x-device-id", "stranger")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // the author needs no presence
    let (status, _) = request(
        &h.app,
        "GET",
        &format!("/api/download?fileKey={}", file_key),
        &[("x-author-token", author_token.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_normal_room_allows_repeat_downloads() {
    let h = setup_app().await;
    let (room_id, author_token) = create_room(&h.app, "normal", None).await;
    let (file_id, file_key) = upload_file(&h.app, &room_id, &author_token, "doc.txt", 16).await;

    join(&h.app, &room_id, "d1", "10.9.0.1").await;

    for _ in 0..3 {
        let (status, body) = grant(&h.app, &file_key, "d1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["burnMode"], false);
        assert_eq!(start(&h.app, &room_id, &file_id, "d1").await, StatusCode::OK);
        assert_eq!(end(&h.app, &room_id, &file_id, "d1", true).await, StatusCode::OK);
    }

    let file = Files::find_by_id(&file_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(file.download_count, 3);
    assert!(h.storage.objects.contains_key(&file_key));
}
