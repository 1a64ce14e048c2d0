mod common;

use axum::http::StatusCode;
use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use safeshare_backend::entities::{access_logs, prelude::*, room_presence};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;

fn join_body(room_id: &str) -> serde_json::Value {
    json!({ "roomId": room_id })
}

#[tokio::test]
async fn test_join_assigns_guest_number_one() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    let (status, body) = request(
        &h.app,
        "POST",
        "/api/room-access",
        &[("x-device-id", "device-1")],
        Some(join_body(&room_id)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["guestNumber"], 1);
}

#[tokio::test]
async fn test_concurrent_first_join_same_device_is_idempotent() {
    // Two simultaneous joins for the same (room, device) both get
    // guest number 1, and only one presence row / access log exists.
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    let first = request(
        &h.app,
        "POST",
        "/api/room-access",
        &[("x-device-id", "device-1")],
        Some(join_body(&room_id)),
    );
    let second = request(
        &h.app,
        "POST",
        "/api/room-access",
        &[("x-device-id", "device-1")],
        Some(join_body(&room_id)),
    );

    let ((status_a, body_a), (status_b, body_b)) = tokio::join!(first, second);

    assert_eq!(status_a, StatusCode::OK);
    assert_eq!(status_b, StatusCode::OK);
    assert_eq!(body_a["guestNumber"], 1);
    assert_eq!(body_b["guestNumber"], 1);

    // presence is a single row
    let presence_rows = RoomPresence::find()
        .filter(room_presence::Column::RoomId.eq(&room_id))
        .count(&h.db)
        .await
        .unwrap();
    assert_eq!(presence_rows, 1);

    // the access-log write is async; give it a beat
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let log_count = AccessLogs::find()
        .filter(access_logs::Column::RoomId.eq(&room_id))
        .filter(access_logs::Column::EventType.eq(access_logs::EVENT_ROOM_ACCESS))
        .count(&h.db)
        .await
        .unwrap();
    assert_eq!(log_count, 1);
}

#[tokio::test]
async fn test_twenty_concurrent_joins_get_dense_numbers() {
    // 20 distinct devices, numbers exactly 1..=20, no gaps.
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let app = h.app.clone();
        let room_id = room_id.clone();
        handles.push(tokio::spawn(async move {
            let device = format!("device-{}", i);
            let ip = format!("10.0.0.{}", i + 1);
            let (status, body) = request(
                &app,
                "POST",
                "/api/room-access",
                &[
                    ("x-device-id", device.as_str()),
                    ("x-forwarded-for", ip.as_str()),
                ],
                Some(json!({ "roomId": room_id })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            body["guestNumber"].as_i64().unwrap()
        }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap());
    }
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=20).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_rejoin_returns_same_number() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    for _ in 0..2 {
        let (status, body) = request(
            &h.app,
            "POST",
            "/api/room-access",
            &[("x-device-id", "stable-device")],
            Some(join_body(&room_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["guestNumber"], 1);
    }

    // a different device gets the next number
    let (_, body) = request(
        &h.app,
        "POST",
        "/api/room-access",
        &[
            ("x-device-id", "other-device"),
            ("x-forwarded-for", "10.9.9.9"),
        ],
        Some(join_body(&room_id)),
    )
    .await;
    assert_eq!(body["guestNumber"], 2);
}

#[tokio::test]
async fn test_author_join_is_skipped() {
    let h = setup_app().await;
    let (room_id, author_token) = create_room(&h.app, "normal", None).await;

    let (status, body) = request(
        &h.app,
        "POST",
        "/api/room-access",
        &[("x-author-token", author_token.as_str())],
        Some(join_body(&room_id)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"], "author");

    let presence_rows = RoomPresence::find()
        .filter(room_presence::Column::RoomId.eq(&room_id))
        .count(&h.db)
        .await
        .unwrap();
    assert_eq!(presence_rows, 0);
}

#[tokio::test]
async fn test_capacity_limit_and_window_expiry() {
    // Capacity 2, three devices; the third is rejected until the first
    // falls out of the active window.
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", Some(2)).await;

    for (device, ip) in [("d1", "10.1.0.1"), ("d2", "10.1.0.2")] {
        let (status, body) = request(
            &h.app,
            "POST",
            "/api/room-access",
            &[("x-device-id", device), ("x-forwarded-for", ip)],
            Some(join_body(&room_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }

    let (status, body) = request(
        &h.app,
        "POST",
        "/api/room-access",
        &[("x-device-id", "d3"), ("x-forwarded-for", "10.1.0.3")],
        Some(join_body(&room_id)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["isFull"], true);

    // d1 stops heartbeating: age its row past the active window
    RoomPresence::update_many()
        .col_expr(
            room_presence::Column::LastSeenAt,
            Expr::value(Utc::now() - ChronoDuration::seconds(200)),
        )
        .filter(room_presence::Column::RoomId.eq(&room_id))
        .filter(room_presence::Column::DeviceId.eq("d1"))
        .exec(&h.db)
        .await
        .unwrap();

    let (status, _) = request(
        &h.app,
        "POST",
        "/api/room-access/presence",
        &[("x-device-id", "d3"), ("x-forwarded-for", "10.1.0.3")],
        Some(join_body(&room_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_capacity_gauge() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", Some(5)).await;

    request(
        &h.app,
        "POST",
        "/api/room-access",
        &[("x-device-id", "d1")],
        Some(join_body(&room_id)),
    )
    .await;

    let (status, body) = request(
        &h.app,
        "GET",
        &format!("/api/room-capacity/{}", room_id),
        &[],
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"], 1);
    assert_eq!(body["max"], 5);
    assert_eq!(body["isFull"], false);
    assert_eq!(body["isUnlimited"], false);
}

#[tokio::test]
async fn test_unlimited_capacity_room() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", Some(999)).await;

    let (_, body) = request(
        &h.app,
        "GET",
        &format!("/api/room-capacity/{}", room_id),
        &[],
        None,
    )
    .await;
    assert_eq!(body["isUnlimited"], true);
}

#[tokio::test]
async fn test_leave_marks_presence_left() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    request(
        &h.app,
        "POST",
        "/api/room-access",
        &[("x-device-id", "d1")],
        Some(join_body(&room_id)),
    )
    .await;

    let (status, _) = request(
        &h.app,
        "POST",
        "/api/room-access/leave",
        &[("x-device-id", "d1")],
        Some(join_body(&room_id)),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let row = RoomPresence::find_by_id((room_id.clone(), "d1".to_string()))
        .one(&h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, room_presence::STATUS_LEFT);
}

#[tokio::test]
async fn test_join_missing_room_is_404() {
    let h = setup_app().await;
    let (status, _) = request(
        &h.app,
        "POST",
        "/api/room-access",
        &[("x-device-id", "d1")],
        Some(json!({ "roomId": uuid::Uuid::new_v4().to_string() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_join_malformed_room_id_is_400() {
    let h = setup_app().await;
    let (status, _) = request(
        &h.app,
        "POST",
        "/api/room-access",
        &[("x-device-id", "d1")],
        Some(json!({ "roomId": "not-a-uuid" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_password_verification() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    let (status, body) = request(
        &h.app,
        "POST",
        "/api/rooms/verify-password",
        &[],
        Some(json!({ "roomId": room_id, "passwordHash": TEST_PASSWORD_HASH })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let wrong = "a".repeat(64);
    let (status, body) = request(
        &h.app,
        "POST",
        "/api/rooms/verify-password",
        &[],
        Some(json!({ "roomId": room_id, "passwordHash": wrong })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);

    // malformed hash shape is a 400, not a failed verification
    let (status, _) = request(
        &h.app,
        "POST",
        "/api/rooms/verify-password",
        &[],
        Some(json!({ "roomId": room_id, "passwordHash": "tooshort" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_author_verification() {
    let h = setup_app().await;
    let (room_id, author_token) = create_room(&h.app, "normal", None).await;

    let (_, body) = request(
        &h.app,
        "POST",
        "/api/verify-author",
        &[],
        Some(json!({ "roomId": room_id, "authorToken": author_token })),
    )
    .await;
    assert_eq!(body["valid"], true);

    let (_, body) = request(
        &h.app,
        "POST",
        "/api/verify-author",
        &[],
        Some(json!({ "roomId": room_id, "authorToken": "bogus" })),
    )
    .await;
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn test_room_creation_rejects_bad_hash() {
    let h = setup_app().await;
    let (status, _) = request(
        &h.app,
        "POST",
        "/api/rooms",
        &[],
        Some(json!({ "name": "Bad", "passwordHash": "nothex" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_author_delete_room() {
    let h = setup_app().await;
    let (room_id, author_token) = create_room(&h.app, "normal", None).await;
    upload_file(&h.app, &room_id, &author_token, "doc.pdf", 100).await;

    // guests cannot delete
    let (status, _) = request(
        &h.app,
        "DELETE",
        &format!("/api/delete-room/{}", room_id),
        &[("x-author-token", "wrong")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = request(
        &h.app,
        "DELETE",
        &format!("/api/delete-room/{}", room_id),
        &[("x-author-token", author_token.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filesDeleted"], 1);

    assert!(
        Rooms::find_by_id(&room_id)
            .one(&h.db)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(h.storage.object_count(&format!("{}/", room_id)), 0);
}
