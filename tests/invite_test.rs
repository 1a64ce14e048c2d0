mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;

#[tokio::test]
async fn test_invite_with_valid_share_link() {
    // The canonical happy path, with an encryption-key fragment the
    // core never interprets.
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    let key = "A".repeat(43);
    let share_link = format!("https://safeshare.co/room/{}#key={}", room_id, key);

    let (status, body) = request(
        &h.app,
        "POST",
        "/api/invite",
        &[("x-forwarded-for", "20.0.0.1")],
        Some(json!({
            "email": "friend@example.com",
            "roomId": room_id,
            "shareLink": share_link,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["sent"], true);
}

#[tokio::test]
async fn test_invite_without_share_link_uses_default_url() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    let (status, _) = request(
        &h.app,
        "POST",
        "/api/invite",
        &[("x-forwarded-for", "20.0.0.2")],
        Some(json!({ "email": "friend@example.com", "roomId": room_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_invite_rejects_foreign_origin() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    let (status, _) = request(
        &h.app,
        "POST",
        "/api/invite",
        &[("x-forwarded-for", "20.0.0.3")],
        Some(json!({
            "email": "friend@example.com",
            "roomId": room_id,
            "shareLink": format!("https://attacker.tld/room/{}", room_id),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invite_rejects_query_params() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    let (status, _) = request(
        &h.app,
        "POST",
        "/api/invite",
        &[("x-forwarded-for", "20.0.0.4")],
        Some(json!({
            "email": "friend@example.com",
            "roomId": room_id,
            "shareLink": format!("https://safeshare.co/room/{}?redir=https://evil.tld", room_id),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invite_rejects_bad_email_and_room() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    let (status, _) = request(
        &h.app,
        "POST",
        "/api/invite",
        &[("x-forwarded-for", "20.0.0.5")],
        Some(json!({ "email": "not-an-email", "roomId": room_id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(
        &h.app,
        "POST",
        "/api/invite",
        &[("x-forwarded-for", "20.0.0.6")],
        Some(json!({ "email": "a@b.co", "roomId": "not-a-uuid" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invite_to_missing_room_is_404() {
    let h = setup_app().await;
    let (status, _) = request(
        &h.app,
        "POST",
        "/api/invite",
        &[("x-forwarded-for", "20.0.0.7")],
        Some(json!({ "email": "a@b.co", "roomId": uuid::Uuid::new_v4().to_string() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_recipient_quota_three_per_hour() {
    // Distinct sender IPs so only the per-recipient bin is in play.
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    for i in 0..3 {
        let ip = format!("20.1.0.{}", i + 1);
        let (status, body) = request(
            &h.app,
            "POST",
            "/api/invite",
            &[("x-forwarded-for", ip.as_str())],
            Some(json!({ "email": "popular@example.com", "roomId": room_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "invite {} failed: {}", i, body);
    }

    let (status, _) = request(
        &h.app,
        "POST",
        "/api/invite",
        &[("x-forwarded-for", "20.1.0.9")],
        Some(json!({ "email": "popular@example.com", "roomId": room_id })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_invite_min_interval_per_ip() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;

    let (status, _) = request(
        &h.app,
        "POST",
        "/api/invite",
        &[("x-forwarded-for", "20.2.0.1")],
        Some(json!({ "email": "one@example.com", "roomId": room_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // immediate second send from the same IP trips the 8s spacing
    let (status, body) = request(
        &h.app,
        "POST",
        "/api/invite",
        &[("x-forwarded-for", "20.2.0.1")],
        Some(json!({ "email": "two@example.com", "roomId": room_id })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Too many requests");
}

#[tokio::test]
async fn test_invite_rejects_tampered_fragment() {
    let h = setup_app().await;
    let (room_id, _) = create_room(&h.app, "normal", None).await;
    let key = "A".repeat(43);

    for (i, fragment) in [
        "key=short".to_string(),
        format!("key={}&extra=1", key),
        format!("token={}", key),
        format!("key={}", "=".repeat(40)),
    ]
    .into_iter()
    .enumerate()
    {
        // distinct sender IPs keep the 8s spacing gate out of the way
        let ip = format!("20.3.0.{}", i + 1);
        let (status, _) = request(
            &h.app,
            "POST",
            "/api/invite",
            &[("x-forwarded-for", ip.as_str())],
            Some(json!({
                "email": "friend@example.com",
                "roomId": room_id,
                "shareLink": format!("https://safeshare.co/room/{}#{}", room_id, fragment),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "fragment '{}'", fragment);
    }
}
