#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use http_body_util::BodyExt;
use safeshare_backend::config::AppConfig;
use safeshare_backend::infrastructure::database::run_migrations;
use safeshare_backend::services::geo::NoopGeoProvider;
use safeshare_backend::services::mailer::NoopMailer;
use safeshare_backend::services::storage::{MultipartUploadInfo, StorageService};
use safeshare_backend::{AppState, create_app};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tower::ServiceExt;

/// Object store double: a couple of maps instead of MinIO. Presigned URLs
/// are fake but carry the expiry so the TTL contracts stay assertable.
#[derive(Default)]
pub struct InMemoryStorage {
    pub objects: DashMap<String, Vec<u8>>,
    pub multiparts: DashMap<String, (String, DateTime<Utc>)>,
    counter: AtomicU64,
}

impl InMemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed an orphaned multipart initiation for reaper tests.
    pub fn seed_multipart(&self, key: &str, initiated: DateTime<Utc>) -> String {
        let upload_id = format!("upload-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.multiparts
            .insert(upload_id.clone(), (key.to_string(), initiated));
        upload_id
    }

    pub fn object_count(&self, prefix: &str) -> usize {
        self.objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl StorageService for InMemoryStorage {
    async fn put_object(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<()> {
        self.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .get(key)
            .map(|v| v.clone())
            .ok_or_else(|| anyhow!("no such key: {}", key))
    }

    async fn get_object_head(&self, key: &str, max_bytes: usize) -> Result<Vec<u8>> {
        let data = self.get_object(key).await?;
        Ok(data.into_iter().take(max_bytes).collect())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
        _content_disposition: &str,
    ) -> Result<String> {
        Ok(format!(
            "https://blobs.test/{}?X-Amz-Expires={}",
            key,
            expires_in.as_secs()
        ))
    }

    async fn presign_put(&self, key: &str, expires_in: Duration) -> Result<String> {
        Ok(format!(
            "https://blobs.test/{}?X-Amz-Expires={}&method=PUT",
            key,
            expires_in.as_secs()
        ))
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        _content_type: Option<&str>,
    ) -> Result<String> {
        let upload_id = format!("upload-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.multiparts
            .insert(upload_id.clone(), (key.to_string(), Utc::now()));
        Ok(upload_id)
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> Result<String> {
        Ok(format!(
            "https://blobs.test/{}?uploadId={}&partNumber={}&X-Amz-Expires={}",
            key,
            upload_id,
            part_number,
            expires_in.as_secs()
        ))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<(i32, String)>,
    ) -> Result<()> {
        if parts.is_empty() {
            return Err(anyhow!("no parts"));
        }
        self.multiparts
            .remove(upload_id)
            .ok_or_else(|| anyhow!("no such upload: {}", upload_id))?;
        // Bytes went straight to the store in real life; stand-in content.
        self.objects
            .entry(key.to_string())
            .or_insert_with(|| b"uploaded content".to_vec());
        Ok(())
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.multiparts.remove(upload_id);
        Ok(())
    }

    async fn list_multipart_uploads(&self) -> Result<Vec<MultipartUploadInfo>> {
        Ok(self
            .multiparts
            .iter()
            .map(|e| MultipartUploadInfo {
                key: e.value().0.clone(),
                upload_id: e.key().clone(),
                initiated: Some(e.value().1),
            })
            .collect())
    }
}

/// Timers shrunk to tens of milliseconds; shedding off so a loaded CI
/// machine cannot 503 the suite.
pub fn test_config() -> AppConfig {
    AppConfig {
        burn_delay: Duration::from_millis(50),
        destruction_countdown: Duration::from_millis(100),
        overload_shedding: false,
        dedup_ttl: Duration::from_secs(3),
        ..Default::default()
    }
}

pub async fn setup_db() -> DatabaseConnection {
    let _ = tracing_subscriber::fmt::try_init();
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    run_migrations(&db).await.unwrap();
    db
}

pub struct TestHarness {
    pub app: Router,
    pub state: AppState,
    pub storage: Arc<InMemoryStorage>,
    pub db: DatabaseConnection,
}

pub async fn setup_app_with(config: AppConfig) -> TestHarness {
    let db = setup_db().await;
    let storage = InMemoryStorage::new();
    let state = AppState::new(
        db.clone(),
        storage.clone(),
        Arc::new(NoopGeoProvider),
        Arc::new(NoopMailer),
        config,
    );
    let app = create_app(state.clone());
    TestHarness {
        app,
        state,
        storage,
        db,
    }
}

pub async fn setup_app() -> TestHarness {
    setup_app_with(test_config()).await
}

/// One-shot request helper returning (status, parsed JSON body).
pub async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Raw variant for byte-stream responses (archives, previews).
pub async fn request_raw(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let response_headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec(), response_headers)
}

pub const TEST_PASSWORD_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Create a room via the API, returning (room_id, author_token).
pub async fn create_room(app: &Router, mode: &str, capacity: Option<i32>) -> (String, String) {
    let mut body = serde_json::json!({
        "name": "Test Room",
        "authorName": "Tester",
        "mode": mode,
        "passwordHash": TEST_PASSWORD_HASH,
    });
    if let Some(capacity) = capacity {
        body["capacity"] = serde_json::json!(capacity);
    }

    let (status, json) = request(app, "POST", "/api/rooms", &[], Some(body)).await;
    assert_eq!(status, StatusCode::OK, "room creation failed: {}", json);
    (
        json["id"].as_str().unwrap().to_string(),
        json["author_token"].as_str().unwrap().to_string(),
    )
}

/// Drive the full multipart flow as the author; returns (file_id, file_key).
pub async fn upload_file(
    app: &Router,
    room_id: &str,
    author_token: &str,
    filename: &str,
    size: i64,
) -> (String, String) {
    let (status, init) = request(
        app,
        "POST",
        "/api/multipart-upload/initiate",
        &[("x-author-token", author_token)],
        Some(serde_json::json!({
            "roomId": room_id,
            "fileName": filename,
            "fileSize": size,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "initiate failed: {}", init);

    let upload_id = init["uploadId"].as_str().unwrap().to_string();
    let file_key = init["fileKey"].as_str().unwrap().to_string();
    let file_id = init["fileId"].as_str().unwrap().to_string();

    let (status, complete) = request(
        app,
        "POST",
        "/api/multipart-upload/complete",
        &[("x-author-token", author_token)],
        Some(serde_json::json!({
            "roomId": room_id,
            "uploadId": upload_id,
            "fileKey": file_key,
            "fileName": filename,
            "fileSize": size,
            "parts": [{"partNumber": 1, "etag": "\"etag-1\""}],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "complete failed: {}", complete);

    (file_id, file_key)
}
