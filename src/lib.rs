pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::api::middleware::overload::OverloadGuard;
use crate::api::middleware::rate_limit::FixedWindowLimiter;
use crate::config::AppConfig;
use crate::services::access_log::AccessLogService;
use crate::services::download::DownloadCoordinator;
use crate::services::geo::GeoProvider;
use crate::services::lifecycle::RoomLifecycle;
use crate::services::mailer::Mailer;
use crate::services::storage::StorageService;
use crate::services::upload::UploadOrchestrator;
use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::health_check,
        api::handlers::rooms::create_room,
        api::handlers::rooms::verify_password,
        api::handlers::rooms::verify_author,
        api::handlers::rooms::delete_room,
        api::handlers::rooms::room_capacity,
        api::handlers::room_access::join_room,
        api::handlers::room_access::presence_heartbeat,
        api::handlers::room_access::leave_room,
        api::handlers::room_access::room_activity,
        api::handlers::uploads::initiate_upload,
        api::handlers::uploads::get_part_urls,
        api::handlers::uploads::complete_upload,
        api::handlers::uploads::abort_upload,
        api::handlers::uploads::presigned_upload,
        api::handlers::uploads::update_file,
        api::handlers::uploads::delete_file,
        api::handlers::downloads::download,
        api::handlers::downloads::download_start,
        api::handlers::downloads::download_end,
        api::handlers::downloads::bulk_mark,
        api::handlers::downloads::preview,
        api::handlers::downloads::bulk_download,
        api::handlers::invites::send_invite,
        api::handlers::analytics::access_logs_for_room,
        api::handlers::analytics::analytics_live,
        api::handlers::analytics::analytics_overview,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::handlers::rooms::CreateRoomRequest,
            api::handlers::rooms::CreateRoomResponse,
            api::handlers::rooms::VerifyPasswordRequest,
            api::handlers::rooms::VerifyAuthorRequest,
            api::handlers::room_access::RoomAccessRequest,
            api::handlers::uploads::InitiateUploadRequest,
            api::handlers::uploads::PartUrlsRequest,
            api::handlers::uploads::CompleteUploadRequest,
            api::handlers::uploads::AbortUploadRequest,
            api::handlers::uploads::PresignedUploadRequest,
            api::handlers::uploads::UpdateFileRequest,
            api::handlers::downloads::DownloadLockRequest,
            api::handlers::downloads::DownloadEndRequest,
            api::handlers::downloads::BulkMarkRequest,
            api::handlers::invites::InviteRequest,
            crate::services::upload::InitiateUploadResponse,
            crate::services::upload::PartEtag,
        )
    ),
    tags(
        (name = "rooms", description = "Room lifecycle endpoints"),
        (name = "access", description = "Presence and capacity endpoints"),
        (name = "uploads", description = "Multipart upload orchestration"),
        (name = "downloads", description = "Download authorization and burn protocol"),
        (name = "system", description = "Health and analytics")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub storage: Arc<dyn StorageService>,
    pub config: AppConfig,
    pub rate_limiter: FixedWindowLimiter,
    pub overload: OverloadGuard,
    pub access_log: Arc<AccessLogService>,
    pub lifecycle: Arc<RoomLifecycle>,
    pub uploads: Arc<UploadOrchestrator>,
    pub downloads: Arc<DownloadCoordinator>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Wire the service graph once; everything downstream clones cheaply.
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        geo: Arc<dyn GeoProvider>,
        mailer: Arc<dyn Mailer>,
        config: AppConfig,
    ) -> Self {
        let access_log = Arc::new(AccessLogService::new(
            db.clone(),
            geo,
            config.dedup_ttl,
        ));
        let lifecycle = Arc::new(RoomLifecycle::new(
            db.clone(),
            Arc::clone(&storage),
            config.destruction_countdown,
        ));
        let uploads = Arc::new(UploadOrchestrator::new(
            db.clone(),
            Arc::clone(&storage),
            config.clone(),
        ));
        let downloads = Arc::new(DownloadCoordinator::new(
            db.clone(),
            Arc::clone(&storage),
            Arc::clone(&lifecycle),
            Arc::clone(&access_log),
            config.clone(),
        ));

        Self {
            db,
            storage,
            overload: OverloadGuard::new(&config),
            rate_limiter: FixedWindowLimiter::new(),
            config,
            access_log,
            lifecycle,
            uploads,
            downloads,
            mailer,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(api::handlers::health::health_check))
        .route("/rooms", post(api::handlers::rooms::create_room))
        .route(
            "/rooms/verify-password",
            post(api::handlers::rooms::verify_password),
        )
        .route("/verify-author", post(api::handlers::rooms::verify_author))
        .route(
            "/delete-room/:room_id",
            delete(api::handlers::rooms::delete_room),
        )
        .route(
            "/room-capacity/:room_id",
            get(api::handlers::rooms::room_capacity),
        )
        .route("/room-access", post(api::handlers::room_access::join_room))
        .route(
            "/room-access/presence",
            post(api::handlers::room_access::presence_heartbeat),
        )
        .route(
            "/room-access/leave",
            post(api::handlers::room_access::leave_room),
        )
        .route(
            "/room-access/activity/:room_id",
            get(api::handlers::room_access::room_activity),
        )
        .route(
            "/presigned-upload",
            post(api::handlers::uploads::presigned_upload),
        )
        .route(
            "/multipart-upload/initiate",
            post(api::handlers::uploads::initiate_upload),
        )
        .route(
            "/multipart-upload/get-part-urls",
            post(api::handlers::uploads::get_part_urls),
        )
        .route(
            "/multipart-upload/complete",
            post(api::handlers::uploads::complete_upload),
        )
        .route(
            "/multipart-upload/abort",
            post(api::handlers::uploads::abort_upload),
        )
        .route(
            "/update-file/:file_id",
            patch(api::handlers::uploads::update_file),
        )
        .route(
            "/delete-file/:file_id",
            delete(api::handlers::uploads::delete_file),
        )
        .route("/download", get(api::handlers::downloads::download))
        .route(
            "/download/start",
            post(api::handlers::downloads::download_start),
        )
        .route(
            "/download/end",
            post(api::handlers::downloads::download_end),
        )
        .route(
            "/download/bulk-mark",
            post(api::handlers::downloads::bulk_mark),
        )
        .route("/preview", get(api::handlers::downloads::preview))
        .route(
            "/bulk-download",
            get(api::handlers::downloads::bulk_download),
        )
        .route("/invite", post(api::handlers::invites::send_invite))
        .route(
            "/access-logs/:room_id",
            get(api::handlers::analytics::access_logs_for_room),
        )
        .route(
            "/analytics/live",
            get(api::handlers::analytics::analytics_live),
        )
        .route(
            "/analytics-admin/overview",
            get(api::handlers::analytics::analytics_overview),
        );

    // Configure CORS based on allowed_origins
    let cors_layer = if state.config.allowed_origins.contains(&"*".to_string()) {
        tracing::warn!(
            "CORS configured with wildcard (*) - this is insecure for production! \
             Set ALLOWED_ORIGINS environment variable to specific domains."
        );
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();

        tracing::info!(
            "CORS configured for origins: {:?}",
            state.config.allowed_origins
        );

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PATCH,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
                axum::http::header::ACCEPT,
                axum::http::header::ORIGIN,
                axum::http::header::USER_AGENT,
                axum::http::header::HeaderName::from_static("x-author-token"),
                axum::http::header::HeaderName::from_static("x-device-id"),
            ])
            // Multipart completion needs the part ETag on the client side.
            .expose_headers([
                axum::http::header::CONTENT_LENGTH,
                axum::http::header::CONTENT_TYPE,
                axum::http::header::CONTENT_DISPOSITION,
                axum::http::header::ETAG,
                axum::http::header::RETRY_AFTER,
            ])
            .allow_credentials(true)
    };

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_routes)
        // Innermost to outermost: rate guard, then overload guard, so a
        // shedding server does not also burn rate budget.
        .layer(from_fn_with_state(
            state.clone(),
            api::middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            api::middleware::overload::overload_middleware,
        ))
        .layer(from_fn(api::middleware::security::security_headers))
        .layer(cors_layer)
        .with_state(state)
}
