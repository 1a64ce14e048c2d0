use clap::Parser;
use dotenvy::dotenv;
use safeshare_backend::config::AppConfig;
use safeshare_backend::infrastructure::{database, storage};
use safeshare_backend::services::geo::{GeoProvider, HttpGeoProvider, NoopGeoProvider};
use safeshare_backend::services::mailer::{HttpMailer, Mailer, NoopMailer};
use safeshare_backend::services::reaper::Reaper;
use safeshare_backend::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service type to run (api, reaper, all)
    #[arg(short, long, default_value = "all")]
    mode: String,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safeshare_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting SafeShare backend [Mode: {}]...", args.mode);

    let config = AppConfig::from_env();
    info!(
        "🛡️  Room quotas: {} files / {} MB, capacity default {}",
        config.room_max_files,
        config.room_max_total_size_bytes / 1024 / 1024,
        config.default_capacity
    );

    let db = database::setup_database().await?;
    let storage_service = storage::setup_storage().await;

    let geo: Arc<dyn GeoProvider> = match &config.geo_api_url {
        Some(url) => Arc::new(HttpGeoProvider::new(url.clone())),
        None => Arc::new(NoopGeoProvider),
    };

    let mailer: Arc<dyn Mailer> = match (&config.mail_api_url, &config.mail_api_key) {
        (Some(url), Some(key)) => Arc::new(HttpMailer::new(
            url.clone(),
            key.clone(),
            config.mail_from.clone(),
        )),
        _ => {
            info!("📧 No mail API configured, invites are log-only");
            Arc::new(NoopMailer)
        }
    };

    let state = AppState::new(
        db.clone(),
        storage_service.clone(),
        geo,
        mailer,
        config.clone(),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    if args.mode == "reaper" || args.mode == "all" {
        let reaper = Reaper::new(
            db.clone(),
            storage_service.clone(),
            Arc::clone(&state.lifecycle),
            config.clone(),
        );
        let reaper_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            reaper.run(reaper_shutdown).await;
        });
        info!("🧹 Reaper service initialized.");
    }

    if args.mode == "api" || args.mode == "all" {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            );

        let lifecycle = Arc::clone(&state.lifecycle);
        let app = create_app(state).layer(trace_layer);
        let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);
        info!(
            "📖 Swagger UI documentation: http://localhost:{}/swagger-ui",
            args.port
        );

        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal());

        if let Err(e) = serve.await {
            error!("❌ Server runtime error: {}", e);
        }

        // Pending destruction countdowns die with the process; the reaper
        // compensates on the next boot.
        lifecycle.shutdown();
        let _ = shutdown_tx.send(true);
    } else {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    }

    info!("👋 Backend exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
