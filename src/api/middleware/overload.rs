use crate::AppState;
use crate::api::error::AppError;
use crate::api::middleware::rate_limit::classify;
use crate::config::AppConfig;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::System;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(3);
const SHED_RETRY_AFTER_SECS: u64 = 10;

#[derive(Debug, Clone)]
struct Sample {
    taken: Instant,
    overloaded: bool,
}

/// Process-health gate for heavy routes. Samples at most every 3 seconds;
/// between samples every request reuses the cached verdict, so the guard
/// costs nothing on the hot path.
#[derive(Clone)]
pub struct OverloadGuard {
    sample: Arc<Mutex<Option<Sample>>>,
    max_rss_mb: u64,
    min_free_memory_mb: u64,
    max_load_per_cpu: f64,
    enabled: bool,
}

impl OverloadGuard {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            sample: Arc::new(Mutex::new(None)),
            max_rss_mb: config.max_rss_mb,
            min_free_memory_mb: config.min_free_memory_mb,
            max_load_per_cpu: config.max_load_per_cpu,
            enabled: config.overload_shedding,
        }
    }

    pub fn is_overloaded(&self) -> bool {
        if !self.enabled {
            return false;
        }

        let mut guard = match self.sample.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };

        if let Some(sample) = guard.as_ref() {
            if sample.taken.elapsed() < SAMPLE_INTERVAL {
                return sample.overloaded;
            }
        }

        let overloaded = self.measure();
        *guard = Some(Sample {
            taken: Instant::now(),
            overloaded,
        });
        overloaded
    }

    fn measure(&self) -> bool {
        let mut system = System::new_all();
        system.refresh_all();

        let rss_mb = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| system.process(pid))
            .map(|p| p.memory() / 1024 / 1024)
            .unwrap_or(0);

        let free_mb = system.available_memory() / 1024 / 1024;

        let cpus = system.cpus().len().max(1) as f64;
        let load_per_cpu = System::load_average().one / cpus;

        let overloaded = rss_mb > self.max_rss_mb
            || free_mb < self.min_free_memory_mb
            || load_per_cpu > self.max_load_per_cpu;

        if overloaded {
            tracing::warn!(
                rss_mb,
                free_mb,
                load_per_cpu,
                "⚠️  Overload guard tripped, shedding heavy routes"
            );
        }

        overloaded
    }
}

/// Sheds heavy route classes with 503 + Retry-After while overloaded.
/// Light routes (presence, health, downloads) are always served.
pub async fn overload_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(class) = classify(req.uri().path()) {
        if class.is_heavy() && state.overload.is_overloaded() {
            return Err(AppError::Overloaded(SHED_RETRY_AFTER_SECS));
        }
    }
    Ok(next.run(req).await)
}
