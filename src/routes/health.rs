use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub job_store: ComponentHealth,
    pub storage: ComponentHealth,
    pub redis: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

async fn check_component<E: std::fmt::Display>(name: &str, check: impl Future<Output = Result<(), E>>) -> ComponentHealth {
    let start = Instant::now();
    match check.await {
        Ok(()) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => {
            tracing::warn!(component = name, error = %e, "Health check failed");
            ComponentHealth {
                status: "error".to_string(),
                latency_ms: None,
            }
        }
    }
}

/// GET /health: health check with dependency status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (job_store, storage, redis) = tokio::join!(
        check_component("job_store", state.store.health_check()),
        check_component("storage", state.storage.health_check()),
        check_component("redis", state.queue.health_check()),
    );

    if let Ok(depth) = state.queue.queue_depth().await {
        metrics::gauge!("run_queue_depth").set(depth as f64);
    }

    let all_healthy = job_store.is_ok() && storage.is_ok() && redis.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            job_store,
            storage,
            redis,
        },
    };

    (status_code, Json(response))
}
