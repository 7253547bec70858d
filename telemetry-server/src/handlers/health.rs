use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::infra::app_state::AppState;

/// Liveness check; always 200.
pub async fn ping_handler() -> Json<Value> {
    info!("Ping endpoint called");
    Json(json!({
        "status": "ok",
        "message": "Telemetry server is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Store and hub health; 503 when either is down.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let mut health_status = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {}
    });
    let mut is_unhealthy = false;

    match state.store.ping().await {
        Ok(()) => {
            health_status["checks"]["store"] = json!({
                "status": "healthy",
                "backend": state.store.backend(),
            });
        }
        Err(e) => {
            warn!(error = %e, "record store health check failed");
            health_status["checks"]["store"] = json!({
                "status": "unhealthy",
                "backend": state.store.backend(),
                "error": e.to_string()
            });
            is_unhealthy = true;
        }
    }

    match state.hub.stats().await {
        Ok(stats) => {
            health_status["checks"]["hub"] = json!({
                "status": "healthy",
                "sessions": stats.sessions,
                "published": stats.published,
                "evicted": stats.evicted,
            });
        }
        Err(e) => {
            health_status["checks"]["hub"] = json!({
                "status": "unhealthy",
                "error": e.to_string()
            });
            is_unhealthy = true;
        }
    }

    if is_unhealthy {
        health_status["status"] = json!("unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, Json(health_status))
    } else {
        (StatusCode::OK, Json(health_status))
    }
}
