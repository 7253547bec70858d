use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::{
    handlers::{ingest_telemetry_handler, query_telemetry_handler, telemetry_stats_handler},
    infra::{app_state::AppState, middleware::require_admin},
};

/// Create all v1 API routes
pub fn create_v1_router(state: AppState) -> Router<AppState> {
    Router::new()
        // Agents submit without credentials
        .route("/telemetry", post(ingest_telemetry_handler))
        .merge(create_admin_routes(state))
}

/// History and stats are restricted to the dashboard operator
fn create_admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/telemetry", get(query_telemetry_handler))
        .route("/telemetry/stats", get(telemetry_stats_handler))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}
