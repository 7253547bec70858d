/// `/api/v1` routes
pub mod v1;

use axum::{
    Router, middleware,
    routing::{any, get},
};
use tower_http::trace::TraceLayer;

use crate::{
    handlers::{dashboard_handler, health_handler, live_updates_handler, ping_handler},
    infra::{app_state::AppState, middleware::require_admin},
};

/// Create the main API router with all versions
pub fn create_api_router(state: AppState) -> Router<AppState> {
    Router::new().nest("/api/v1", v1::create_v1_router(state))
}

/// Full application: public probes, admin-only dashboard and live channel,
/// and the versioned API.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/health", get(health_handler))
        .merge(create_dashboard_routes(state.clone()))
        .merge(create_api_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn create_dashboard_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/ws", any(live_updates_handler))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::startup::DashboardAsset;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use std::sync::Arc;
    use telemetry_config::{ConfigLoader, EnvConfig};
    use telemetry_core::{BroadcastHub, InMemoryRecordStore};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = ConfigLoader::new()
            .load_with_env(EnvConfig {
                admin_user: Some("admin".into()),
                admin_pass: Some("router-test-password".into()),
                ..EnvConfig::default()
            })
            .unwrap()
            .config;
        let hub = BroadcastHub::start(config.hub.clone());
        AppState::new(
            Arc::new(config),
            Arc::new(InMemoryRecordStore::new()),
            hub,
            DashboardAsset::placeholder(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dashboard_requires_credentials() {
        let app = create_app(test_state());

        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let credentials = STANDARD.encode("admin:router-test-password");
        let response = app
            .oneshot(
                Request::get("/")
                    .header(header::AUTHORIZATION, format!("Basic {credentials}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ping_is_public() {
        let response = create_app(test_state())
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
