use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use telemetry_core::build_criteria;
use tracing::debug;

use crate::infra::{app_state::AppState, errors::AppResult, websocket::run_viewer};

/// Upgrade to the live-update channel.
///
/// The session is registered before upgrading so a full hub is reported as
/// 503 instead of an immediately closed socket. Query parameters act as a
/// live filter with the same rules as history queries.
pub async fn live_updates_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Response> {
    let live_filter = build_criteria(&state.whitelist, params)?;
    let subscription = state.hub.join(Some(live_filter)).await?;
    debug!(session_id = %subscription.id(), "live viewer joined");

    let hub = state.hub.clone();
    let settings = state.config.websocket.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        run_viewer(socket, subscription, hub, settings).await;
    }))
}
