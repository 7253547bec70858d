use axum::{extract::State, response::Html};

use crate::infra::app_state::AppState;

/// Serve the dashboard page read at startup.
pub async fn dashboard_handler(State(state): State<AppState>) -> Html<String> {
    Html(state.dashboard.html.clone())
}
