//! HTTP Basic guard for the admin-only routes (history queries, stats,
//! dashboard and the live channel).

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use constant_time_eq::constant_time_eq;
use telemetry_config::AdminCredentials;
use tracing::debug;

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

/// Reject the request with 401 unless it carries the configured admin
/// credentials.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> AppResult<Response> {
    match basic_credentials(request.headers()) {
        Some((username, password)) if verify(&state.config.admin, &username, &password) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            debug!(path = %request.uri().path(), "rejected admin credentials");
            Err(AppError::unauthorized("Invalid credentials"))
        }
        None => Err(AppError::unauthorized("Authentication required")),
    }
}

/// Decode `Authorization: Basic <base64(user:pass)>`.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn verify(expected: &AdminCredentials, username: &str, password: &str) -> bool {
    // Both halves are always compared so timing does not reveal which one failed.
    let user_ok = constant_time_eq(expected.username.as_bytes(), username.as_bytes());
    let pass_ok = constant_time_eq(expected.password.as_bytes(), password.as_bytes());
    user_ok & pass_ok
}
