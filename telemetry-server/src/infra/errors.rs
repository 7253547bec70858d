use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use telemetry_core::TelemetryError;

/// Handler result carrying an [`AppError`].
pub type AppResult<T> = Result<T, AppError>;

/// `WWW-Authenticate` value sent with every 401.
pub const BASIC_AUTH_CHALLENGE: &str = r#"Basic realm="telemetry""#;

/// An error rendered as `{"error": {"message", "status"}}`.
#[derive(Debug)]
pub struct AppError {
    /// Response status.
    pub status: StatusCode,
    /// Human-readable reason.
    pub message: String,
}

impl AppError {
    /// An error with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// 400 Bad Request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 401 Unauthorized, with a Basic challenge.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// 503 Service Unavailable.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        let mut response = (self.status, body).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(BASIC_AUTH_CHALLENGE),
            );
        }
        response
    }
}

impl From<TelemetryError> for AppError {
    fn from(err: TelemetryError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            Self::service_unavailable(err.to_string())
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_bad_request() {
        let err: AppError = TelemetryError::UnrecognizedAttribute("os".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: AppError = TelemetryError::ValidationFailed("`value` is required".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: AppError = TelemetryError::ConflictingCriterion("arch".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "conflicting values for filter attribute `arch`");
    }

    #[test]
    fn capacity_and_store_failures_map_to_unavailable() {
        for err in [
            TelemetryError::CapacityExceeded { limit: 1 },
            TelemetryError::StoreUnavailable("down".into()),
            TelemetryError::HubSaturated,
            TelemetryError::HubClosed,
        ] {
            assert!(!err.is_client_error());
            assert_eq!(AppError::from(err).status, StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    #[test]
    fn unauthorized_carries_basic_challenge() {
        let response = AppError::unauthorized("nope").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            BASIC_AUTH_CHALLENGE
        );
    }
}
