use thiserror::Error;

/// Everything that can go wrong inside the telemetry core.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A submission was malformed or out of bounds.
    #[error("invalid telemetry submission: {0}")]
    ValidationFailed(String),

    /// A filter named an attribute outside the whitelist.
    #[error("unrecognized filter attribute `{0}`")]
    UnrecognizedAttribute(String),

    /// A filter gave two different values for one attribute.
    #[error("conflicting values for filter attribute `{0}`")]
    ConflictingCriterion(String),

    /// The hub already holds its maximum number of sessions.
    #[error("session limit of {limit} reached")]
    CapacityExceeded {
        /// The configured session limit.
        limit: usize,
    },

    /// The record store failed or could not be reached.
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),

    /// `publish` under `fail-fast` found the inbound channel full.
    #[error("broadcast hub inbound channel is full")]
    HubSaturated,

    /// The hub was stopped or never started.
    #[error("broadcast hub is not running")]
    HubClosed,
}

impl TelemetryError {
    /// True when the caller supplied bad input, as opposed to a server-side
    /// failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TelemetryError::ValidationFailed(_)
                | TelemetryError::UnrecognizedAttribute(_)
                | TelemetryError::ConflictingCriterion(_)
        )
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for TelemetryError {
    fn from(err: sqlx::Error) -> Self {
        TelemetryError::StoreUnavailable(err.to_string())
    }
}

#[cfg(feature = "database")]
impl From<sqlx::migrate::MigrateError> for TelemetryError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        TelemetryError::StoreUnavailable(format!("migration failed: {err}"))
    }
}

/// Result alias over [`TelemetryError`].
pub type Result<T> = std::result::Result<T, TelemetryError>;
