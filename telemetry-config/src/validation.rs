use std::{fmt, time::Duration};

use thiserror::Error;
use tracing::warn;

use crate::models::Config;

/// Shorter admin passwords load with a warning.
pub const MIN_ADMIN_PASSWORD_LEN: usize = 12;

/// A configuration combination that cannot run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    /// A size or count is zero.
    #[error("{field} must be at least 1")]
    ZeroCapacity {
        /// Dotted setting name.
        field: &'static str,
    },
    /// A whitelisted metadata key is reserved or malformed.
    #[error("filter metadata key `{key}` is not usable: {reason}")]
    InvalidFilterKey {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The idle timeout would fire before the first ping is answered.
    #[error(
        "websocket idle timeout ({}) must exceed the ping interval ({})",
        humantime::format_duration(*idle_timeout),
        humantime::format_duration(*ping_interval)
    )]
    IdleTimeoutTooShort {
        /// Configured idle timeout.
        idle_timeout: Duration,
        /// Configured ping interval.
        ping_interval: Duration,
    },
    /// Pings would never be sent.
    #[error("websocket ping interval must be greater than zero")]
    ZeroPingInterval,
}

/// One soft finding, optionally with a remedy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    /// What is off.
    pub message: String,
    /// How to fix it.
    pub hint: Option<String>,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} (hint: {hint})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Non-fatal findings collected while loading configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    /// Add a warning without a hint.
    pub fn push(&mut self, message: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    /// Add a warning with a remedy.
    pub fn push_with_hint(&mut self, message: impl Into<String>, hint: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    /// Append every warning from `other`.
    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    /// True when nothing was flagged.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of warnings.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Warnings in the order they were raised.
    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }

    /// Emit every warning through `tracing`. Call after the subscriber is
    /// installed.
    pub fn log(&self) {
        for warning in &self.items {
            match &warning.hint {
                Some(hint) => {
                    warn!(message = %warning.message, hint = %hint, "configuration warning")
                }
                None => warn!(message = %warning.message, "configuration warning"),
            }
        }
    }
}

/// Reject configurations that cannot run and collect softer warnings.
pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    for (field, value) in [
        ("hub.inbound_capacity", config.hub.inbound_capacity),
        ("hub.session_queue_capacity", config.hub.session_queue_capacity),
        ("hub.max_sessions", config.hub.max_sessions),
        ("query.max_results", config.query.max_results),
    ] {
        if value == 0 {
            return Err(ConfigGuardRailError::ZeroCapacity { field });
        }
    }
    if config.database.max_connections == 0 {
        return Err(ConfigGuardRailError::ZeroCapacity {
            field: "database.max_connections",
        });
    }

    for key in &config.filter.metadata_keys {
        if let Err(err) = telemetry_core::AttributeWhitelist::with_metadata_keys([key.as_str()]) {
            return Err(ConfigGuardRailError::InvalidFilterKey {
                key: key.clone(),
                reason: err.to_string(),
            });
        }
    }

    let websocket = &config.websocket;
    if websocket.ping_interval.is_zero() {
        return Err(ConfigGuardRailError::ZeroPingInterval);
    }
    if websocket.idle_timeout <= websocket.ping_interval {
        return Err(ConfigGuardRailError::IdleTimeoutTooShort {
            idle_timeout: websocket.idle_timeout,
            ping_interval: websocket.ping_interval,
        });
    }

    if config.admin.password.chars().count() < MIN_ADMIN_PASSWORD_LEN {
        warnings.push_with_hint(
            format!("Admin password is shorter than {MIN_ADMIN_PASSWORD_LEN} characters"),
            "Set TELEMETRY_ADMIN_PASS to a longer random value",
        );
    }

    if config.database.url.is_none() {
        warnings.push_with_hint(
            "DATABASE_URL is not set; telemetry will be kept in memory and lost on restart",
            "Point DATABASE_URL at a PostgreSQL instance for durable storage",
        );
    }

    if config.hub.session_queue_capacity < 8 {
        warnings.push(format!(
            "hub.session_queue_capacity = {} will evict viewers after very short stalls",
            config.hub.session_queue_capacity
        ));
    }

    Ok(warnings)
}
