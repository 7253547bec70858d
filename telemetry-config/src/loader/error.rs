use std::path::PathBuf;

use thiserror::Error;

use crate::{models::sources::InvalidEnvVar, validation::ConfigGuardRailError};

/// Why a configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// An explicitly named configuration file does not exist.
    #[error("configuration file missing: {path}")]
    MissingConfig {
        /// The requested path.
        path: PathBuf,
    },
    /// The configuration file exists but could not be read.
    #[error("failed to read configuration {path}")]
    Io {
        /// The file being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse configuration {path}")]
    Parse {
        /// The file being parsed.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: toml::de::Error,
    },
    /// Neither the environment nor the file supplied admin credentials.
    #[error("admin credentials are required; set {}", missing.join(" and "))]
    MissingAdminCredentials {
        /// Variables that still need a value.
        missing: Vec<&'static str>,
    },
    /// An environment variable could not be parsed.
    #[error("{} = {:?} is invalid; expected {}", .0.name, .0.value, .0.expected)]
    InvalidEnv(InvalidEnvVar),
    /// A duration setting is not a humantime duration.
    #[error("invalid duration for {key}: {value:?}")]
    InvalidDuration {
        /// Dotted setting name, e.g. `websocket.ping_interval`.
        key: &'static str,
        /// The rejected value.
        value: String,
        /// Underlying parse failure.
        #[source]
        source: humantime::DurationError,
    },
    /// The values parse but cannot run together.
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    /// The dotenv file exists but is malformed.
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
