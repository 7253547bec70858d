//! Shared configuration library for the telemetry service.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file
//! (`--config`, `TELEMETRY_CONFIG`, `telemetry.toml` or
//! `config/telemetry.toml`), then environment variables (with `.env` support).
//! Guard rails reject combinations that cannot run and collect softer
//! findings as [`ConfigWarnings`].

pub mod loader;
/// Resolved configuration types and their raw sources
pub mod models;
/// Parsing helpers for environment values
pub mod util;
/// Guard rails and configuration warnings
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, error::ConfigLoadError};
pub use models::sources::EnvConfig;
pub use models::{
    AdminCredentials, Config, ConfigMetadata, DashboardConfig, DatabaseConfig, FilterConfig,
    QueryConfig, ServerConfig, WebSocketConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
