use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use telemetry_core::PublishPolicy;

use crate::util::parse_csv;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    /// `[server]`
    #[serde(default)]
    pub server: FileServerConfig,
    /// `[database]`
    #[serde(default)]
    pub database: FileDatabaseConfig,
    /// `[admin]`
    #[serde(default)]
    pub admin: FileAdminConfig,
    /// `[dashboard]`
    #[serde(default)]
    pub dashboard: FileDashboardConfig,
    /// `[hub]`
    #[serde(default)]
    pub hub: FileHubConfig,
    /// `[filter]`
    #[serde(default)]
    pub filter: FileFilterConfig,
    /// `[query]`
    #[serde(default)]
    pub query: FileQueryConfig,
    /// `[websocket]`
    #[serde(default)]
    pub websocket: FileWebSocketConfig,
}

/// `[server]` table.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    /// Bind host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Bind port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// `[database]` table.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    /// PostgreSQL URL; unset keeps records in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Pool size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

/// `[admin]` table. The environment takes precedence.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileAdminConfig {
    /// Admin user name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Admin password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// `[dashboard]` table.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDashboardConfig {
    /// HTML page served at `/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// `[hub]` table.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileHubConfig {
    /// See [`telemetry_core::HubConfig::inbound_capacity`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound_capacity: Option<usize>,
    /// See [`telemetry_core::HubConfig::session_queue_capacity`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_queue_capacity: Option<usize>,
    /// See [`telemetry_core::HubConfig::max_sessions`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,
    /// `block` or `fail-fast`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_policy: Option<PublishPolicy>,
}

/// `[filter]` table.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFilterConfig {
    /// Metadata keys added to the filter whitelist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_keys: Option<Vec<String>>,
}

/// `[query]` table.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileQueryConfig {
    /// Cap on records returned by one history query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

/// Durations are humantime strings (`"30s"`, `"2m"`).
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWebSocketConfig {
    /// How often the server pings each viewer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval: Option<String>,
    /// Silence after which a viewer is closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<String>,
}

/// An environment variable that was set but could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEnvVar {
    /// Variable name.
    pub name: &'static str,
    /// The raw value.
    pub value: String,
    /// What a valid value looks like.
    pub expected: &'static str,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    /// `TELEMETRY_CONFIG`
    pub config_path: Option<PathBuf>,
    /// `SERVER_HOST`
    pub server_host: Option<String>,
    /// `PORT`
    pub server_port: Option<u16>,
    /// `DATABASE_URL`
    pub database_url: Option<String>,
    /// `DB_MAX_CONNECTIONS`
    pub database_max_connections: Option<u32>,
    /// `TELEMETRY_ADMIN_USER`
    pub admin_user: Option<String>,
    /// `TELEMETRY_ADMIN_PASS`
    pub admin_pass: Option<String>,
    /// `TELEMETRY_DASHBOARD_PATH`
    pub dashboard_path: Option<PathBuf>,
    /// `TELEMETRY_HUB_INBOUND_CAPACITY`
    pub hub_inbound_capacity: Option<usize>,
    /// `TELEMETRY_HUB_SESSION_QUEUE`
    pub hub_session_queue: Option<usize>,
    /// `TELEMETRY_HUB_MAX_SESSIONS`
    pub hub_max_sessions: Option<usize>,
    /// `TELEMETRY_HUB_PUBLISH_POLICY`
    pub hub_publish_policy: Option<PublishPolicy>,
    /// `TELEMETRY_FILTER_METADATA_KEYS`, comma separated
    pub filter_metadata_keys: Option<Vec<String>>,
    /// `TELEMETRY_QUERY_MAX_RESULTS`
    pub query_max_results: Option<usize>,
    /// `TELEMETRY_WS_PING_INTERVAL`
    pub ws_ping_interval: Option<String>,
    /// `TELEMETRY_WS_IDLE_TIMEOUT`
    pub ws_idle_timeout: Option<String>,
    /// Variables that were set but did not parse.
    pub invalid: Vec<InvalidEnvVar>,
}

impl EnvConfig {
    /// Read the process environment.
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env_config = Self::default();
        let text = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        env_config.config_path = text("TELEMETRY_CONFIG").map(PathBuf::from);
        env_config.server_host = text("SERVER_HOST");
        env_config.server_port = env_config.parsed(&lookup, "PORT", "a port number");
        env_config.database_url = text("DATABASE_URL");
        env_config.database_max_connections =
            env_config.parsed(&lookup, "DB_MAX_CONNECTIONS", "a positive integer");
        env_config.admin_user = lookup("TELEMETRY_ADMIN_USER");
        env_config.admin_pass = lookup("TELEMETRY_ADMIN_PASS");
        env_config.dashboard_path = text("TELEMETRY_DASHBOARD_PATH").map(PathBuf::from);
        env_config.hub_inbound_capacity =
            env_config.parsed(&lookup, "TELEMETRY_HUB_INBOUND_CAPACITY", "a positive integer");
        env_config.hub_session_queue =
            env_config.parsed(&lookup, "TELEMETRY_HUB_SESSION_QUEUE", "a positive integer");
        env_config.hub_max_sessions =
            env_config.parsed(&lookup, "TELEMETRY_HUB_MAX_SESSIONS", "a positive integer");
        env_config.hub_publish_policy = env_config.parsed(
            &lookup,
            "TELEMETRY_HUB_PUBLISH_POLICY",
            "`block` or `fail-fast`",
        );
        env_config.filter_metadata_keys =
            lookup("TELEMETRY_FILTER_METADATA_KEYS").map(|raw| parse_csv(&raw));
        env_config.query_max_results =
            env_config.parsed(&lookup, "TELEMETRY_QUERY_MAX_RESULTS", "a positive integer");
        env_config.ws_ping_interval = text("TELEMETRY_WS_PING_INTERVAL");
        env_config.ws_idle_timeout = text("TELEMETRY_WS_IDLE_TIMEOUT");

        env_config
    }

    fn parsed<F, T>(&mut self, lookup: &F, name: &'static str, expected: &'static str) -> Option<T>
    where
        F: Fn(&str) -> Option<String>,
        T: std::str::FromStr,
    {
        let raw = lookup(name)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.invalid.push(InvalidEnvVar {
                    name,
                    value: raw,
                    expected,
                });
                None
            }
        }
    }
}
