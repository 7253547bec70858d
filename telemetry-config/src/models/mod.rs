/// Raw values read from the TOML file and the environment
pub mod sources;

use std::{fmt, path::PathBuf, time::Duration};

use telemetry_core::{AttributeWhitelist, HubConfig};

/// Used when neither `PORT` nor the file sets one.
pub const DEFAULT_PORT: u16 = 8080;
/// Listen on every interface.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// PostgreSQL pool size.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
/// Relative to the working directory.
pub const DEFAULT_DASHBOARD_PATH: &str = "dashboard/index.html";
/// Cap on one history query.
pub const DEFAULT_QUERY_MAX_RESULTS: usize = 10_000;
/// Server ping cadence on the live channel.
pub const DEFAULT_WS_PING_INTERVAL: Duration = Duration::from_secs(30);
/// Must exceed the ping interval.
pub const DEFAULT_WS_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// The fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener address.
    pub server: ServerConfig,
    /// Record store selection.
    pub database: DatabaseConfig,
    /// Dashboard operator account.
    pub admin: AdminCredentials,
    /// Dashboard page location.
    pub dashboard: DashboardConfig,
    /// Broadcast hub sizing.
    pub hub: HubConfig,
    /// Filter whitelist.
    pub filter: FilterConfig,
    /// History query limits.
    pub query: QueryConfig,
    /// Live channel keepalive.
    pub websocket: WebSocketConfig,
    /// Where the values came from.
    pub metadata: ConfigMetadata,
}

/// Listener address.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl ServerConfig {
    /// `host:port` for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Record store selection.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `None` selects the in-memory record store.
    pub url: Option<String>,
    /// PostgreSQL pool size.
    pub max_connections: u32,
}

/// The single admin account allowed to read telemetry.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    /// Expected Basic user name.
    pub username: String,
    /// Expected Basic password. Redacted from `Debug`.
    pub password: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Dashboard page location.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// HTML file read once at startup.
    pub path: PathBuf,
}

/// Filter whitelist settings.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    /// Metadata keys viewers may filter on in addition to `value` and `arch`.
    pub metadata_keys: Vec<String>,
}

impl FilterConfig {
    /// The whitelist these settings describe.
    pub fn whitelist(&self) -> telemetry_core::Result<AttributeWhitelist> {
        AttributeWhitelist::with_metadata_keys(self.metadata_keys.iter().cloned())
    }
}

/// History query limits.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Most records one query returns.
    pub max_results: usize,
}

/// Live channel keepalive.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// How often each viewer is pinged.
    pub ping_interval: Duration,
    /// Silence after which a viewer is closed with code 1000.
    pub idle_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_WS_PING_INTERVAL,
            idle_timeout: DEFAULT_WS_IDLE_TIMEOUT,
        }
    }
}

/// Provenance of a loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    /// The TOML file that was read, if any.
    pub config_path: Option<PathBuf>,
    /// Whether a dotenv file was applied.
    pub env_file_loaded: bool,
}
