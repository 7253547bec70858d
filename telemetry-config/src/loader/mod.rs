//! Layered configuration loading.

/// Errors raised while loading configuration
pub mod error;

use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use telemetry_core::HubConfig;

use crate::{
    models::{
        AdminCredentials, Config, ConfigMetadata, DEFAULT_DASHBOARD_PATH,
        DEFAULT_DB_MAX_CONNECTIONS, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_QUERY_MAX_RESULTS,
        DEFAULT_WS_IDLE_TIMEOUT, DEFAULT_WS_PING_INTERVAL, DashboardConfig, DatabaseConfig,
        FilterConfig, QueryConfig, ServerConfig, WebSocketConfig,
        sources::{EnvConfig, FileAdminConfig, FileConfig, FileDatabaseConfig},
    },
    util::parse_duration,
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

pub use error::ConfigLoadError;

const DATABASE_ENV_VARS: [&str; 2] = ["DATABASE_URL", "DB_MAX_CONNECTIONS"];

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("telemetry.toml"),
        PathBuf::from("config/telemetry.toml"),
    ]
});

/// A loaded configuration and the warnings raised while building it.
#[derive(Debug)]
pub struct ConfigLoad {
    /// The resolved configuration.
    pub config: Config,
    /// Soft findings; log them once tracing is installed.
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Default, Clone)]
struct LoaderOptions {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

/// Builds a [`Config`] from defaults, an optional TOML file and the
/// environment, in increasing order of precedence.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// A loader that searches the default file locations and `./.env`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read this TOML file instead of searching; it must exist.
    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Read this dotenv file instead of `./.env`. A missing file is skipped.
    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Load `.env`, then read the process environment.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;
        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Build the configuration against an explicit environment snapshot.
    pub fn load_with_env(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        if let Some(invalid) = env.invalid.first() {
            return Err(ConfigLoadError::InvalidEnv(invalid.clone()));
        }

        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) = self.compose_config(file_config, env, config_path)?;
        Ok(ConfigLoad { config, warnings })
    }

    /// Resolve only the database section, for maintenance commands that
    /// never serve traffic. Admin credentials and the other sections are
    /// not consulted.
    pub fn load_database(&self) -> Result<DatabaseConfig, ConfigLoadError> {
        self.load_env_file()?;
        self.database_with_env(EnvConfig::gather())
    }

    /// [`ConfigLoader::load_database`] against an explicit environment
    /// snapshot.
    pub fn database_with_env(&self, env: EnvConfig) -> Result<DatabaseConfig, ConfigLoadError> {
        if let Some(invalid) = env
            .invalid
            .iter()
            .find(|invalid| DATABASE_ENV_VARS.contains(&invalid.name))
        {
            return Err(ConfigLoadError::InvalidEnv(invalid.clone()));
        }

        let (file_config, _) = self.load_file_config(&env)?;
        let file_database = file_config.unwrap_or_default().database;
        let database = resolve_database(&env, file_database);
        if database.max_connections == 0 {
            return Err(ConfigGuardRailError::ZeroCapacity {
                field: "database.max_connections",
            }
            .into());
        }
        Ok(database)
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        match loaded {
            Ok(loaded) => Ok(loaded),
            Err(dotenvy::Error::Io(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path });
                }
                path
            }
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => path.clone(),
                None => return Ok((None, None)),
            },
        };

        let file_config = read_file_config(&path)?;
        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if config_path.is_none() {
            warnings.push_with_hint(
                "No telemetry.toml detected; using environment variables and defaults",
                "Create telemetry.toml or set TELEMETRY_CONFIG to tune the hub and filters",
            );
        }

        let FileConfig {
            server: file_server,
            database: file_database,
            admin: file_admin,
            dashboard: file_dashboard,
            hub: file_hub,
            filter: file_filter,
            query: file_query,
            websocket: file_websocket,
        } = file_config.unwrap_or_default();

        let database = resolve_database(&env, file_database);
        let admin = resolve_admin(env.admin_user, env.admin_pass, file_admin)?;

        let server = ServerConfig {
            host: env
                .server_host
                .or(file_server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: env.server_port.or(file_server.port).unwrap_or(DEFAULT_PORT),
        };

        let dashboard = DashboardConfig {
            path: env
                .dashboard_path
                .or(file_dashboard.path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DASHBOARD_PATH)),
        };

        let defaults = HubConfig::default();
        let hub = HubConfig {
            inbound_capacity: env
                .hub_inbound_capacity
                .or(file_hub.inbound_capacity)
                .unwrap_or(defaults.inbound_capacity),
            session_queue_capacity: env
                .hub_session_queue
                .or(file_hub.session_queue_capacity)
                .unwrap_or(defaults.session_queue_capacity),
            max_sessions: env
                .hub_max_sessions
                .or(file_hub.max_sessions)
                .unwrap_or(defaults.max_sessions),
            publish_policy: env
                .hub_publish_policy
                .or(file_hub.publish_policy)
                .unwrap_or(defaults.publish_policy),
        };

        let filter = FilterConfig {
            metadata_keys: env
                .filter_metadata_keys
                .or(file_filter.metadata_keys)
                .unwrap_or_default(),
        };

        let query = QueryConfig {
            max_results: env
                .query_max_results
                .or(file_query.max_results)
                .unwrap_or(DEFAULT_QUERY_MAX_RESULTS),
        };

        let websocket = WebSocketConfig {
            ping_interval: resolve_duration(
                "websocket.ping_interval",
                env.ws_ping_interval.or(file_websocket.ping_interval),
                DEFAULT_WS_PING_INTERVAL,
            )?,
            idle_timeout: resolve_duration(
                "websocket.idle_timeout",
                env.ws_idle_timeout.or(file_websocket.idle_timeout),
                DEFAULT_WS_IDLE_TIMEOUT,
            )?,
        };

        let config = Config {
            server,
            database,
            admin,
            dashboard,
            hub,
            filter,
            query,
            websocket,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded: false,
            },
        };

        let guard_warnings = validation::apply_guard_rails(&config)?;
        warnings.extend(guard_warnings);

        Ok((config, warnings))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_database(env: &EnvConfig, file: FileDatabaseConfig) -> DatabaseConfig {
    DatabaseConfig {
        url: env
            .database_url
            .clone()
            .or(file.url)
            .filter(|url| !url.trim().is_empty()),
        max_connections: env
            .database_max_connections
            .or(file.max_connections)
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
    }
}

/// Environment wins over the file; blank values count as missing.
fn resolve_admin(
    env_user: Option<String>,
    env_pass: Option<String>,
    file: FileAdminConfig,
) -> Result<AdminCredentials, ConfigLoadError> {
    let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
    let username = present(env_user).or_else(|| present(file.username));
    let password = present(env_pass).or_else(|| present(file.password));

    match (username, password) {
        (Some(username), Some(password)) => Ok(AdminCredentials { username, password }),
        (username, password) => {
            let mut missing = Vec::new();
            if username.is_none() {
                missing.push("TELEMETRY_ADMIN_USER");
            }
            if password.is_none() {
                missing.push("TELEMETRY_ADMIN_PASS");
            }
            Err(ConfigLoadError::MissingAdminCredentials { missing })
        }
    }
}

fn resolve_duration(
    key: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match raw {
        Some(value) => parse_duration(&value).map_err(|source| ConfigLoadError::InvalidDuration {
            key,
            value,
            source,
        }),
        None => Ok(default),
    }
}
