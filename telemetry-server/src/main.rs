//! Telemetry server binary: loads configuration, connects the record store,
//! starts the broadcast hub and serves the gateways until ctrl-c.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use telemetry_config::{ConfigLoad, ConfigLoader};
use telemetry_core::{BroadcastHub, HubHandle, PostgresRecordStore};
use telemetry_server::{
    AppState, create_app,
    infra::startup::{connect_store, load_dashboard},
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "telemetry-server")]
#[command(about = "Telemetry ingestion with a live-updating admin dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env)
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit. Needs only DATABASE_URL.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = cli.serve.config.clone() {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = cli.serve.env_file.clone() {
        loader = loader.with_env_file(path);
    }

    match cli.command {
        Some(Command::Db(DbCommand::Migrate)) => {
            let database = loader
                .load_database()
                .context("failed to load database configuration")?;
            init_tracing();
            run_db_migrate(&database).await
        }
        None => {
            let ConfigLoad { mut config, warnings } =
                loader.load().context("failed to load configuration")?;
            init_tracing();

            if config.metadata.env_file_loaded {
                info!("loaded .env file");
            }
            if let Some(path) = config.metadata.config_path.as_ref() {
                info!(path = %path.display(), "configuration file loaded");
            }
            warnings.log();

            if let Some(port) = cli.serve.port {
                config.server.port = port;
            }
            if let Some(host) = cli.serve.host.clone() {
                config.server.host = host;
            }
            run_server(config).await
        }
    }
}

/// Installed after `.env` is read so `RUST_LOG` from it takes effect.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_db_migrate(database: &telemetry_config::DatabaseConfig) -> anyhow::Result<()> {
    let Some(url) = database.url.as_deref() else {
        bail!("DATABASE_URL must be set to run migrations");
    };
    let store = PostgresRecordStore::connect(url, database.max_connections)
        .await
        .context("failed to connect to PostgreSQL for migration")?;
    store.migrate().await.context("database migration failed")?;
    info!("Database migrations applied successfully");
    Ok(())
}

async fn run_server(config: telemetry_config::Config) -> anyhow::Result<()> {
    let store = connect_store(&config.database).await?;
    let dashboard = load_dashboard(&config.dashboard.path);
    let hub = BroadcastHub::start(config.hub.clone());

    let config = Arc::new(config);
    let state = AppState::new(Arc::clone(&config), store, hub.clone(), dashboard)
        .context("invalid filter configuration")?;
    let app = create_app(state);

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Telemetry server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub.clone()))
        .await
        .context("server error")?;

    hub.stop().await;
    info!("Telemetry server stopped");
    Ok(())
}

/// Resolves on ctrl-c after stopping the hub, so open live channels end and
/// graceful shutdown only waits for ordinary requests.
async fn shutdown_signal(hub: HubHandle) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c; shutting down");
    }
    info!("Shutdown signal received; closing live sessions");
    hub.stop().await;
}
