use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use telemetry_config::DatabaseConfig;
use telemetry_core::{InMemoryRecordStore, PostgresRecordStore, RecordStore};
use tracing::{info, warn};

/// Served when the dashboard page cannot be read at startup.
pub const PLACEHOLDER_DASHBOARD: &str =
    "<html><body><h1>Dashboard template not found</h1></body></html>";

/// Where the served dashboard page came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardSource {
    /// Read from this file.
    File(PathBuf),
    /// The file was unavailable.
    Placeholder,
}

/// The dashboard page, read once at startup.
#[derive(Debug, Clone)]
pub struct DashboardAsset {
    /// Page body.
    pub html: String,
    /// Where `html` came from.
    pub source: DashboardSource,
}

impl DashboardAsset {
    /// The built-in stand-in page.
    pub fn placeholder() -> Self {
        Self {
            html: PLACEHOLDER_DASHBOARD.to_string(),
            source: DashboardSource::Placeholder,
        }
    }

    /// True when the configured file could not be read.
    pub fn is_placeholder(&self) -> bool {
        self.source == DashboardSource::Placeholder
    }
}

/// Read the dashboard page. A missing or unreadable file is logged and
/// replaced by a placeholder page; it never stops the server.
pub fn load_dashboard(path: &Path) -> DashboardAsset {
    match fs::read_to_string(path) {
        Ok(html) => {
            info!(path = %path.display(), bytes = html.len(), "Loaded dashboard asset");
            DashboardAsset {
                html,
                source: DashboardSource::File(path.to_path_buf()),
            }
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "Dashboard asset unavailable; serving placeholder page"
            );
            DashboardAsset::placeholder()
        }
    }
}

/// Connect the configured record store. An unreachable database is fatal.
pub async fn connect_store(database: &DatabaseConfig) -> Result<Arc<dyn RecordStore>> {
    let Some(url) = database.url.as_deref() else {
        warn!("No database configured; using the in-memory record store");
        return Ok(Arc::new(InMemoryRecordStore::new()));
    };

    let store = PostgresRecordStore::connect(url, database.max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    store
        .migrate()
        .await
        .context("failed to apply telemetry migrations")?;
    store
        .ping()
        .await
        .context("PostgreSQL did not answer after migrations")?;

    Ok(Arc::new(store))
}
