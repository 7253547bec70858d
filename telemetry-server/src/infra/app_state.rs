use std::{fmt, sync::Arc};

use telemetry_config::Config;
use telemetry_core::{AttributeWhitelist, HubHandle, RecordStore};

use crate::infra::startup::DashboardAsset;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Resolved configuration.
    pub config: Arc<Config>,
    /// Where records are persisted.
    pub store: Arc<dyn RecordStore>,
    /// Live fan-out to viewers.
    pub hub: HubHandle,
    /// Attributes callers may filter on.
    pub whitelist: Arc<AttributeWhitelist>,
    /// The dashboard page read at startup.
    pub dashboard: Arc<DashboardAsset>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store.backend())
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Assemble the shared state. Fails when the configured filter
    /// whitelist is unusable.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn RecordStore>,
        hub: HubHandle,
        dashboard: DashboardAsset,
    ) -> telemetry_core::Result<Self> {
        let whitelist = config.filter.whitelist()?;
        Ok(Self {
            config,
            store,
            hub,
            whitelist: Arc::new(whitelist),
            dashboard: Arc::new(dashboard),
        })
    }

    /// Resolved configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}
