use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use axum_test::TestServer;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use telemetry_config::{ConfigLoader, EnvConfig};
use telemetry_core::{BroadcastHub, HubConfig, InMemoryRecordStore, RecordStore};
use telemetry_server::{AppState, create_app, infra::startup::load_dashboard};
use tempfile::TempDir;

#[allow(unused)]
pub const ADMIN_USER: &str = "admin";
#[allow(unused)]
pub const ADMIN_PASS: &str = "integration-secret-42";
#[allow(unused)]
pub const DASHBOARD_HTML: &str = "<html><body>telemetry dashboard</body></html>";

// Code is used by test modules, but not in this scope
#[allow(unused)]
#[derive(Debug)]
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _tempdir: TempDir,
}

#[allow(unused)]
impl TestApp {
    pub fn into_parts(self) -> (Router, AppState, TempDir) {
        (self.router, self.state, self._tempdir)
    }

    /// Serve over a real HTTP transport so WebSocket upgrades work.
    pub fn server(self) -> Result<(TestServer, AppState, TempDir)> {
        let (router, state, tempdir) = self.into_parts();
        let server = TestServer::builder()
            .http_transport()
            .build(router.into_make_service())
            .map_err(|err| anyhow::anyhow!(err.to_string()))?;
        Ok((server, state, tempdir))
    }
}

#[allow(unused)]
#[derive(Debug)]
pub struct TestAppBuilder {
    hub: HubConfig,
    metadata_keys: Vec<String>,
    store: Option<Arc<dyn RecordStore>>,
    write_dashboard: bool,
    websocket: Option<(String, String)>,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            metadata_keys: vec!["os".to_string()],
            store: None,
            write_dashboard: true,
            websocket: None,
        }
    }
}

#[allow(unused)]
impl TestAppBuilder {
    pub fn hub(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }

    pub fn metadata_keys(mut self, keys: &[&str]) -> Self {
        self.metadata_keys = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn without_dashboard(mut self) -> Self {
        self.write_dashboard = false;
        self
    }

    /// Live channel keepalive, as humantime strings ("50ms", "2s").
    pub fn websocket(mut self, ping_interval: &str, idle_timeout: &str) -> Self {
        self.websocket = Some((ping_interval.to_string(), idle_timeout.to_string()));
        self
    }

    pub async fn build(self) -> Result<TestApp> {
        let tempdir = tempfile::tempdir().context("create tempdir")?;
        let dashboard_path = tempdir.path().join("index.html");
        if self.write_dashboard {
            fs::write(&dashboard_path, DASHBOARD_HTML).context("write dashboard asset")?;
        }

        let (ws_ping_interval, ws_idle_timeout) = self.websocket.unzip();
        let env = EnvConfig {
            admin_user: Some(ADMIN_USER.to_string()),
            admin_pass: Some(ADMIN_PASS.to_string()),
            dashboard_path: Some(dashboard_path.clone()),
            hub_inbound_capacity: Some(self.hub.inbound_capacity),
            hub_session_queue: Some(self.hub.session_queue_capacity),
            hub_max_sessions: Some(self.hub.max_sessions),
            hub_publish_policy: Some(self.hub.publish_policy),
            filter_metadata_keys: Some(self.metadata_keys),
            ws_ping_interval,
            ws_idle_timeout,
            ..EnvConfig::default()
        };
        let config = ConfigLoader::new()
            .load_with_env(env)
            .context("load test configuration")?
            .config;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryRecordStore::new()));
        let dashboard = load_dashboard(&config.dashboard.path);
        let hub = BroadcastHub::start(config.hub.clone());
        let state = AppState::new(Arc::new(config), store, hub, dashboard)?;
        let router = create_app(state.clone());

        Ok(TestApp {
            router,
            state,
            _tempdir: tempdir,
        })
    }
}

#[allow(unused)]
pub async fn build_test_app() -> Result<TestApp> {
    TestAppBuilder::default().build().await
}

#[allow(unused)]
pub fn basic(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

#[allow(unused)]
pub fn admin_auth() -> String {
    basic(ADMIN_USER, ADMIN_PASS)
}
