use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use futures::{StreamExt, stream::BoxStream};
use serde_json::{Value, json};
use telemetry_core::{
    FilterCriteria, NewTelemetryRecord, RecordStore, TelemetryError, TelemetryRecord,
};

mod common;

use common::{
    ADMIN_PASS, ADMIN_USER, DASHBOARD_HTML, TestAppBuilder, admin_auth, basic, build_test_app,
};

async fn ingest(server: &TestServer, body: Value) -> Value {
    let response = server.post("/api/v1/telemetry").json(&body).await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

async fn seed(server: &TestServer) {
    for body in [
        json!({ "value": "temp=42", "arch": "arm64", "os": "linux" }),
        json!({ "value": "temp=42", "arch": "x86_64", "metadata": { "os": "windows" } }),
        json!({ "value": "temp=99", "arch": "arm64" }),
        json!({ "value": "Temp=42", "arch": "arm64", "os": "linux" }),
    ] {
        ingest(server, body).await;
    }
}

fn ids(body: &Value) -> Vec<i64> {
    body["records"]
        .as_array()
        .expect("records array")
        .iter()
        .map(|record| record["id"].as_i64().expect("numeric id"))
        .collect()
}

#[tokio::test]
async fn ingest_assigns_increasing_ids_and_broadcasts() -> Result<()> {
    let (server, _state, _tempdir) = build_test_app().await?.server()?;

    let first = ingest(&server, json!({ "value": "temp=42", "arch": "arm64" })).await;
    let second = ingest(&server, json!({ "value": "temp=43", "arch": "arm64" })).await;

    assert_eq!(first["broadcast"], true);
    assert!(second["id"].as_i64() > first["id"].as_i64());
    Ok(())
}

#[tokio::test]
async fn ingest_rejects_invalid_submissions() -> Result<()> {
    let (server, state, _tempdir) = build_test_app().await?.server()?;

    let missing_arch = server
        .post("/api/v1/telemetry")
        .json(&json!({ "value": "temp=42" }))
        .await;
    missing_arch.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = missing_arch.json();
    assert_eq!(body["error"]["status"], 400);

    let malformed = server.post("/api/v1/telemetry").text("{not json").await;
    malformed.assert_status(StatusCode::BAD_REQUEST);

    let nested = server
        .post("/api/v1/telemetry")
        .json(&json!({ "value": "v", "arch": "a", "nested": { "x": 1 } }))
        .await;
    nested.assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(state.store.count().await?, 0);
    assert_eq!(state.hub.stats().await?.published, 0);
    Ok(())
}

#[tokio::test]
async fn query_filters_by_exact_match_in_insertion_order() -> Result<()> {
    let (server, _state, _tempdir) = build_test_app().await?.server()?;
    seed(&server).await;

    let response = server
        .get("/api/v1/telemetry")
        .add_query_param("value", "temp=42")
        .add_header("Authorization", admin_auth())
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(ids(&body), vec![1, 2]);
    assert_eq!(body["count"], 2);
    assert_eq!(body["truncated"], false);

    let response = server
        .get("/api/v1/telemetry")
        .add_query_param("value", "temp=42")
        .add_query_param("arch", "arm64")
        .add_header("Authorization", admin_auth())
        .await;
    assert_eq!(ids(&response.json()), vec![1]);

    let response = server
        .get("/api/v1/telemetry")
        .add_query_param("os", "linux")
        .add_header("Authorization", admin_auth())
        .await;
    assert_eq!(ids(&response.json()), vec![1, 4]);

    // An empty value places no constraint.
    let response = server
        .get("/api/v1/telemetry")
        .add_query_param("arch", "")
        .add_header("Authorization", admin_auth())
        .await;
    assert_eq!(ids(&response.json()), vec![1, 2, 3, 4]);
    Ok(())
}

#[tokio::test]
async fn query_rejects_unknown_and_conflicting_attributes() -> Result<()> {
    let (server, _state, _tempdir) = build_test_app().await?.server()?;
    seed(&server).await;

    let unknown = server
        .get("/api/v1/telemetry")
        .add_query_param("hostname", "box-1")
        .add_header("Authorization", admin_auth())
        .await;
    unknown.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = unknown.json();
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap_or_default()
            .contains("hostname")
    );

    let conflicting = server
        .get("/api/v1/telemetry")
        .add_query_param("arch", "arm64")
        .add_query_param("arch", "x86_64")
        .add_header("Authorization", admin_auth())
        .await;
    conflicting.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn query_limit_truncates_the_oldest_first_results() -> Result<()> {
    let (server, _state, _tempdir) = build_test_app().await?.server()?;
    seed(&server).await;

    let response = server
        .get("/api/v1/telemetry")
        .add_query_param("limit", "2")
        .add_header("Authorization", admin_auth())
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(ids(&body), vec![1, 2]);
    assert_eq!(body["truncated"], true);

    let bad = server
        .get("/api/v1/telemetry")
        .add_query_param("limit", "zero")
        .add_header("Authorization", admin_auth())
        .await;
    bad.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn admin_routes_require_basic_credentials() -> Result<()> {
    let (server, _state, _tempdir) = build_test_app().await?.server()?;

    for path in ["/api/v1/telemetry", "/api/v1/telemetry/stats", "/", "/dashboard"] {
        let response = server.get(path).await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.header("www-authenticate"),
            r#"Basic realm="telemetry""#
        );
    }

    let wrong_password = server
        .get("/api/v1/telemetry")
        .add_header("Authorization", basic(ADMIN_USER, "not-the-password"))
        .await;
    wrong_password.assert_status(StatusCode::UNAUTHORIZED);

    let wrong_user = server
        .get("/api/v1/telemetry")
        .add_header("Authorization", basic("operator", ADMIN_PASS))
        .await;
    wrong_user.assert_status(StatusCode::UNAUTHORIZED);

    // Agents never need credentials.
    server
        .post("/api/v1/telemetry")
        .json(&json!({ "value": "temp=42", "arch": "arm64" }))
        .await
        .assert_status(StatusCode::CREATED);
    Ok(())
}

#[tokio::test]
async fn stats_report_store_and_hub_counters() -> Result<()> {
    let (server, _state, _tempdir) = build_test_app().await?.server()?;
    seed(&server).await;

    let response = server
        .get("/api/v1/telemetry/stats")
        .add_header("Authorization", admin_auth())
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["records"], 4);
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["hub"]["published"], 4);
    assert_eq!(body["hub"]["last_sequence"], 4);
    assert_eq!(body["hub"]["sessions"], 0);
    Ok(())
}

#[tokio::test]
async fn dashboard_is_served_or_replaced_by_placeholder() -> Result<()> {
    let (server, _state, _tempdir) = build_test_app().await?.server()?;
    let response = server
        .get("/dashboard")
        .add_header("Authorization", admin_auth())
        .await;
    response.assert_status_ok();
    assert_eq!(response.text(), DASHBOARD_HTML);

    let (server, state, _tempdir) = TestAppBuilder::default()
        .without_dashboard()
        .build()
        .await?
        .server()?;
    assert!(state.dashboard.is_placeholder());
    let response = server.get("/").add_header("Authorization", admin_auth()).await;
    response.assert_status_ok();
    assert!(response.text().contains("Dashboard template not found"));
    Ok(())
}

#[tokio::test]
async fn probes_are_public() -> Result<()> {
    let (server, state, _tempdir) = build_test_app().await?.server()?;

    server.get("/ping").await.assert_status_ok();

    let health = server.get("/health").await;
    health.assert_status_ok();
    let body: Value = health.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["store"]["backend"], "memory");

    state.hub.stop().await;
    let health = server.get("/health").await;
    health.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = health.json();
    assert_eq!(body["checks"]["hub"]["status"], "unhealthy");
    Ok(())
}

#[tokio::test]
async fn stored_record_is_kept_when_hub_is_stopped() -> Result<()> {
    let (server, state, _tempdir) = build_test_app().await?.server()?;
    state.hub.stop().await;

    let body = ingest(&server, json!({ "value": "temp=42", "arch": "arm64" })).await;
    assert_eq!(body["broadcast"], false);
    assert_eq!(state.store.count().await?, 1);
    Ok(())
}

#[derive(Debug)]
struct UnavailableStore;

#[async_trait]
impl RecordStore for UnavailableStore {
    async fn insert(&self, _record: NewTelemetryRecord) -> telemetry_core::Result<TelemetryRecord> {
        Err(TelemetryError::StoreUnavailable("connection refused".into()))
    }

    fn scan(&self, _criteria: FilterCriteria) -> BoxStream<'_, telemetry_core::Result<TelemetryRecord>> {
        futures::stream::once(async {
            Err(TelemetryError::StoreUnavailable("connection refused".into()))
        })
        .boxed()
    }

    async fn count(&self) -> telemetry_core::Result<u64> {
        Err(TelemetryError::StoreUnavailable("connection refused".into()))
    }

    async fn ping(&self) -> telemetry_core::Result<()> {
        Err(TelemetryError::StoreUnavailable("connection refused".into()))
    }

    fn backend(&self) -> &'static str {
        "unavailable"
    }
}

#[tokio::test]
async fn store_failure_returns_unavailable_and_publishes_nothing() -> Result<()> {
    let (server, state, _tempdir) = TestAppBuilder::default()
        .store(Arc::new(UnavailableStore))
        .build()
        .await?
        .server()?;

    let response = server
        .post("/api/v1/telemetry")
        .json(&json!({ "value": "temp=42", "arch": "arm64" }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(state.hub.stats().await?.published, 0);

    let query = server
        .get("/api/v1/telemetry")
        .add_header("Authorization", admin_auth())
        .await;
    query.assert_status(StatusCode::SERVICE_UNAVAILABLE);

    server
        .get("/health")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}
