use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use serde::Serialize;
use serde_json::Value;
use telemetry_core::{TelemetrySubmission, model::RecordId};
use tracing::{debug, error, warn};

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

/// Body of a 201 reply.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Id the store assigned.
    pub id: RecordId,
    /// False when the record was stored but the hub refused it, so live
    /// viewers will not see it until they query history.
    pub broadcast: bool,
}

/// Accept one agent submission: validate, store, then hand it to the hub.
///
/// Nothing is published unless the store write succeeded.
pub async fn ingest_telemetry_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<IngestResponse>)> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|err| AppError::bad_request(format!("Malformed JSON body: {err}")))?;
    let new_record = TelemetrySubmission::from_json(body)?.validate()?;

    let record = state.store.insert(new_record).await.map_err(|err| {
        error!(error = %err, backend = state.store.backend(), "failed to store telemetry");
        AppError::from(err)
    })?;
    let id = record.id;

    let broadcast = match state.hub.publish(record).await {
        Ok(()) => true,
        Err(err) => {
            warn!(record_id = id, error = %err, "stored telemetry was not broadcast");
            false
        }
    };

    debug!(record_id = id, broadcast, "telemetry ingested");
    Ok((StatusCode::CREATED, Json(IngestResponse { id, broadcast })))
}
