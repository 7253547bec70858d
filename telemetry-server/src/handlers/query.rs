use axum::{
    Json,
    extract::{Query, State},
};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use telemetry_core::{TelemetryRecord, build_criteria, filter};

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

/// Query parameter that bounds the result size instead of filtering.
pub const LIMIT_PARAM: &str = "limit";

/// Body of a history query reply.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    /// Matching records in insertion order.
    pub records: Vec<TelemetryRecord>,
    /// Length of `records`.
    pub count: usize,
    /// More records matched than were returned.
    pub truncated: bool,
}

/// History query over the stored records, filtered by whitelisted attributes.
pub async fn query_telemetry_handler(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<QueryResponse>> {
    let max_results = state.config.query.max_results;
    let (limits, pairs): (Vec<_>, Vec<_>) = params
        .into_iter()
        .partition(|(name, _)| name == LIMIT_PARAM);
    let limit = resolve_limit(limits.last().map(|(_, raw)| raw.as_str()), max_results)?;

    let criteria = build_criteria(&state.whitelist, pairs)?;
    let mut records: Vec<TelemetryRecord> = filter::apply(state.store.as_ref(), criteria)
        .take(limit.saturating_add(1))
        .try_collect()
        .await?;

    let truncated = records.len() > limit;
    records.truncate(limit);

    Ok(Json(QueryResponse {
        count: records.len(),
        records,
        truncated,
    }))
}

fn resolve_limit(raw: Option<&str>, max_results: usize) -> AppResult<usize> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(max_results),
        Some(raw) => match raw.parse::<usize>() {
            Ok(0) | Err(_) => Err(AppError::bad_request(format!(
                "`{LIMIT_PARAM}` must be a positive integer, got `{raw}`"
            ))),
            Ok(limit) => Ok(limit.min(max_results)),
        },
    }
}

/// Record count plus live hub counters.
pub async fn telemetry_stats_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let records = state.store.count().await?;
    let hub = state.hub.stats().await?;
    Ok(Json(json!({
        "records": records,
        "backend": state.store.backend(),
        "hub": hub,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn limit_defaults_to_and_is_capped_by_max() {
        assert_eq!(resolve_limit(None, 100).unwrap(), 100);
        assert_eq!(resolve_limit(Some(""), 100).unwrap(), 100);
        assert_eq!(resolve_limit(Some("5"), 100).unwrap(), 5);
        assert_eq!(resolve_limit(Some("500"), 100).unwrap(), 100);
    }

    #[test]
    fn limit_must_be_positive_integer() {
        for raw in ["0", "-1", "ten"] {
            let err = resolve_limit(Some(raw), 100).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
        }
    }
}
