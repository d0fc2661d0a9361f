//! Pool inspection and maintenance handlers

use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::RotatorError;
use crate::models::ProxyRecord;
use crate::pool::{FileSource, JsonSource};

/// Name reported for candidates posted directly to the API
const REQUEST_SOURCE: &str = "request body";

/// List the serving set
pub async fn list_proxies(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.manager.snapshot();
    let records: Vec<ProxyRecord> = snapshot.records.iter().map(|r| (**r).clone()).collect();

    Json(records)
}

/// Rebuild the serving set from the store
pub async fn reload(State(state): State<AppState>) -> Result<impl IntoResponse, RotatorError> {
    let serving = state.manager.reload().await?;
    info!(serving, "Serving set reloaded via API");

    Ok(Json(json!({ "serving": serving })))
}

/// Ingest the configured candidate file
pub async fn ingest_file(State(state): State<AppState>) -> Result<impl IntoResponse, RotatorError> {
    let source = FileSource::new(&state.config.pool.candidate_file);
    let report = state.manager.ingest(&source).await?;

    Ok(Json(report))
}

/// Ingest a candidate array sent as the request body
pub async fn ingest_candidates(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, RotatorError> {
    let source = JsonSource::new(REQUEST_SOURCE, body);
    let report = state.manager.ingest(&source).await?;

    Ok(Json(report))
}
