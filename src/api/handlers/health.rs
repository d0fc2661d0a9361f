//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rotator"
        })),
    )
}

/// Serving set size, last reload time and process uptime
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.manager.snapshot();

    Json(json!({
        "serving": snapshot.records.len(),
        "last_reload": snapshot.loaded_at,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "store": state.manager.store_backend(),
    }))
}
