//! API route definitions

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .nest("/api", pool_routes())
        .with_state(state)
}

/// Serving set inspection and pool maintenance
fn pool_routes() -> Router<AppState> {
    Router::new()
        .route("/proxies", get(handlers::pool::list_proxies))
        .route("/reload", post(handlers::pool::reload))
        .route("/ingest", post(handlers::pool::ingest_file))
        .route("/ingest/candidates", post(handlers::pool::ingest_candidates))
}
