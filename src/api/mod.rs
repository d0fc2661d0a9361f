//! Admin API
//!
//! HTTP endpoints for inspecting the serving set and triggering ingest and
//! reload without restarting the process.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
