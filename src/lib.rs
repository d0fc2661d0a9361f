//! Rotator - Forward Proxy Rotator
//!
//! Accepts client connections and forwards each one through an upstream
//! HTTP/HTTPS proxy picked at random from a managed pool.
//!
//! ## Features
//!
//! - Candidate ingestion from JSON sources, keeping only elite http/https proxies
//! - Durable proxy list in PostgreSQL (or in memory for local runs)
//! - Lock-free selection from an atomically swapped serving set
//! - HTTP forwarding and CONNECT tunnels through the selected upstream
//! - Admin API to inspect the pool and trigger ingest or reload

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod pool;
pub mod proxy;
pub mod store;

pub use config::Config;
pub use database::Database;
pub use error::{Result, RotatorError};
pub use pool::PoolManager;
