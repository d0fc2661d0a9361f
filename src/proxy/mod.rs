//! Forwarding proxy
//!
//! This module provides the client-facing side of the rotator:
//! - absolute-form HTTP forwarding through an upstream proxy
//! - CONNECT tunnels for HTTPS
//!
//! Every request asks the pool for one upstream via `ProxySelector`.

pub mod handler;
pub mod server;
pub mod transport;
pub mod tunnel;

pub use handler::{ProxyHandler, ProxyHandlerConfig};
pub use server::ProxyServer;
pub use transport::ProxyTransport;
pub use tunnel::TunnelHandler;
