//! Proxy pool management
//!
//! Candidates flow one way, from a `CandidateSource` into the store; the
//! serving set is rebuilt from the store and answers selection requests
//! without touching it.

pub mod candidate;
pub mod manager;
pub mod serving;

pub use candidate::{parse_candidates, CandidateSource, FileSource, JsonSource};
pub use manager::{IngestReport, PoolManager, PoolOptions};
pub use serving::{ServingSet, Snapshot};

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::models::ProxyRecord;

/// Where an inbound request wants to go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub host: String,
    pub port: u16,
}

impl RequestTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The one call a connection handler needs from the pool.
///
/// Implementations must not block: selection happens while a client waits
/// for its connection to be set up.
pub trait ProxySelector: Send + Sync {
    /// Select an upstream proxy for a request.
    ///
    /// Returns `PoolEmpty` if there is nothing to choose from.
    fn select(&self, target: Option<&RequestTarget>) -> Result<Arc<ProxyRecord>>;

    /// Number of records currently selectable
    fn available_count(&self) -> usize;
}
