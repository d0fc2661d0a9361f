//! Durable key/value store holding the canonical proxy list
//!
//! The pool only needs sets, hashes and an atomic counter. `ProxyStore` is
//! that contract; `Keys` fixes the key layout on top of it:
//!
//! - `proxies`: set of known identities
//! - `proxy:<id>`: hash of attribute name to value
//! - `proxies_ids`: hash of `ip:port` to identity (dedup index)
//! - `proxies_next_id`: counter handing out identities

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;

/// Backend-agnostic store operations
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// List the members of a set
    async fn members(&self, set: &str) -> Result<Vec<String>>;

    /// Add a member to a set
    async fn add_to_set(&self, set: &str, member: &str) -> Result<()>;

    /// Fetch selected fields of a hash, in the requested order
    async fn get_fields(&self, hash: &str, fields: &[&str]) -> Result<Vec<Option<String>>>;

    /// Write several fields of a hash
    async fn set_fields(&self, hash: &str, fields: &BTreeMap<String, String>) -> Result<()>;

    /// Write one field of a hash
    async fn set_field(&self, hash: &str, field: &str, value: &str) -> Result<()>;

    /// Fetch one field of a hash
    async fn get_field(&self, hash: &str, field: &str) -> Result<Option<String>>;

    /// Atomically increment a counter and return the new value
    async fn increment(&self, counter: &str) -> Result<i64>;

    /// Backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Key layout, optionally prefixed by a namespace
#[derive(Debug, Clone, Default)]
pub struct Keys {
    namespace: String,
}

impl Keys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn proxies(&self) -> String {
        format!("{}proxies", self.namespace)
    }

    pub fn proxy(&self, id: i64) -> String {
        format!("{}proxy:{}", self.namespace, id)
    }

    pub fn proxies_ids(&self) -> String {
        format!("{}proxies_ids", self.namespace)
    }

    pub fn proxies_next_id(&self) -> String {
        format!("{}proxies_next_id", self.namespace)
    }
}
