//! In-process store backend

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::ProxyStore;
use crate::error::Result;

/// Store kept entirely in memory. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sets: DashMap<String, BTreeSet<String>>,
    hashes: DashMap<String, HashMap<String, String>>,
    counters: DashMap<String, i64>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating operations served so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Current value of a counter, 0 if never incremented
    pub fn counter(&self, key: &str) -> i64 {
        self.counters.get(key).map(|v| *v).unwrap_or(0)
    }

    /// Copy of a hash
    pub fn hash(&self, key: &str) -> Option<HashMap<String, String>> {
        self.hashes.get(key).map(|h| h.clone())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl ProxyStore for MemoryStore {
    async fn members(&self, set: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_to_set(&self, set: &str, member: &str) -> Result<()> {
        self.record_write();
        self.sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn get_fields(&self, hash: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let stored = self.hashes.get(hash);
        Ok(fields
            .iter()
            .map(|f| stored.as_ref().and_then(|h| h.get(*f).cloned()))
            .collect())
    }

    async fn set_fields(&self, hash: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        self.record_write();
        let mut entry = self.hashes.entry(hash.to_string()).or_default();
        for (field, value) in fields {
            entry.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn set_field(&self, hash: &str, field: &str, value: &str) -> Result<()> {
        self.record_write();
        self.hashes
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn get_field(&self, hash: &str, field: &str) -> Result<Option<String>> {
        Ok(self.hashes.get(hash).and_then(|h| h.get(field).cloned()))
    }

    async fn increment(&self, counter: &str) -> Result<i64> {
        self.record_write();
        let mut value = self.counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
