//! Pool manager: ingestion, reload and selection
//!
//! Ingestion is a one-way merge from a candidate source into the store.
//! New eligible candidates are written in a fixed order (identity, attributes,
//! membership, index) so an interrupted write never leaves a membership or
//! index entry pointing at attributes that were not stored, and an identity
//! is never handed out twice. Every ingest ends with a full reload.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::candidate::CandidateSource;
use super::serving::{ServingSet, Snapshot};
use super::{ProxySelector, RequestTarget};
use crate::config::StoreConfig;
use crate::error::{Result, RotatorError};
use crate::models::{Attributes, ProxyRecord, STORED_FIELDS};
use crate::store::{Keys, ProxyStore};

/// Identities loaded and resolved concurrently during a reload
const RELOAD_CONCURRENCY: usize = 16;

/// Pool manager options
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Prefix for every store key
    pub namespace: String,
    /// Bound on each store operation and address lookup during ingest/reload
    pub op_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            op_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&StoreConfig> for PoolOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            op_timeout: config.op_timeout(),
        }
    }
}

/// Outcome of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Name of the candidate source
    pub source: String,
    /// Candidates read from the source
    pub candidates: usize,
    /// Not elite or not http/https
    pub ineligible: usize,
    /// Address already indexed in the store
    pub existing: usize,
    /// Newly persisted
    pub added: usize,
    /// Store failure while checking or writing
    pub failed: usize,
    /// Serving set size after the closing reload
    pub serving: usize,
}

/// Owns the store handle and the serving set
pub struct PoolManager {
    store: Arc<dyn ProxyStore>,
    keys: Keys,
    serving: ServingSet,
    /// Serializes ingest and reload against each other
    refresh_lock: Mutex<()>,
    op_timeout: Duration,
}

impl PoolManager {
    /// Create a manager and load the serving set from the store.
    ///
    /// Fails if the store's member set cannot be listed.
    pub async fn initialize(store: Arc<dyn ProxyStore>, options: PoolOptions) -> Result<Self> {
        let manager = Self {
            store,
            keys: Keys::new(options.namespace),
            serving: ServingSet::new(),
            refresh_lock: Mutex::new(()),
            op_timeout: options.op_timeout,
        };

        manager.reload().await?;
        Ok(manager)
    }

    /// Merge candidates from a source into the store, then reload.
    ///
    /// Reading or parsing the source fails the whole call before any write.
    /// A store failure for one candidate is logged and the batch continues.
    #[instrument(skip(self, source), fields(source = %source.name()))]
    pub async fn ingest(&self, source: &dyn CandidateSource) -> Result<IngestReport> {
        let _guard = self.refresh_lock.lock().await;

        let candidates = source.read().await.map_err(|e| {
            error!(error = %e, "Ingestion failed");
            e
        })?;

        let mut report = IngestReport {
            source: source.name(),
            candidates: candidates.len(),
            ..Default::default()
        };

        for attributes in candidates {
            let record = ProxyRecord::candidate(attributes);
            let address = record.address();

            if !record.is_eligible() {
                debug!(
                    address = %address,
                    protocol = record.protocol(),
                    anonymity = record.anonymity_level(),
                    "Skipping ineligible candidate"
                );
                report.ineligible += 1;
                continue;
            }

            match self.is_known(&address).await {
                Ok(true) => {
                    report.existing += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %RotatorError::skipped(&address, e), "Candidate skipped");
                    report.failed += 1;
                    continue;
                }
            }

            info!(
                address = %address,
                protocol = record.protocol(),
                anonymity = record.anonymity_level(),
                "Persisting new proxy"
            );

            match self.persist(&record).await {
                Ok(id) => {
                    debug!(id = id, address = %address, "Proxy persisted");
                    report.added += 1;
                }
                Err(e) => {
                    warn!(error = %RotatorError::skipped(&address, e), "Candidate skipped");
                    report.failed += 1;
                }
            }
        }

        report.serving = self.reload_locked().await?;

        info!(
            candidates = report.candidates,
            added = report.added,
            existing = report.existing,
            ineligible = report.ineligible,
            failed = report.failed,
            serving = report.serving,
            "Ingestion complete"
        );

        Ok(report)
    }

    /// Rebuild the serving set from the store.
    ///
    /// Identities that cannot be fetched or resolved are left out. Returns
    /// the size of the new serving set.
    pub async fn reload(&self) -> Result<usize> {
        let _guard = self.refresh_lock.lock().await;
        self.reload_locked().await
    }

    /// Pick a proxy uniformly at random from the current serving set
    pub fn select(&self) -> Result<Arc<ProxyRecord>> {
        self.serving.choose()
    }

    /// Current serving set
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.serving.snapshot()
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend_name()
    }

    #[instrument(skip(self), fields(backend = self.store.backend_name()))]
    async fn reload_locked(&self) -> Result<usize> {
        let members = self
            .timed(self.store.members(&self.keys.proxies()))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to list stored proxies");
                e
            })?;

        let mut ids: Vec<i64> = members
            .iter()
            .filter_map(|member| match member.parse::<i64>() {
                Ok(id) if id > 0 => Some(id),
                _ => {
                    warn!(
                        error = %RotatorError::skipped(member.as_str(), "not a valid identity"),
                        "Excluding stored proxy"
                    );
                    None
                }
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let records: Vec<ProxyRecord> = stream::iter(ids)
            .map(|id| self.load_record(id))
            .buffered(RELOAD_CONCURRENCY)
            .filter_map(|result| async move {
                match result {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(error = %e, "Excluding stored proxy");
                        None
                    }
                }
            })
            .collect()
            .await;

        let count = records.len();
        self.serving.publish(records);

        info!(count = count, "Serving set reloaded");
        Ok(count)
    }

    /// Fetch one identity's attributes and resolve its endpoint
    async fn load_record(&self, id: i64) -> Result<ProxyRecord> {
        let key = self.keys.proxy(id);

        let values = self
            .timed(self.store.get_fields(&key, &STORED_FIELDS))
            .await
            .map_err(|e| RotatorError::skipped(&key, e))?;

        let attributes = Attributes::from_fields(
            STORED_FIELDS
                .iter()
                .zip(values)
                .filter_map(|(field, value)| value.map(|v| (*field, v))),
        );

        if attributes.ip_address.is_none() || attributes.port.is_none() {
            return Err(RotatorError::skipped(&key, "missing address or port"));
        }

        let endpoint = self
            .resolve(&attributes.address())
            .await
            .map_err(|e| RotatorError::skipped(&key, e))?;

        Ok(ProxyRecord::resolved(id, endpoint, attributes))
    }

    async fn resolve(&self, address: &str) -> Result<SocketAddr> {
        let mut addrs = tokio::time::timeout(self.op_timeout, tokio::net::lookup_host(address))
            .await
            .map_err(|_| RotatorError::Timeout)??;

        addrs.next().ok_or_else(|| RotatorError::Unresolved {
            address: address.to_string(),
        })
    }

    async fn is_known(&self, address: &str) -> Result<bool> {
        let existing = self
            .timed(self.store.get_field(&self.keys.proxies_ids(), address))
            .await?;
        Ok(existing.is_some())
    }

    /// Write a new record; stops at the first failing step
    async fn persist(&self, record: &ProxyRecord) -> Result<i64> {
        let id = self
            .timed(self.store.increment(&self.keys.proxies_next_id()))
            .await?;
        let member = id.to_string();

        self.timed(
            self.store
                .set_fields(&self.keys.proxy(id), &record.attributes().to_fields()),
        )
        .await?;

        self.timed(self.store.add_to_set(&self.keys.proxies(), &member))
            .await?;

        self.timed(
            self.store
                .set_field(&self.keys.proxies_ids(), &record.address(), &member),
        )
        .await?;

        Ok(id)
    }

    /// Bound a store operation; running out of time counts as the store being unavailable
    async fn timed<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(RotatorError::StoreUnavailable(format!(
                "operation timed out after {:?}",
                self.op_timeout
            ))),
        }
    }
}

impl ProxySelector for PoolManager {
    fn select(&self, target: Option<&RequestTarget>) -> Result<Arc<ProxyRecord>> {
        let proxy = PoolManager::select(self)?;
        if let Some(target) = target {
            debug!(target = %target, proxy = %proxy.address(), "Selected upstream proxy");
        }
        Ok(proxy)
    }

    fn available_count(&self) -> usize {
        self.serving.len()
    }
}
