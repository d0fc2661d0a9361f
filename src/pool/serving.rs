//! Serving set: the records currently eligible for selection

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;

use crate::error::{Result, RotatorError};
use crate::models::ProxyRecord;

/// Immutable view of the serving set at one point in time
#[derive(Debug, Default)]
pub struct Snapshot {
    pub records: Vec<Arc<ProxyRecord>>,
    /// When this snapshot was published; `None` before the first reload
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Shared-read, replace-wholesale collection of proxy records.
///
/// Readers load the current `Arc<Snapshot>` and never observe a
/// partially built set; writers publish a fresh snapshot in one swap.
#[derive(Debug)]
pub struct ServingSet {
    current: ArcSwap<Snapshot>,
}

impl ServingSet {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// Replace the whole set
    pub fn publish(&self, records: Vec<ProxyRecord>) {
        let snapshot = Snapshot {
            records: records.into_iter().map(Arc::new).collect(),
            loaded_at: Some(Utc::now()),
        };
        self.current.store(Arc::new(snapshot));
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn len(&self) -> usize {
        self.current.load().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick one record uniformly at random
    pub fn choose(&self) -> Result<Arc<ProxyRecord>> {
        let snapshot = self.current.load();
        let mut rng = rand::thread_rng();
        snapshot
            .records
            .choose(&mut rng)
            .cloned()
            .ok_or(RotatorError::PoolEmpty)
    }
}

impl Default for ServingSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attributes;

    fn record(id: i64) -> ProxyRecord {
        let attributes = Attributes {
            ip_address: Some("127.0.0.1".to_string()),
            port: Some((8000 + id).to_string()),
            ..Default::default()
        };
        let endpoint = format!("127.0.0.1:{}", 8000 + id).parse().unwrap();
        ProxyRecord::resolved(id, endpoint, attributes)
    }

    #[test]
    fn test_empty_set_fails_with_pool_empty() {
        let set = ServingSet::new();
        assert!(set.is_empty());
        assert!(set.snapshot().loaded_at.is_none());
        assert!(matches!(set.choose(), Err(RotatorError::PoolEmpty)));
    }

    #[test]
    fn test_publish_replaces_everything() {
        let set = ServingSet::new();
        set.publish(vec![record(1), record(2)]);
        assert_eq!(set.len(), 2);

        let before = set.snapshot();
        set.publish(vec![record(3)]);

        // An earlier snapshot stays intact after the swap.
        assert_eq!(before.records.len(), 2);
        assert_eq!(set.choose().unwrap().id(), 3);
        assert!(set.snapshot().loaded_at.is_some());

        set.publish(Vec::new());
        assert!(matches!(set.choose(), Err(RotatorError::PoolEmpty)));
    }

    #[test]
    fn test_choose_only_returns_members() {
        let set = ServingSet::new();
        set.publish(vec![record(1), record(2), record(3)]);

        for _ in 0..50 {
            let id = set.choose().unwrap().id();
            assert!((1..=3).contains(&id));
        }
    }
}
