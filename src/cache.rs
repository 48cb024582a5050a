//! Short-lived availability cache.
//!
//! Cache-aside over the booking store, keyed by `slots:{property}:{date}`.
//! Concurrent misses on one key share a single load (moka's `try_get_with`),
//! so a burst of readers costs one store query per key per miss window.
//! Entries are dropped on every successful write for their key and otherwise
//! expire after the TTL; staleness inside that window is accepted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use moka::future::Cache;

use crate::limits::AVAILABILITY_CACHE_CAPACITY;
use crate::model::TimeSlot;
use crate::observability;

pub type CachedSlots = Arc<Vec<TimeSlot>>;

pub fn cache_key(property_id: &str, date: NaiveDate) -> String {
    format!("slots:{property_id}:{date}")
}

#[derive(Clone)]
pub struct SlotCache {
    inner: Cache<String, CachedSlots>,
}

impl SlotCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, AVAILABILITY_CACHE_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { inner }
    }

    /// Return the cached value or run `load` once for all concurrent callers.
    /// Errors are handed to every waiter and never cached.
    pub async fn get_or_load<E, F>(&self, key: String, load: F) -> Result<CachedSlots, Arc<E>>
    where
        F: Future<Output = Result<Vec<TimeSlot>, E>>,
        E: Send + Sync + 'static,
    {
        self.inner
            .try_get_with(key, async move {
                metrics::counter!(observability::AVAILABILITY_CACHE_MISSES_TOTAL).increment(1);
                load.await.map(Arc::new)
            })
            .await
    }

    pub async fn get(&self, key: &str) -> Option<CachedSlots> {
        self.inner.get(key).await
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn slots(times: &[&str]) -> Vec<TimeSlot> {
        times
            .iter()
            .map(|t| TimeSlot {
                time: t.to_string(),
                label: t.to_string(),
                available: true,
            })
            .collect()
    }

    #[test]
    fn key_layout() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert_eq!(cache_key("P1", date), "slots:P1:2025-06-02");
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let cache = SlotCache::new(Duration::from_secs(30));
        let loads = AtomicUsize::new(0);
        for _ in 0..2 {
            let got = cache
                .get_or_load::<(), _>("k".into(), async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(slots(&["10:00"]))
                })
                .await
                .unwrap();
            assert_eq!(got.len(), 1);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_load() {
        let cache = SlotCache::new(Duration::from_secs(30));
        let loads = Arc::new(AtomicUsize::new(0));
        let readers = (0..20).map(|_| {
            let cache = cache.clone();
            let loads = loads.clone();
            tokio::spawn(async move {
                cache
                    .get_or_load::<(), _>("hot".into(), async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(slots(&["10:00", "10:30"]))
                    })
                    .await
                    .unwrap()
            })
        });
        for result in futures::future::join_all(readers).await {
            assert_eq!(result.unwrap().len(), 2);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = SlotCache::new(Duration::from_secs(30));
        let err = cache
            .get_or_load("k".into(), async { Err::<Vec<TimeSlot>, _>("store down") })
            .await
            .unwrap_err();
        assert_eq!(*err, "store down");
        assert!(cache.get("k").await.is_none());

        let ok = cache
            .get_or_load::<&str, _>("k".into(), async { Ok(slots(&["09:00"])) })
            .await
            .unwrap();
        assert_eq!(ok[0].time, "09:00");
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let cache = SlotCache::new(Duration::from_secs(30));
        cache
            .get_or_load::<(), _>("k".into(), async { Ok(slots(&["09:00"])) })
            .await
            .unwrap();
        cache.invalidate("k").await;
        assert!(cache.get("k").await.is_none());
        let reloaded = cache
            .get_or_load::<(), _>("k".into(), async { Ok(slots(&["09:00", "09:30"])) })
            .await
            .unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = SlotCache::new(Duration::from_millis(50));
        cache
            .get_or_load::<(), _>("k".into(), async { Ok(slots(&["09:00"])) })
            .await
            .unwrap();
        assert!(cache.get("k").await.is_some());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get("k").await.is_none());
    }
}
