use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

struct CacheEntry<V> {
    value: V,
    fetched_at: DateTime<Utc>,
}

/// Time-bounded cache for external lookups, keyed by URL/domain/IP.
///
/// A hit younger than the TTL is served without touching the external
/// source; older entries count as misses and are refreshed. Concurrent
/// callers for the same key serialize on a per-key gate and re-check the
/// cache after acquiring it, so at most one fetch per key is ever in
/// flight.
pub struct LookupCache<V: Clone> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    ttl: Duration,
}

impl<V: Clone> LookupCache<V> {
    pub fn new(ttl_days: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            ttl: Duration::days(ttl_days),
        }
    }

    pub async fn get_fresh(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        entries.get(key).and_then(|entry| {
            if Utc::now() - entry.fetched_at < self.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    /// Seed an entry with an explicit fetch timestamp.
    pub async fn insert_at(&self, key: &str, value: V, fetched_at: DateTime<Utc>) {
        self.entries
            .write()
            .await
            .insert(key.to_string(), CacheEntry { value, fetched_at });
    }

    /// Return the cached value for `key` or run `fetch` to fill it. The
    /// future is dropped unpolled on a cache hit.
    pub async fn get_or_fetch<Fut>(&self, key: &str, fetch: Fut) -> V
    where
        Fut: Future<Output = V>,
    {
        if let Some(value) = self.get_fresh(key).await {
            return value;
        }

        let gate = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        // Another caller may have completed the fetch while we waited.
        if let Some(value) = self.get_fresh(key).await {
            return value;
        }

        log::debug!("cache miss, fetching: {key}");
        let value = fetch.await;
        self.insert_at(key, value.clone(), Utc::now()).await;

        self.inflight.lock().await.remove(key);

        value
    }

    /// Drop entries older than the TTL.
    pub async fn prune_expired(&self) {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| now - entry.fetched_at < self.ttl);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fresh_hit_skips_fetch() {
        let cache = LookupCache::new(30);
        cache.insert_at("198.51.100.1", 7u32, Utc::now()).await;

        let calls = AtomicUsize::new(0);
        let value = cache
            .get_or_fetch("198.51.100.1", async {
                calls.fetch_add(1, Ordering::SeqCst);
                99u32
            })
            .await;

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refreshed() {
        let cache = LookupCache::new(30);
        cache
            .insert_at("198.51.100.1", 7u32, Utc::now() - Duration::days(31))
            .await;

        assert!(cache.get_fresh("198.51.100.1").await.is_none());

        let value = cache.get_or_fetch("198.51.100.1", async { 99u32 }).await;
        assert_eq!(value, 99);
        assert_eq!(cache.get_fresh("198.51.100.1").await, Some(99));
    }

    #[tokio::test]
    async fn test_concurrent_lookups_fetch_once() {
        let cache = Arc::new(LookupCache::new(30));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("203.0.113.9", async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        42u32
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let cache = LookupCache::new(30);
        cache.insert_at("old", 1u32, Utc::now() - Duration::days(40)).await;
        cache.insert_at("new", 2u32, Utc::now()).await;

        cache.prune_expired().await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get_fresh("new").await, Some(2));
    }
}
