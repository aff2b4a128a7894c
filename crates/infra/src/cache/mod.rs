//! Read-through cache with single-flight computation.
//!
//! ## Entry lifecycle
//!
//! Each key maps to a shared cell. The first caller for a cold key runs the
//! computation; concurrent callers for the same key wait on the same cell instead
//! of starting their own. A failed computation leaves the cell empty, so the next
//! caller retries.
//!
//! Invalidation removes the cell from the map. A computation already running on the
//! removed cell still completes for the callers waiting on it, but a caller that
//! arrives after the invalidation gets a fresh cell and recomputes. No reader that
//! starts after an invalidation can observe the value cached before it.
//!
//! Entries carry no TTL; freshness comes from explicit invalidation.

pub mod key;
pub mod read_model;

pub use key::{CacheKey, KeyPattern, ListingKind};
pub use read_model::ReadModelCache;

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

type Cell<V> = Arc<OnceCell<V>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug)]
pub struct Cache<K, V> {
    name: &'static str,
    entries: Mutex<HashMap<K, Cell<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> Cache<K, V>
where
    K: Clone + Eq + Hash + Display,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, Cell<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cell(&self, key: &K) -> Cell<V> {
        self.entries().entry(key.clone()).or_default().clone()
    }

    /// Cached value for `key`, computing it on a miss.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self.cell(&key);

        if let Some(value) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache = self.name, key = %key, "cache hit");
            return Ok(value.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(cache = self.name, key = %key, "cache miss");

        let result = cell.get_or_try_init(compute).await.cloned();
        if result.is_err() {
            tracing::debug!(cache = self.name, key = %key, "computation failed; entry left cold");
        }
        result
    }

    /// Resolved value for `key`, if warm.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries().get(key).and_then(|cell| cell.get().cloned())
    }

    /// Whether `key` holds a resolved value.
    pub fn contains(&self, key: &K) -> bool {
        self.entries().get(key).is_some_and(|cell| cell.initialized())
    }

    /// Number of entries, warm or in flight.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&self, key: &K) -> bool {
        let removed = self.entries().remove(key).is_some();
        if removed {
            tracing::debug!(cache = self.name, key = %key, "invalidated");
        }
        removed
    }

    /// Remove every entry whose key satisfies `predicate`; returns how many.
    pub fn invalidate_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    /// Remove every entry whose storage string starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let removed = self.invalidate_where(|key| key.to_string().starts_with(prefix));
        tracing::debug!(cache = self.name, prefix, removed, "invalidated by prefix");
        removed
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl<V: Clone> Cache<CacheKey, V> {
    /// Remove every entry matching `pattern`; returns how many.
    pub fn invalidate_matching(&self, pattern: &KeyPattern) -> usize {
        let removed = self.invalidate_where(|key| pattern.matches(key));
        tracing::debug!(cache = self.name, ?pattern, removed, "invalidated by pattern");
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use storefront_core::ProductId;

    use super::*;

    fn key(id: &str) -> CacheKey {
        CacheKey::Product(ProductId::new(id))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_computation() {
        let cache: Arc<Cache<CacheKey, u32>> = Arc::new(Cache::new("test"));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(key("p1"), || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, ()>(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(cache.contains(&key("p1")));
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache: Cache<CacheKey, u32> = Cache::new("test");

        let first = cache.get_or_compute(key("p1"), || async { Err::<u32, _>("offline") }).await;
        assert_eq!(first, Err("offline"));
        assert!(!cache.contains(&key("p1")));

        let second = cache.get_or_compute(key("p1"), || async { Ok::<_, &str>(3) }).await;
        assert_eq!(second, Ok(3));
    }

    #[tokio::test]
    async fn invalidation_forces_recompute() {
        let cache: Cache<CacheKey, u32> = Cache::new("test");
        let runs = AtomicUsize::new(0);
        let compute = || async {
            Ok::<_, ()>(runs.fetch_add(1, Ordering::SeqCst) as u32)
        };

        assert_eq!(cache.get_or_compute(key("p1"), compute).await, Ok(0));
        assert_eq!(cache.get_or_compute(key("p1"), compute).await, Ok(0));
        assert!(cache.invalidate(&key("p1")));
        assert_eq!(cache.get_or_compute(key("p1"), compute).await, Ok(1));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_value_is_not_published_after_invalidation() {
        let cache: Arc<Cache<CacheKey, &'static str>> = Arc::new(Cache::new("test"));

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let slow = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(key("p1"), || async move {
                        let _ = started_tx.send(());
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, ()>("stale")
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        cache.invalidate(&key("p1"));
        let fresh = cache.get_or_compute(key("p1"), || async { Ok::<_, ()>("fresh") }).await;

        assert_eq!(fresh, Ok("fresh"));
        assert_eq!(slow.await.unwrap(), Ok("stale"));
        assert_eq!(cache.peek(&key("p1")), Some("fresh"));
    }

    #[tokio::test]
    async fn prefix_and_pattern_invalidation() {
        let cache: Cache<CacheKey, u32> = Cache::new("test");
        for k in [key("1"), key("10"), CacheKey::Products, CacheKey::Variants(ProductId::new("1"))] {
            cache.get_or_compute(k, || async { Ok::<_, ()>(1) }).await.unwrap();
        }

        assert_eq!(cache.invalidate_matching(&KeyPattern::ProductScope(ProductId::new("1"))), 2);
        assert!(cache.contains(&key("10")));

        assert_eq!(cache.invalidate_prefix("products"), 2);
        assert!(cache.is_empty());
    }
}
