//! Stock update broadcasting.
//!
//! ## Flow
//!
//! ```text
//! notify(update) ─ validate ─ sweep expired ─ coalesce into pending[(product, variant)]
//!                                                │
//!                             window elapses ────┘
//!                                                ▼
//!                       flush: invalidate cache → update summary → publish
//! ```
//!
//! The pending map is bounded in time: each record carries an expiry
//! (`stock_pending_ttl`) and expired records are flushed on the next `notify`, so
//! nothing lingers even if a flush task never ran. Without a tokio runtime there is
//! nothing to schedule on and updates are flushed immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::time::Instant;

use storefront_core::{ProductId, VariantId};
use storefront_events::bus::Filter;
use storefront_events::{EventBus, InMemoryEventBus, Listener, Subscription, SubscriptionId};
use storefront_inventory::{StockSummary, StockUpdate};

use crate::cache::ReadModelCache;
use crate::config::StorefrontConfig;

type PendingKey = (ProductId, VariantId);

/// Updates stamped further ahead than this are treated as corrupt.
const MAX_CLOCK_SKEW_HOURS: i64 = 1;

#[derive(Debug)]
struct Pending {
    update: StockUpdate,
    generation: u64,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    summaries: HashMap<ProductId, StockSummary>,
    pending: HashMap<PendingKey, Pending>,
    next_generation: u64,
}

#[derive(Debug)]
struct Inner {
    bus: InMemoryEventBus<StockUpdate>,
    cache: Arc<ReadModelCache>,
    config: StorefrontConfig,
    state: Mutex<State>,
}

/// Coalescing pub/sub for inventory deltas.
///
/// Cloning is cheap and every clone shares the same bus, summaries and pending map.
#[derive(Debug, Clone)]
pub struct StockBroadcaster {
    inner: Arc<Inner>,
}

impl StockBroadcaster {
    pub fn new(cache: Arc<ReadModelCache>, config: StorefrontConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus: InMemoryEventBus::new(),
                cache,
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Accept a stock update for broadcasting.
    ///
    /// Invalid updates are logged and dropped: they reach neither the summary nor
    /// any subscriber.
    pub fn notify(&self, update: StockUpdate) {
        if let Err(e) = update.validate() {
            tracing::warn!(
                product_id = %update.product_id,
                variant_id = %update.variant_id,
                error = %e,
                "dropping invalid stock update"
            );
            return;
        }
        if update.timestamp > Utc::now() + chrono::Duration::hours(MAX_CLOCK_SKEW_HOURS) {
            tracing::warn!(
                product_id = %update.product_id,
                variant_id = %update.variant_id,
                timestamp = %update.timestamp,
                "dropping stock update stamped in the future"
            );
            return;
        }

        let now = Instant::now();
        let window = self.inner.config.effective_coalesce_window();
        let key = update.key();

        let (expired, scheduled) = {
            let mut state = self.inner.state();

            let expired_keys: Vec<PendingKey> = state
                .pending
                .iter()
                .filter(|(_, p)| p.expires_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            let expired: Vec<StockUpdate> = expired_keys
                .iter()
                .filter_map(|k| state.pending.remove(k))
                .map(|p| p.update)
                .collect();

            let scheduled = match state.pending.get_mut(&key) {
                Some(pending) => {
                    pending.update.coalesce(&update);
                    tracing::debug!(
                        product_id = %key.0,
                        variant_id = %key.1,
                        stock_change = pending.update.stock_change,
                        "stock update coalesced"
                    );
                    None
                }
                None => {
                    state.next_generation += 1;
                    let generation = state.next_generation;
                    state.pending.insert(
                        key.clone(),
                        Pending {
                            update,
                            generation,
                            expires_at: now + self.inner.config.stock_pending_ttl,
                        },
                    );
                    Some(generation)
                }
            };

            (expired, scheduled)
        };

        for update in expired {
            tracing::debug!(product_id = %update.product_id, variant_id = %update.variant_id, "flushing expired pending update");
            self.inner.flush(update);
        }

        if let Some(generation) = scheduled {
            self.schedule_flush(key, generation, window);
        }
    }

    fn schedule_flush(&self, key: PendingKey, generation: u64, window: Duration) {
        let handle = match Handle::try_current() {
            Ok(handle) if !window.is_zero() => handle,
            _ => {
                self.inner.flush_key(&key, generation);
                return;
            }
        };

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = inner.upgrade() {
                inner.flush_key(&key, generation);
            }
        });
    }

    /// Flush every pending update now. Returns how many were flushed.
    pub fn flush_pending(&self) -> usize {
        let drained: Vec<StockUpdate> = {
            let mut state = self.inner.state();
            state.pending.drain().map(|(_, p)| p.update).collect()
        };
        let count = drained.len();
        for update in drained {
            self.inner.flush(update);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state().pending.len()
    }

    /// Every flushed update, with repeats of the same
    /// `(product, variant, new_stock)` inside the dedup window collapsed.
    pub fn on_stock_update(&self) -> Subscription<StockUpdate> {
        self.inner.bus.subscribe_filtered(dedup_filter(self.inner.config.stock_dedup_window))
    }

    pub fn on_product_stock_update(&self, product_id: ProductId) -> Subscription<StockUpdate> {
        self.inner
            .bus
            .subscribe_filtered(Box::new(move |u: &StockUpdate| u.product_id == product_id))
    }

    pub fn on_variant_stock_update(&self, variant_id: VariantId) -> Subscription<StockUpdate> {
        self.inner
            .bus
            .subscribe_filtered(Box::new(move |u: &StockUpdate| u.variant_id == variant_id))
    }

    /// Register a callback for every flushed update.
    pub fn listen(&self, listener: Listener<StockUpdate>) -> SubscriptionId {
        self.inner.bus.listen(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.bus.subscriber_count()
    }

    /// Running stock summary for a product, if any update or seed touched it.
    pub fn summary(&self, product_id: &ProductId) -> Option<StockSummary> {
        self.inner.state().summaries.get(product_id).cloned()
    }

    /// Prime the running summary from freshly read variant rows.
    ///
    /// An existing summary keeps its tracked levels; see [`StockSummary::reconcile`].
    pub fn seed_summary(&self, product_id: ProductId, variants: impl IntoIterator<Item = (VariantId, u32)>) {
        let mut state = self.inner.state();
        match state.summaries.get_mut(&product_id) {
            Some(summary) => summary.reconcile(variants),
            None => {
                let summary = StockSummary::from_variants(product_id.clone(), variants);
                state.summaries.insert(product_id, summary);
            }
        }
    }

    /// Drop the summary and any pending updates of a deleted product.
    pub fn forget(&self, product_id: &ProductId) {
        let mut state = self.inner.state();
        state.summaries.remove(product_id);
        state.pending.retain(|(p, _), _| p != product_id);
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_key(&self, key: &PendingKey, generation: u64) {
        let update = {
            let mut state = self.state();
            match state.pending.get(key) {
                Some(p) if p.generation == generation => state.pending.remove(key).map(|p| p.update),
                // Already flushed by a sweep or flush_pending; a newer record is not ours.
                _ => None,
            }
        };
        if let Some(update) = update {
            self.flush(update);
        }
    }

    fn flush(&self, update: StockUpdate) {
        self.cache.invalidate_product(&update.product_id);

        {
            let mut state = self.state();
            state
                .summaries
                .entry(update.product_id.clone())
                .or_insert_with(|| StockSummary::new(update.product_id.clone()))
                .apply(&update);
        }

        tracing::debug!(
            product_id = %update.product_id,
            variant_id = %update.variant_id,
            stock_change = update.stock_change,
            new_stock = update.new_stock,
            "broadcasting stock update"
        );
        if let Err(e) = self.bus.publish(update) {
            tracing::error!(error = ?e, "failed to publish stock update");
        }
    }
}

fn dedup_filter(window: Duration) -> Filter<StockUpdate> {
    let mut seen: HashMap<PendingKey, (i64, Instant)> = HashMap::new();
    Box::new(move |update: &StockUpdate| {
        let now = Instant::now();
        seen.retain(|_, (_, at)| now.duration_since(*at) < window);

        let key = update.key();
        if let Some((stock, _)) = seen.get(&key) {
            if *stock == update.new_stock {
                return false;
            }
        }
        seen.insert(key, (update.new_stock, now));
        true
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use storefront_inventory::StockSource;

    use super::*;
    use crate::cache::CacheKey;

    fn broadcaster() -> (StockBroadcaster, Arc<ReadModelCache>) {
        let cache = Arc::new(ReadModelCache::new());
        (StockBroadcaster::new(cache.clone(), StorefrontConfig::default()), cache)
    }

    fn update(variant: &str, change: i64, new_stock: i64) -> StockUpdate {
        StockUpdate::new(
            ProductId::new("p1"),
            VariantId::new(variant),
            change,
            new_stock,
            StockSource::Admin,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn updates_inside_the_window_are_coalesced() {
        let (stock, _) = broadcaster();
        let sub = stock.on_product_stock_update(ProductId::new("p1"));

        stock.notify(update("v1", 3, 13));
        tokio::time::sleep(Duration::from_millis(50)).await;
        stock.notify(update("v1", -1, 12));
        assert_eq!(stock.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stock_change, 2);
        assert_eq!(events[0].new_stock, 12);
        assert_eq!(stock.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn updates_outside_the_window_are_independent() {
        let (stock, _) = broadcaster();
        let sub = stock.on_variant_stock_update(VariantId::new("v1"));

        stock.notify(update("v1", 3, 13));
        tokio::time::sleep(Duration::from_millis(300)).await;
        stock.notify(update("v1", -1, 12));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let changes: Vec<i64> = sub.drain().iter().map(|u| u.stock_change).collect();
        assert_eq!(changes, vec![3, -1]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_invalidates_and_updates_summary() {
        let (stock, cache) = broadcaster();
        let key = CacheKey::Product(ProductId::new("p1"));
        cache.products.get_or_compute(key.clone(), || async { Ok::<_, ()>(None) }).await.unwrap();
        stock.seed_summary(ProductId::new("p1"), [(VariantId::new("v1"), 10), (VariantId::new("v2"), 5)]);

        stock.notify(update("v1", -4, 6));
        assert!(cache.products.contains(&key));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!cache.products.contains(&key));
        let summary = stock.summary(&ProductId::new("p1")).unwrap();
        assert_eq!(summary.total_stock, 11);
    }

    #[test]
    fn late_seed_does_not_roll_back_a_flushed_update() {
        let (stock, _) = broadcaster();
        stock.seed_summary(ProductId::new("p1"), [(VariantId::new("v1"), 10)]);
        stock.notify(update("v1", -4, 6));

        // A read that started before the write finishes afterwards.
        stock.seed_summary(ProductId::new("p1"), [(VariantId::new("v1"), 10)]);

        assert_eq!(stock.summary(&ProductId::new("p1")).unwrap().total_stock, 6);
    }

    #[tokio::test]
    async fn invalid_updates_never_reach_subscribers() {
        let (stock, _) = broadcaster();
        let sub = stock.on_stock_update();

        stock.notify(update("v1", -20, -1));
        stock.notify(update("", 1, 1));
        let mut future = update("v1", 1, 1);
        future.timestamp = Utc::now() + chrono::Duration::days(30);
        stock.notify(future);

        assert_eq!(stock.pending_count(), 0);
        assert_eq!(stock.flush_pending(), 0);
        assert!(sub.drain().is_empty());
        assert!(stock.summary(&ProductId::new("p1")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expiring_records_are_published_once() {
        let cache = Arc::new(ReadModelCache::new());
        let config = StorefrontConfig::default()
            .with_coalesce_window(Duration::from_secs(10))
            .with_pending_ttl(Duration::from_millis(100));
        let stock = StockBroadcaster::new(cache, config);
        let sub = stock.on_stock_update();

        // The window is clamped to the 100ms TTL, so v1 is flushed by its timer.
        stock.notify(update("v1", 1, 1));
        tokio::time::sleep(Duration::from_millis(150)).await;
        stock.notify(update("v2", 1, 1));

        assert_eq!(stock.pending_count(), 1);
        assert_eq!(sub.drain().len(), 1);
    }

    #[test]
    fn without_a_runtime_updates_flush_immediately() {
        let (stock, _) = broadcaster();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let id = stock.listen(Arc::new(move |_: &StockUpdate| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        stock.notify(update("v1", 1, 1));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(stock.pending_count(), 0);

        assert!(stock.unsubscribe(id));
        stock.notify(update("v1", 1, 2));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dedup_collapses_identical_triples() {
        let (stock, _) = broadcaster();
        let deduped = stock.on_stock_update();
        let raw = stock.on_variant_stock_update(VariantId::new("v1"));

        stock.notify(update("v1", 0, 5));
        stock.notify(update("v1", 0, 5));
        stock.notify(update("v1", 1, 6));

        assert_eq!(deduped.drain().len(), 2);
        assert_eq!(raw.drain().len(), 3);
    }
}
