//! Runtime tuning for the consistency layer.

use std::time::Duration;

pub const COALESCE_WINDOW_ENV: &str = "STOREFRONT_STOCK_COALESCE_MS";
pub const PENDING_TTL_ENV: &str = "STOREFRONT_STOCK_PENDING_TTL_MS";
pub const DEDUP_WINDOW_ENV: &str = "STOREFRONT_STOCK_DEDUP_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorefrontConfig {
    /// How long stock updates for one variant are merged before broadcasting.
    pub stock_coalesce_window: Duration,
    /// Pending updates older than this are flushed on the next notify.
    pub stock_pending_ttl: Duration,
    /// Identical stock updates inside this window reach `on_stock_update` once.
    pub stock_dedup_window: Duration,
    /// Related-products limit used when the caller passes none.
    pub related_products_default: usize,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            stock_coalesce_window: Duration::from_millis(250),
            stock_pending_ttl: Duration::from_secs(1),
            stock_dedup_window: Duration::from_millis(500),
            related_products_default: 4,
        }
    }
}

impl StorefrontConfig {
    /// Defaults overridden by the `STOREFRONT_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stock_coalesce_window: env_millis(COALESCE_WINDOW_ENV, defaults.stock_coalesce_window),
            stock_pending_ttl: env_millis(PENDING_TTL_ENV, defaults.stock_pending_ttl),
            stock_dedup_window: env_millis(DEDUP_WINDOW_ENV, defaults.stock_dedup_window),
            related_products_default: defaults.related_products_default,
        }
    }

    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.stock_coalesce_window = window;
        self
    }

    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.stock_pending_ttl = ttl;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.stock_dedup_window = window;
        self
    }

    pub fn with_related_products_default(mut self, limit: usize) -> Self {
        self.related_products_default = limit;
        self
    }

    /// Coalescing window clamped to the pending TTL.
    pub fn effective_coalesce_window(&self) -> Duration {
        self.stock_coalesce_window.min(self.stock_pending_ttl)
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "ignoring unparseable duration");
                default
            }
        },
        Err(_) => default,
    }
}
