use storefront_catalog::{Product, Variant};
use storefront_core::ProductId;

use super::{Cache, CacheKey, CacheStats, KeyPattern};

/// The caches behind the product read model, one per value shape.
///
/// All three share the [`CacheKey`] namespace, so a pattern invalidation is applied
/// to each of them.
#[derive(Debug)]
pub struct ReadModelCache {
    /// `Products`, `Listing` and `Category` keys.
    pub lists: Cache<CacheKey, Vec<Product>>,
    /// `Product` and `CompleteProduct` keys. `None` caches a confirmed miss.
    pub products: Cache<CacheKey, Option<Product>>,
    /// `Variants` keys.
    pub variants: Cache<CacheKey, Vec<Variant>>,
}

impl Default for ReadModelCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadModelCache {
    pub fn new() -> Self {
        Self {
            lists: Cache::new("lists"),
            products: Cache::new("products"),
            variants: Cache::new("variants"),
        }
    }

    pub fn invalidate_matching(&self, pattern: &KeyPattern) -> usize {
        self.lists.invalidate_matching(pattern)
            + self.products.invalidate_matching(pattern)
            + self.variants.invalidate_matching(pattern)
    }

    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.lists.invalidate_prefix(prefix)
            + self.products.invalidate_prefix(prefix)
            + self.variants.invalidate_prefix(prefix)
    }

    /// Drop everything derived from one product: its own entries and every list
    /// that may contain it.
    pub fn invalidate_product(&self, product_id: &ProductId) -> usize {
        let removed = self.invalidate_matching(&KeyPattern::ProductScope(product_id.clone()))
            + self.invalidate_matching(&KeyPattern::Listings);
        tracing::debug!(product_id = %product_id, removed, "product read model invalidated");
        removed
    }

    pub fn clear(&self) {
        self.lists.clear();
        self.products.clear();
        self.variants.clear();
    }

    pub fn len(&self) -> usize {
        self.lists.len() + self.products.len() + self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        [self.lists.stats(), self.products.stats(), self.variants.stats()]
            .into_iter()
            .fold(CacheStats::default(), |acc, s| CacheStats {
                hits: acc.hits + s.hits,
                misses: acc.misses + s.misses,
                entries: acc.entries + s.entries,
            })
    }
}
