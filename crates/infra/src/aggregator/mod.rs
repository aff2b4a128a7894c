//! Product aggregator: the enriched product read model.
//!
//! ## Reads
//!
//! Every read goes through the [`ReadModelCache`] under its own [`CacheKey`]. A cold
//! entry is computed by reading the product documents, their variant rows and the
//! stored promotions, then folding the variant stock into the product and pricing
//! it. `total_stock` is always the sum of the variant rows read in that pass; the
//! stored figure is never trusted.
//!
//! ## Writes
//!
//! Mutations live in the submodules and all follow the same order:
//!
//! ```text
//! write (batch / transaction) → invalidate cache keys → broadcast
//! ```
//!
//! so a subscriber that re-reads on an event always misses the cache.
//!
//! ## Failure policy
//!
//! Internals return [`CatalogResult`]. Public operations log the error and return a
//! fallback (`Vec::new()`, `None`, `false`); they never panic or propagate.

mod diagnostics;
mod products;
mod promotions;
mod stock;

pub use diagnostics::{ConsistencyReport, InconsistencyWarning, find_inconsistencies};
pub use products::{GridSync, build_variants, sync_variant_grid};
pub use promotions::validate_promotion;
pub use stock::{StockChange, StockChangeKind, StockPlan, plan_stock_writes};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use storefront_catalog::{
    Product, Promotion, Variant, attach_variants, fold_variant_stock, price_product, rank_related,
    resolve_variant_price,
};
use storefront_core::{Entity, ProductId, PromotionId};
use storefront_events::{Subscription, SubscriptionId};
use storefront_inventory::{StockSummary, StockUpdate};

use crate::broadcast::{PromotionBroadcaster, PromotionChangeEvent, PromotionChangeKind, StockBroadcaster};
use crate::cache::{CacheKey, KeyPattern, ListingKind, ReadModelCache};
use crate::config::StorefrontConfig;
use crate::error::{CatalogError, CatalogResult};
use crate::store::{Document, DocumentStore};
use crate::variants::{DecodeMode, VariantStore};

/// Orchestrates the store, cache, price engine and both broadcasters.
#[derive(Debug)]
pub struct ProductAggregator<S> {
    store: S,
    variants: VariantStore<S>,
    cache: Arc<ReadModelCache>,
    stock: StockBroadcaster,
    promotions: Arc<PromotionBroadcaster>,
    config: StorefrontConfig,
}

impl<S> ProductAggregator<S>
where
    S: DocumentStore + Clone,
{
    /// Aggregator with its own cache and broadcasters.
    pub fn new(store: S, config: StorefrontConfig) -> Self {
        let cache = Arc::new(ReadModelCache::new());
        let stock = StockBroadcaster::new(cache.clone(), config.clone());
        Self::with_components(store, cache, stock, Arc::new(PromotionBroadcaster::new()), config)
    }

    /// Aggregator over components shared with other services.
    pub fn with_components(
        store: S,
        cache: Arc<ReadModelCache>,
        stock: StockBroadcaster,
        promotions: Arc<PromotionBroadcaster>,
        config: StorefrontConfig,
    ) -> Self {
        Self {
            variants: VariantStore::new(store.clone()),
            store,
            cache,
            stock,
            promotions,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ReadModelCache> {
        &self.cache
    }

    pub fn stock_broadcaster(&self) -> &StockBroadcaster {
        &self.stock
    }

    pub fn promotion_broadcaster(&self) -> &Arc<PromotionBroadcaster> {
        &self.promotions
    }

    pub fn variant_store(&self) -> &VariantStore<S> {
        &self.variants
    }

    pub fn config(&self) -> &StorefrontConfig {
        &self.config
    }

    // ---- reads -------------------------------------------------------------

    /// Every product, enriched.
    pub async fn get_products(&self) -> Vec<Product> {
        fallback("get_products", self.products_cached().await, Vec::new())
    }

    /// One product, enriched (no `variants` attached).
    pub async fn get_product_by_id(&self, product_id: &ProductId) -> Option<Product> {
        let result = self
            .cache
            .products
            .get_or_compute(CacheKey::Product(product_id.clone()), || self.load_product(product_id))
            .await;
        fallback("get_product_by_id", result, None)
    }

    /// One product with its variants attached and each variant's price resolved.
    ///
    /// A malformed variant row makes this return the stored product un-enriched.
    pub async fn get_complete_product(&self, product_id: &ProductId) -> Option<Product> {
        let result = self
            .cache
            .products
            .get_or_compute(CacheKey::CompleteProduct(product_id.clone()), || {
                self.load_complete_product(product_id)
            })
            .await;
        fallback("get_complete_product", result, None)
    }

    /// Variant rows of a product, malformed rows skipped.
    pub async fn get_variants(&self, product_id: &ProductId) -> Vec<Variant> {
        let result = self
            .cache
            .variants
            .get_or_compute(CacheKey::Variants(product_id.clone()), || {
                self.variants.variants_for_product(product_id, DecodeMode::Lenient)
            })
            .await;
        fallback("get_variants", result, Vec::new())
    }

    /// Drop everything cached for the product and read it again.
    pub async fn force_refresh_product(&self, product_id: &ProductId) -> Option<Product> {
        self.cache
            .invalidate_matching(&KeyPattern::ProductScope(product_id.clone()));
        tracing::debug!(product_id = %product_id, "forced refresh");
        self.get_complete_product(product_id).await
    }

    pub async fn get_featured_products(&self, limit: usize) -> Vec<Product> {
        self.listing(ListingKind::Featured, limit).await
    }

    pub async fn get_new_products(&self, limit: usize) -> Vec<Product> {
        self.listing(ListingKind::New, limit).await
    }

    pub async fn get_bestselling_products(&self, limit: usize) -> Vec<Product> {
        self.listing(ListingKind::Bestselling, limit).await
    }

    /// In-stock discounted products, largest discount first.
    pub async fn get_discounted_products(&self, limit: usize) -> Vec<Product> {
        self.listing(ListingKind::Discounted, limit).await
    }

    /// In-stock products of a category (case-insensitive).
    pub async fn get_products_by_category(&self, category: &str) -> Vec<Product> {
        let result = self
            .cache
            .lists
            .get_or_compute(CacheKey::Category(category.to_string()), || async {
                let all = self.products_cached().await?;
                Ok::<_, CatalogError>(
                    all.into_iter()
                        .filter(|p| p.in_stock() && p.category.eq_ignore_ascii_case(category))
                        .collect(),
                )
            })
            .await;
        fallback("get_products_by_category", result, Vec::new())
    }

    /// Products most similar to `product`, best first.
    ///
    /// `limit` defaults to `related_products_default`.
    pub async fn get_related_products(&self, product: &Product, limit: Option<usize>) -> Vec<Product> {
        let limit = limit.unwrap_or(self.config.related_products_default);
        match self.products_cached().await {
            Ok(candidates) => rank_related(product, &candidates, limit),
            Err(e) => {
                report("get_related_products", &e);
                Vec::new()
            }
        }
    }

    async fn listing(&self, kind: ListingKind, limit: usize) -> Vec<Product> {
        let result = self
            .cache
            .lists
            .get_or_compute(CacheKey::Listing { kind, limit }, || async {
                let all = self.products_cached().await?;
                Ok::<_, CatalogError>(select_listing(all, kind, limit))
            })
            .await;
        fallback(kind.as_str(), result, Vec::new())
    }

    async fn products_cached(&self) -> CatalogResult<Vec<Product>> {
        self.cache
            .lists
            .get_or_compute(CacheKey::Products, || self.load_products())
            .await
    }

    async fn load_products(&self) -> CatalogResult<Vec<Product>> {
        let docs = self.store.query(Product::COLLECTION, &[]).await?;
        let products: Vec<Product> = docs.iter().filter_map(decode_lenient::<Product>).collect();

        let ids: Vec<ProductId> = products.iter().map(|p| p.id.clone()).collect();
        let mut variants = self.variants.variants_for_products(&ids, DecodeMode::Lenient).await?;
        let promotions = self.load_promotions().await?;
        let now = Utc::now();

        let enriched: Vec<Product> = products
            .into_iter()
            .map(|product| {
                let rows = variants.remove(&product.id).unwrap_or_default();
                self.enrich(product, &rows, &promotions, now)
            })
            .collect();
        tracing::debug!(count = enriched.len(), "product list enriched");
        Ok(enriched)
    }

    async fn load_product(&self, product_id: &ProductId) -> CatalogResult<Option<Product>> {
        let Some(product) = self.load_base_product(product_id).await? else {
            return Ok(None);
        };
        let variants = self.variants.variants_for_product(product_id, DecodeMode::Lenient).await?;
        let promotions = self.load_promotions().await?;
        Ok(Some(self.enrich(product, &variants, &promotions, Utc::now())))
    }

    async fn load_complete_product(&self, product_id: &ProductId) -> CatalogResult<Option<Product>> {
        let Some(product) = self.load_base_product(product_id).await? else {
            return Ok(None);
        };

        let variants = match self.variants.variants_for_product(product_id, DecodeMode::Strict).await {
            Ok(variants) => variants,
            Err(CatalogError::Malformed(msg)) => {
                tracing::warn!(product_id = %product_id, error = %msg, "malformed variants; serving un-enriched product");
                return Ok(Some(product));
            }
            Err(e) => return Err(e),
        };

        let promotions = self.load_promotions().await?;
        let now = Utc::now();
        let mut enriched = self.enrich(product, &variants, &promotions, now);

        let by_id: HashMap<PromotionId, Promotion> =
            promotions.into_iter().map(|p| (p.id.clone(), p)).collect();
        let priced: Vec<Variant> = variants
            .into_iter()
            .map(|mut variant| {
                variant.price_quote = Some(resolve_variant_price(&enriched, Some(&variant), &by_id, now));
                variant
            })
            .collect();
        attach_variants(&mut enriched, priced);

        Ok(Some(enriched))
    }

    async fn load_base_product(&self, product_id: &ProductId) -> CatalogResult<Option<Product>> {
        product_id.ensure_present()?;
        match self.store.get(Product::COLLECTION, product_id.as_str()).await? {
            Some(doc) => Ok(Some(doc.decode::<Product>()?)),
            None => Ok(None),
        }
    }

    async fn load_promotions(&self) -> CatalogResult<Vec<Promotion>> {
        let docs = self.store.query(Promotion::COLLECTION, &[]).await?;
        Ok(docs.iter().filter_map(decode_lenient::<Promotion>).collect())
    }

    async fn load_promotion(&self, promotion_id: &PromotionId) -> CatalogResult<Promotion> {
        promotion_id.ensure_present()?;
        let doc = self
            .store
            .get(Promotion::COLLECTION, promotion_id.as_str())
            .await?
            .ok_or_else(|| CatalogError::not_found("promotion", promotion_id))?;
        Ok(doc.decode()?)
    }

    /// Fold stock, price, and prime the running stock summary.
    fn enrich(&self, mut product: Product, variants: &[Variant], promotions: &[Promotion], now: DateTime<Utc>) -> Product {
        fold_variant_stock(&mut product, variants);
        self.stock.seed_summary(
            product.id.clone(),
            variants
                .iter()
                .filter(|v| v.product_id == product.id)
                .map(|v| (v.id.clone(), v.stock)),
        );
        price_product(product, promotions, now)
    }

    // ---- cache & streams ---------------------------------------------------

    /// Drop every cached entry.
    pub fn reset_caches(&self) {
        self.cache.clear();
        tracing::info!("read model caches cleared");
    }

    pub fn stock_summary(&self, product_id: &ProductId) -> Option<StockSummary> {
        self.stock.summary(product_id)
    }

    pub fn on_stock_update(&self) -> Subscription<StockUpdate> {
        self.stock.on_stock_update()
    }

    pub fn on_product_stock_update(&self, product_id: ProductId) -> Subscription<StockUpdate> {
        self.stock.on_product_stock_update(product_id)
    }

    pub fn on_promotion_change(&self) -> Subscription<PromotionChangeEvent> {
        self.promotions.on_promotion_change()
    }

    pub fn on_promotion_change_by_type(&self, kind: PromotionChangeKind) -> Subscription<PromotionChangeEvent> {
        self.promotions.on_promotion_change_by_type(kind)
    }

    pub fn on_product_promotion_change(&self, product_id: ProductId) -> Subscription<PromotionChangeEvent> {
        self.promotions.on_product_promotion_change(product_id)
    }

    /// Remove a stock or promotion subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.stock.unsubscribe(id) || self.promotions.unsubscribe(id)
    }
}

/// Products of one listing, in stock only.
pub fn select_listing(products: Vec<Product>, kind: ListingKind, limit: usize) -> Vec<Product> {
    let mut selected: Vec<Product> = products
        .into_iter()
        .filter(Product::in_stock)
        .filter(|p| match kind {
            ListingKind::Featured => p.is_featured,
            ListingKind::New => p.is_new,
            ListingKind::Bestselling => p.is_bestseller,
            ListingKind::Discounted => p.is_discounted(),
        })
        .collect();

    if kind == ListingKind::Discounted {
        selected.sort_by(|a, b| {
            let (a, b) = (a.discount_percentage.unwrap_or(0.0), b.discount_percentage.unwrap_or(0.0));
            b.total_cmp(&a)
        });
    }

    selected.truncate(limit);
    selected
}

fn decode_lenient<T: serde::de::DeserializeOwned>(doc: &Document) -> Option<T> {
    match doc.decode() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(id = %doc.id, error = %e, "skipping malformed document");
            None
        }
    }
}

fn report(operation: &'static str, error: &CatalogError) {
    match error {
        CatalogError::Validation(_) | CatalogError::NotFound { .. } | CatalogError::Domain(_) => {
            tracing::warn!(operation, error = %error, "operation rejected");
        }
        CatalogError::Malformed(_) | CatalogError::Upstream(_) => {
            tracing::error!(operation, error = %error, "operation failed");
        }
    }
}

fn fallback<T>(operation: &'static str, result: CatalogResult<T>, value: T) -> T {
    result.unwrap_or_else(|e| {
        report(operation, &e);
        value
    })
}
