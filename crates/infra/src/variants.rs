//! Access to the `productVariants` collection.

use std::collections::HashMap;

use serde_json::{Value as JsonValue, json};

use storefront_catalog::{Promotion, Variant, calculate_price_with_promotion};
use storefront_core::{Entity, ProductId, PromotionId, VariantId};

use crate::error::{CatalogError, CatalogResult};
use crate::store::{Document, DocumentStore, Filter, JsonMap, WriteOp, patch};

/// Largest value list a single `in` query may carry.
pub const IN_QUERY_LIMIT: usize = 30;

/// How to treat variant rows that fail to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Fail the whole read.
    Strict,
    /// Log and skip the row.
    Lenient,
}

#[derive(Debug, Clone)]
pub struct VariantStore<S> {
    store: S,
}

impl<S: DocumentStore> VariantStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn variants_for_product(
        &self,
        product_id: &ProductId,
        mode: DecodeMode,
    ) -> CatalogResult<Vec<Variant>> {
        let docs = self
            .store
            .query(Variant::COLLECTION, &[Filter::eq("productId", product_id.as_str())])
            .await?;
        decode_rows(&docs, mode)
    }

    /// Variants of several products, grouped by product id.
    ///
    /// Ids are queried in chunks of [`IN_QUERY_LIMIT`]. Products without variants
    /// are absent from the map.
    pub async fn variants_for_products(
        &self,
        product_ids: &[ProductId],
        mode: DecodeMode,
    ) -> CatalogResult<HashMap<ProductId, Vec<Variant>>> {
        let mut grouped: HashMap<ProductId, Vec<Variant>> = HashMap::new();

        for chunk in product_ids.chunks(IN_QUERY_LIMIT) {
            let docs = self
                .store
                .query(
                    Variant::COLLECTION,
                    &[Filter::one_of("productId", chunk.iter().map(|id| id.as_str()))],
                )
                .await?;
            for variant in decode_rows(&docs, mode)? {
                grouped.entry(variant.product_id.clone()).or_default().push(variant);
            }
        }

        Ok(grouped)
    }

    pub async fn all_variants(&self, mode: DecodeMode) -> CatalogResult<Vec<Variant>> {
        let docs = self.store.query(Variant::COLLECTION, &[]).await?;
        decode_rows(&docs, mode)
    }

    pub async fn get_variant(&self, variant_id: &VariantId) -> CatalogResult<Option<Variant>> {
        match self.store.get(Variant::COLLECTION, variant_id.as_str()).await? {
            Some(doc) => Ok(Some(decode_row(&doc)?)),
            None => Ok(None),
        }
    }

    pub async fn variants_with_promotion(&self, promotion_id: &PromotionId) -> CatalogResult<Vec<Variant>> {
        let docs = self
            .store
            .query(Variant::COLLECTION, &[Filter::eq("promotionId", promotion_id.as_str())])
            .await?;
        decode_rows(&docs, DecodeMode::Lenient)
    }

    pub async fn create_variants(&self, variants: &[Variant]) -> CatalogResult<()> {
        if variants.is_empty() {
            return Ok(());
        }
        self.store.batch_write(create_ops(variants)?).await?;
        Ok(())
    }

    /// Delete every variant row of a product. Returns how many were removed.
    pub async fn delete_variants_for_product(&self, product_id: &ProductId) -> CatalogResult<usize> {
        let docs = self
            .store
            .query(Variant::COLLECTION, &[Filter::eq("productId", product_id.as_str())])
            .await?;
        let ops: Vec<WriteOp> = docs
            .iter()
            .map(|doc| WriteOp::delete(Variant::COLLECTION, doc.id.clone()))
            .collect();
        let removed = ops.len();
        if removed > 0 {
            self.store.batch_write(ops).await?;
        }
        Ok(removed)
    }
}

fn decode_row(doc: &Document) -> CatalogResult<Variant> {
    doc.decode::<Variant>().map_err(CatalogError::from)
}

fn decode_rows(docs: &[Document], mode: DecodeMode) -> CatalogResult<Vec<Variant>> {
    let mut variants = Vec::with_capacity(docs.len());
    for doc in docs {
        match decode_row(doc) {
            Ok(variant) => variants.push(variant),
            Err(e) if mode == DecodeMode::Lenient => {
                tracing::warn!(variant_id = %doc.id, error = %e, "skipping malformed variant row");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(variants)
}

pub fn create_ops(variants: &[Variant]) -> CatalogResult<Vec<WriteOp>> {
    variants
        .iter()
        .map(|v| WriteOp::set(&v.to_persisted()).map_err(CatalogError::from))
        .collect()
}

/// Fields written onto a variant when `promotion` is applied to it.
pub fn promotion_patch(promotion: &Promotion, base_price: f64) -> JsonMap {
    let priced = calculate_price_with_promotion(base_price, promotion);
    patch([
        ("promotionId", json!(promotion.id)),
        ("discountType", json!(promotion.discount_type)),
        ("discountValue", json!(promotion.discount_value)),
        ("discountedPrice", json!(priced.current_price)),
        ("originalPrice", json!(base_price)),
    ])
}

/// Fields removed from a variant when its promotion goes away.
pub fn clear_promotion_patch() -> JsonMap {
    patch(
        ["promotionId", "discountType", "discountValue", "discountedPrice", "originalPrice"]
            .map(|field| (field, JsonValue::Null)),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use storefront_catalog::DiscountType;

    use super::*;
    use crate::store::InMemoryDocumentStore;

    fn seeded() -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.seed("productVariants", "v1", json!({"productId": "p1", "colorName": "Red", "sizeName": "41", "stock": 2}));
        store.seed("productVariants", "v2", json!({"productId": "p1", "colorName": "Red", "sizeName": "42", "stock": "lots"}));
        store.seed("productVariants", "v3", json!({"productId": "p2", "colorName": "Blue", "sizeName": "41", "stock": 1}));
        store
    }

    #[tokio::test]
    async fn strict_fails_and_lenient_skips_malformed_rows() {
        let variants = VariantStore::new(seeded());
        let p1 = ProductId::new("p1");

        let err = variants.variants_for_product(&p1, DecodeMode::Strict).await.unwrap_err();
        assert!(matches!(err, CatalogError::Malformed(_)));

        let rows = variants.variants_for_product(&p1, DecodeMode::Lenient).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, VariantId::new("v1"));
    }

    #[tokio::test]
    async fn batched_reads_group_by_product() {
        let store = seeded();
        let ids: Vec<ProductId> = (0..45).map(|i| ProductId::new(format!("x{i}"))).chain([ProductId::new("p2")]).collect();

        let grouped = VariantStore::new(store)
            .variants_for_products(&ids, DecodeMode::Lenient)
            .await
            .unwrap();

        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[&ProductId::new("p2")].len(), 1);
    }

    #[tokio::test]
    async fn promotion_patch_round_trip() {
        let store = seeded();
        let variants = VariantStore::new(store.clone());
        let now = Utc::now();
        let promo = Promotion::new(
            PromotionId::new("P1"),
            DiscountType::Percentage,
            25.0,
            now - Duration::days(1),
            now + Duration::days(1),
        );

        store
            .batch_write(vec![WriteOp::merge("productVariants", "v1", promotion_patch(&promo, 80.0))])
            .await
            .unwrap();
        let v1 = variants.get_variant(&VariantId::new("v1")).await.unwrap().unwrap();
        assert!(v1.has_promotion_fields());
        assert_eq!(v1.discounted_price, Some(60.0));
        assert_eq!(variants.variants_with_promotion(&promo.id).await.unwrap().len(), 1);

        store
            .batch_write(vec![WriteOp::merge("productVariants", "v1", clear_promotion_patch())])
            .await
            .unwrap();
        let v1 = variants.get_variant(&VariantId::new("v1")).await.unwrap().unwrap();
        assert!(!v1.has_promotion_fields());
        assert_eq!(v1.stock, 2);
    }

    #[tokio::test]
    async fn delete_removes_only_that_product() {
        let store = seeded();
        let variants = VariantStore::new(store.clone());

        assert_eq!(variants.delete_variants_for_product(&ProductId::new("p1")).await.unwrap(), 2);
        assert_eq!(store.count("productVariants"), 1);
    }
}
