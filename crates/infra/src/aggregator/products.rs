//! Product lifecycle: create, update with variant grid sync, delete with cascade.

use std::collections::BTreeSet;

use storefront_catalog::{AppliedPromotion, Product, Variant, fold_variant_stock, initial_stock, variant_grid};
use storefront_core::{Entity, ProductId, PromotionId, VariantId};

use super::{ProductAggregator, report};
use crate::error::{CatalogError, CatalogResult};
use crate::store::{DocumentStore, Filter, WriteOp};
use crate::variants::{DecodeMode, create_ops};

/// Changes needed to bring a product's variant rows in line with its color×size grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridSync {
    pub create: Vec<Variant>,
    pub delete: Vec<Variant>,
    pub keep: Vec<Variant>,
}

fn variant_sku(product: &Product, color: &str, size: &str) -> String {
    if product.sku.is_empty() {
        return String::new();
    }
    format!("{}-{}-{}", product.sku, color, size).to_uppercase().replace(' ', "-")
}

/// Variants for every grid combination, stocked from `sizes[].color_stocks`.
pub fn build_variants(product: &Product) -> Vec<Variant> {
    variant_grid(product)
        .into_iter()
        .map(|(color, size)| {
            let mut variant = Variant::new(
                VariantId::generate(),
                product.id.clone(),
                color.as_str(),
                size.as_str(),
                initial_stock(product, &color, &size),
            );
            variant.sku = variant_sku(product, &color, &size);
            variant
        })
        .collect()
}

/// Compare existing rows with the product's grid.
///
/// Combinations missing a row get a new one with stock 0; rows whose combination
/// left the grid are deleted. Duplicate rows for one combination keep the first.
pub fn sync_variant_grid(product: &Product, existing: Vec<Variant>) -> GridSync {
    let grid = variant_grid(product);
    let mut sync = GridSync::default();

    for variant in existing {
        let in_grid = grid.iter().any(|(c, s)| variant.matches(c, s));
        let duplicate = sync
            .keep
            .iter()
            .any(|k| k.matches(&variant.color_name, &variant.size_name));
        if in_grid && !duplicate {
            sync.keep.push(variant);
        } else {
            sync.delete.push(variant);
        }
    }

    for (color, size) in grid {
        if !sync.keep.iter().any(|v| v.matches(&color, &size)) {
            let mut variant = Variant::new(VariantId::generate(), product.id.clone(), color.as_str(), size.as_str(), 0);
            variant.sku = variant_sku(product, &color, &size);
            sync.create.push(variant);
        }
    }

    sync
}

fn validate_product(product: &Product) -> CatalogResult<()> {
    if product.name.trim().is_empty() {
        return Err(CatalogError::validation("product name is required"));
    }
    if !product.price.is_finite() || product.price < 0.0 {
        return Err(CatalogError::validation("product price must be a non-negative number"));
    }
    Ok(())
}

impl<S> ProductAggregator<S>
where
    S: DocumentStore + Clone,
{
    /// Store a new product and one variant per color×size combination.
    ///
    /// Returns the enriched product as read back from the store.
    pub async fn create_product(&self, mut product: Product) -> Option<Product> {
        if product.id.is_empty() {
            product.id = ProductId::generate();
        }
        match self.try_create_product(&mut product).await {
            Ok(variants) => {
                self.cache.invalidate_product(&product.id);
                tracing::info!(product_id = %product.id, variants, "product created");
                self.get_complete_product(&product.id).await
            }
            Err(e) => {
                report("create_product", &e);
                None
            }
        }
    }

    async fn try_create_product(&self, product: &mut Product) -> CatalogResult<usize> {
        validate_product(product)?;
        if self.load_base_product(&product.id).await?.is_some() {
            return Err(CatalogError::validation(format!("product {} already exists", product.id)));
        }

        let variants = build_variants(product);
        fold_variant_stock(product, &variants);

        let mut ops = vec![WriteOp::set(&product.to_persisted())?];
        ops.extend(create_ops(&variants)?);
        self.store.batch_write(ops).await?;
        Ok(variants.len())
    }

    /// Replace a product document and re-sync its variant grid.
    pub async fn update_product(&self, mut product: Product) -> Option<Product> {
        match self.try_update_product(&mut product).await {
            Ok(sync) => {
                self.cache.invalidate_product(&product.id);
                tracing::info!(
                    product_id = %product.id,
                    created = sync.create.len(),
                    deleted = sync.delete.len(),
                    "product updated"
                );
                self.get_complete_product(&product.id).await
            }
            Err(e) => {
                report("update_product", &e);
                None
            }
        }
    }

    async fn try_update_product(&self, product: &mut Product) -> CatalogResult<GridSync> {
        product.id.ensure_present()?;
        validate_product(product)?;
        if self.load_base_product(&product.id).await?.is_none() {
            return Err(CatalogError::not_found("product", &product.id));
        }

        let existing = self.variants.variants_for_product(&product.id, DecodeMode::Lenient).await?;
        let sync = sync_variant_grid(product, existing);

        let remaining: Vec<Variant> = sync.keep.iter().chain(&sync.create).cloned().collect();
        fold_variant_stock(product, &remaining);

        let mut ops = vec![WriteOp::set(&product.to_persisted())?];
        ops.extend(create_ops(&sync.create)?);
        for variant in &sync.delete {
            ops.push(WriteOp::delete(Variant::COLLECTION, variant.id.as_str()));
            if let Some(promotion_id) = &variant.promotion_id {
                ops.push(WriteOp::delete(
                    AppliedPromotion::COLLECTION,
                    AppliedPromotion::record_id(promotion_id, variant.id.as_str()),
                ));
            }
        }
        self.store.batch_write(ops).await?;
        Ok(sync)
    }

    /// Delete a product, its variants and every promotion record pointing at it.
    pub async fn delete_product(&self, product_id: &ProductId) -> bool {
        match self.try_delete_product(product_id).await {
            Ok(promotions) => {
                self.cache.invalidate_product(product_id);
                self.stock.forget(product_id);
                for promotion_id in &promotions {
                    self.promotions.notify_promotion_removed(product_id, promotion_id);
                }
                self.promotions.forget_product(product_id);
                tracing::info!(product_id = %product_id, "product deleted");
                true
            }
            Err(e) => {
                report("delete_product", &e);
                false
            }
        }
    }

    async fn try_delete_product(&self, product_id: &ProductId) -> CatalogResult<BTreeSet<PromotionId>> {
        if self.load_base_product(product_id).await?.is_none() {
            return Err(CatalogError::not_found("product", product_id));
        }

        let variants = self
            .store
            .query(Variant::COLLECTION, &[Filter::eq("productId", product_id.as_str())])
            .await?;
        let records = self
            .store
            .query(AppliedPromotion::COLLECTION, &[Filter::eq("productId", product_id.as_str())])
            .await?;

        let promotions: BTreeSet<PromotionId> = records
            .iter()
            .filter_map(|r| r.field("promotionId").and_then(|v| v.as_str()))
            .map(PromotionId::from)
            .collect();

        let mut ops = vec![WriteOp::delete(Product::COLLECTION, product_id.as_str())];
        ops.extend(variants.iter().map(|d| WriteOp::delete(Variant::COLLECTION, d.id.clone())));
        ops.extend(records.iter().map(|d| WriteOp::delete(AppliedPromotion::COLLECTION, d.id.clone())));
        self.store.batch_write(ops).await?;

        Ok(promotions)
    }
}

#[cfg(test)]
mod tests {
    use storefront_catalog::{Color, ColorStock, Size};

    use super::*;

    fn product() -> Product {
        let mut p = Product::new(ProductId::new("p1"), "Runner", 100.0);
        p.sku = "run".into();
        p.colors = vec![Color::named("Red"), Color::named("Blue")];
        p.sizes = vec![Size::named("41"), Size::named("42")];
        p.sizes[1].color_stocks = vec![ColorStock { color_name: "Blue".into(), stock: 7 }];
        p
    }

    #[test]
    fn new_products_get_the_full_grid() {
        let variants = build_variants(&product());

        assert_eq!(variants.len(), 4);
        let blue_42 = variants.iter().find(|v| v.matches("Blue", "42")).unwrap();
        assert_eq!(blue_42.stock, 7);
        assert_eq!(blue_42.sku, "RUN-BLUE-42");
        assert_eq!(variants.iter().map(|v| v.stock).sum::<u32>(), 7);
    }

    #[test]
    fn grid_sync_creates_missing_and_deletes_removed() {
        let mut p = product();
        p.colors.pop(); // Blue dropped

        let existing = vec![
            Variant::new(VariantId::new("a"), p.id.clone(), "Red", "41", 3),
            Variant::new(VariantId::new("b"), p.id.clone(), "Blue", "42", 7),
            Variant::new(VariantId::new("c"), p.id.clone(), "Red", "41", 1),
        ];
        let sync = sync_variant_grid(&p, existing);

        let kept: Vec<&str> = sync.keep.iter().map(|v| v.id.as_str()).collect();
        let deleted: Vec<&str> = sync.delete.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(kept, vec!["a"]);
        assert_eq!(deleted, vec!["b", "c"]);
        assert_eq!(sync.create.len(), 1);
        assert!(sync.create[0].matches("Red", "42"));
        assert_eq!(sync.create[0].stock, 0);
    }

    #[test]
    fn products_need_a_name_and_a_price() {
        let mut p = product();
        p.name = "  ".into();
        assert!(validate_product(&p).is_err());

        let mut p = product();
        p.price = -1.0;
        assert!(validate_product(&p).is_err());
    }
}
