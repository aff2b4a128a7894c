//! Consistency checks over the raw documents.
//!
//! Reads bypass the cache: the point is to compare what is stored, not what was
//! derived from it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use storefront_catalog::{AppliedPromotion, Product, Promotion, Variant};
use storefront_core::{Entity, ProductId, PromotionId, VariantId};

use super::{ProductAggregator, decode_lenient, report};
use crate::cache::KeyPattern;
use crate::error::CatalogResult;
use crate::store::{DocumentStore, WriteOp};
use crate::variants::{DecodeMode, clear_promotion_patch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InconsistencyWarning {
    /// A variant points at a promotion that no longer exists.
    OrphanedVariantPromotion {
        product_id: ProductId,
        variant_id: VariantId,
        promotion_id: PromotionId,
    },
    /// An applied-promotion record points at a promotion that no longer exists.
    OrphanedAppliedPromotion {
        record_id: String,
        promotion_id: PromotionId,
    },
    /// The stored `totalStock` differs from the sum of the variant rows.
    TotalStockDivergence {
        product_id: ProductId,
        stored: u32,
        derived: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub checked_at: DateTime<Utc>,
    pub products_checked: usize,
    pub variants_checked: usize,
    pub warnings: Vec<InconsistencyWarning>,
}

impl ConsistencyReport {
    pub fn empty() -> Self {
        Self {
            checked_at: Utc::now(),
            products_checked: 0,
            variants_checked: 0,
            warnings: Vec::new(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn orphaned_variants(&self) -> Vec<&VariantId> {
        self.warnings
            .iter()
            .filter_map(|w| match w {
                InconsistencyWarning::OrphanedVariantPromotion { variant_id, .. } => Some(variant_id),
                _ => None,
            })
            .collect()
    }
}

/// Every inconsistency between the stored documents.
///
/// Warnings are ordered: orphaned variants, orphaned records, then stock divergence,
/// each in input order.
pub fn find_inconsistencies(
    products: &[Product],
    variants: &[Variant],
    promotion_ids: &HashSet<PromotionId>,
    applied: &[AppliedPromotion],
) -> Vec<InconsistencyWarning> {
    let mut warnings = Vec::new();

    for variant in variants {
        if let Some(promotion_id) = &variant.promotion_id {
            if !promotion_ids.contains(promotion_id) {
                warnings.push(InconsistencyWarning::OrphanedVariantPromotion {
                    product_id: variant.product_id.clone(),
                    variant_id: variant.id.clone(),
                    promotion_id: promotion_id.clone(),
                });
            }
        }
    }

    for record in applied {
        if !promotion_ids.contains(&record.promotion_id) {
            warnings.push(InconsistencyWarning::OrphanedAppliedPromotion {
                record_id: record.id.clone(),
                promotion_id: record.promotion_id.clone(),
            });
        }
    }

    let mut derived: HashMap<&ProductId, u32> = HashMap::new();
    for variant in variants {
        let total = derived.entry(&variant.product_id).or_default();
        *total = total.saturating_add(variant.stock);
    }
    for product in products {
        let sum = derived.get(&product.id).copied().unwrap_or(0);
        if product.total_stock != sum {
            warnings.push(InconsistencyWarning::TotalStockDivergence {
                product_id: product.id.clone(),
                stored: product.total_stock,
                derived: sum,
            });
        }
    }

    warnings
}

struct Snapshot {
    products: Vec<Product>,
    variants: Vec<Variant>,
    promotion_ids: HashSet<PromotionId>,
    applied: Vec<AppliedPromotion>,
}

impl<S> ProductAggregator<S>
where
    S: DocumentStore + Clone,
{
    /// Check the stored documents for orphaned promotion references and stock drift.
    ///
    /// Returns an empty report if the store cannot be read.
    pub async fn diagnose(&self) -> ConsistencyReport {
        match self.snapshot().await {
            Ok(snapshot) => {
                let warnings = find_inconsistencies(
                    &snapshot.products,
                    &snapshot.variants,
                    &snapshot.promotion_ids,
                    &snapshot.applied,
                );
                for warning in &warnings {
                    tracing::warn!(?warning, "inconsistency detected");
                }
                ConsistencyReport {
                    checked_at: Utc::now(),
                    products_checked: snapshot.products.len(),
                    variants_checked: snapshot.variants.len(),
                    warnings,
                }
            }
            Err(e) => {
                report("diagnose", &e);
                ConsistencyReport::empty()
            }
        }
    }

    /// Clear orphaned variant promotion fields and delete orphaned records.
    ///
    /// Returns the number of documents fixed, 0 on failure.
    pub async fn cleanup_orphaned_promotions(&self) -> usize {
        match self.try_cleanup().await {
            Ok(fixed) => {
                if fixed > 0 {
                    self.cache.invalidate_matching(&KeyPattern::AllProducts);
                    tracing::info!(fixed, "orphaned promotion references cleaned up");
                }
                fixed
            }
            Err(e) => {
                report("cleanup_orphaned_promotions", &e);
                0
            }
        }
    }

    async fn try_cleanup(&self) -> CatalogResult<usize> {
        let snapshot = self.snapshot().await?;
        let ops: Vec<WriteOp> = find_inconsistencies(
            &snapshot.products,
            &snapshot.variants,
            &snapshot.promotion_ids,
            &snapshot.applied,
        )
        .into_iter()
        .filter_map(|warning| match warning {
            InconsistencyWarning::OrphanedVariantPromotion { variant_id, .. } => Some(WriteOp::merge(
                Variant::COLLECTION,
                variant_id.as_str(),
                clear_promotion_patch(),
            )),
            InconsistencyWarning::OrphanedAppliedPromotion { record_id, .. } => {
                Some(WriteOp::delete(AppliedPromotion::COLLECTION, record_id))
            }
            InconsistencyWarning::TotalStockDivergence { .. } => None,
        })
        .collect();

        let fixed = ops.len();
        if fixed > 0 {
            self.store.batch_write(ops).await?;
        }
        Ok(fixed)
    }

    async fn snapshot(&self) -> CatalogResult<Snapshot> {
        let product_docs = self.store.query(Product::COLLECTION, &[]).await?;
        let promotion_docs = self.store.query(Promotion::COLLECTION, &[]).await?;
        let applied_docs = self.store.query(AppliedPromotion::COLLECTION, &[]).await?;
        let variants = self.variants.all_variants(DecodeMode::Lenient).await?;

        Ok(Snapshot {
            products: product_docs.iter().filter_map(decode_lenient::<Product>).collect(),
            variants,
            // Existence is what matters; a promotion that fails to decode still exists.
            promotion_ids: promotion_docs.iter().map(|d| PromotionId::new(d.id.clone())).collect(),
            applied: applied_docs.iter().filter_map(decode_lenient::<AppliedPromotion>).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(id: &str, product: &str, stock: u32, promotion: Option<&str>) -> Variant {
        let mut v = Variant::new(VariantId::new(id), ProductId::new(product), "Red", "41", stock);
        v.promotion_id = promotion.map(PromotionId::new);
        v
    }

    #[test]
    fn orphaned_variant_promotion_is_listed_once() {
        let variants = vec![
            variant("v1", "p1", 1, Some("P1")),
            variant("v2", "p1", 1, Some("P2")),
            variant("v3", "p1", 1, None),
        ];
        let existing: HashSet<PromotionId> = [PromotionId::new("P2")].into();

        let warnings = find_inconsistencies(&[], &variants, &existing, &[]);

        assert_eq!(
            warnings,
            vec![InconsistencyWarning::OrphanedVariantPromotion {
                product_id: ProductId::new("p1"),
                variant_id: VariantId::new("v1"),
                promotion_id: PromotionId::new("P1"),
            }]
        );
    }

    #[test]
    fn stored_total_is_compared_with_variant_sum() {
        let mut product = Product::new(ProductId::new("p1"), "Runner", 10.0);
        product.total_stock = 9;
        let variants = vec![variant("v1", "p1", 2, None), variant("v2", "p1", 3, None)];

        let warnings = find_inconsistencies(&[product.clone()], &variants, &HashSet::new(), &[]);
        assert_eq!(
            warnings,
            vec![InconsistencyWarning::TotalStockDivergence {
                product_id: ProductId::new("p1"),
                stored: 9,
                derived: 5,
            }]
        );

        product.total_stock = 5;
        assert!(find_inconsistencies(&[product], &variants, &HashSet::new(), &[]).is_empty());
    }
}
