//! Promotion mutations.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;

use storefront_catalog::{AppliedPromotion, DiscountType, Promotion, PromotionTarget, Variant};
use storefront_core::{Entity, ProductId, PromotionId, VariantId};

use super::{ProductAggregator, report};
use crate::cache::KeyPattern;
use crate::error::{CatalogError, CatalogResult};
use crate::store::{DocumentStore, Filter, WriteOp};
use crate::variants::{DecodeMode, clear_promotion_patch, promotion_patch};

/// Reject promotions that could never price correctly.
pub fn validate_promotion(promotion: &Promotion) -> CatalogResult<()> {
    if promotion.end_date < promotion.start_date {
        return Err(CatalogError::validation("promotion ends before it starts"));
    }
    if !promotion.discount_value.is_finite() || promotion.discount_value < 0.0 {
        return Err(CatalogError::validation("discount value must be a non-negative number"));
    }
    if promotion.discount_type == DiscountType::Percentage && promotion.discount_value > 100.0 {
        return Err(CatalogError::validation("percentage discount cannot exceed 100"));
    }
    Ok(())
}

/// Promotions the product's variants stop carrying once every variant in `changed`
/// carries `next` instead.
fn released_promotions(
    variants: &[Variant],
    changed: &BTreeSet<&VariantId>,
    next: Option<&PromotionId>,
) -> BTreeSet<PromotionId> {
    let before: BTreeSet<&PromotionId> = variants.iter().filter_map(|v| v.promotion_id.as_ref()).collect();
    let after: BTreeSet<&PromotionId> = variants
        .iter()
        .filter_map(|v| if changed.contains(&v.id) { next } else { v.promotion_id.as_ref() })
        .collect();
    before.difference(&after).map(|id| (*id).clone()).collect()
}

/// Deletes for the records a promotion change leaves behind: the per-variant record of
/// every replaced promotion and the product-level record of every released one.
fn stale_record_ops(
    product_id: &ProductId,
    variants: &[Variant],
    changed: &BTreeSet<&VariantId>,
    next: Option<&PromotionId>,
) -> (Vec<WriteOp>, BTreeSet<PromotionId>) {
    let mut ops: Vec<WriteOp> = variants
        .iter()
        .filter(|v| changed.contains(&v.id))
        .filter_map(|v| v.promotion_id.as_ref().filter(|prev| Some(*prev) != next).map(|prev| (prev, &v.id)))
        .map(|(prev, variant_id)| {
            WriteOp::delete(AppliedPromotion::COLLECTION, AppliedPromotion::record_id(prev, variant_id.as_str()))
        })
        .collect();
    let released = released_promotions(variants, changed, next);
    ops.extend(released.iter().map(|prev| {
        WriteOp::delete(AppliedPromotion::COLLECTION, AppliedPromotion::record_id(prev, product_id.as_str()))
    }));
    (ops, released)
}

impl<S> ProductAggregator<S>
where
    S: DocumentStore + Clone,
{
    /// Write a promotion onto one variant and record the application.
    pub async fn apply_promotion_to_variant(
        &self,
        product_id: &ProductId,
        variant_id: &VariantId,
        promotion_id: &PromotionId,
    ) -> bool {
        match self.try_apply_to_variant(product_id, variant_id, promotion_id).await {
            Ok((promotion, released)) => {
                self.cache.invalidate_product(product_id);
                tracing::info!(product_id = %product_id, variant_id = %variant_id, promotion_id = %promotion_id, "promotion applied to variant");
                for prev in &released {
                    self.promotions.notify_promotion_removed(product_id, prev);
                }
                self.promotions.notify_promotion_applied(product_id, &promotion);
                true
            }
            Err(e) => {
                report("apply_promotion_to_variant", &e);
                false
            }
        }
    }

    async fn try_apply_to_variant(
        &self,
        product_id: &ProductId,
        variant_id: &VariantId,
        promotion_id: &PromotionId,
    ) -> CatalogResult<(Promotion, BTreeSet<PromotionId>)> {
        let promotion = self.live_promotion(promotion_id).await?;
        let product = self
            .load_base_product(product_id)
            .await?
            .ok_or_else(|| CatalogError::not_found("product", product_id))?;
        let variant = self.owned_variant(product_id, variant_id).await?;
        let siblings = self.variants.variants_for_product(product_id, DecodeMode::Lenient).await?;
        let (stale, released) = stale_record_ops(
            product_id,
            &siblings,
            &BTreeSet::from([variant_id]),
            Some(promotion_id),
        );

        let base_price = variant.price.unwrap_or(product.price);
        let record = AppliedPromotion::new(
            &promotion,
            PromotionTarget::Variant,
            variant_id.as_str(),
            product_id.clone(),
            Utc::now(),
        );
        let mut ops = vec![
            WriteOp::merge(Variant::COLLECTION, variant_id.as_str(), promotion_patch(&promotion, base_price)),
            WriteOp::set(&record)?,
        ];
        ops.extend(stale);
        self.store.batch_write(ops).await?;
        Ok((promotion, released))
    }

    /// Clear a variant's promotion fields. A variant without a promotion is left as is.
    ///
    /// Subscribers hear of the removal once no variant of the product carries the
    /// promotion any more.
    pub async fn remove_promotion_from_variant(&self, product_id: &ProductId, variant_id: &VariantId) -> bool {
        match self.try_remove_from_variant(product_id, variant_id).await {
            Ok(released) => {
                self.cache.invalidate_product(product_id);
                for promotion_id in &released {
                    tracing::info!(product_id = %product_id, variant_id = %variant_id, promotion_id = %promotion_id, "promotion removed from variant");
                    self.promotions.notify_promotion_removed(product_id, promotion_id);
                }
                true
            }
            Err(e) => {
                report("remove_promotion_from_variant", &e);
                false
            }
        }
    }

    async fn try_remove_from_variant(
        &self,
        product_id: &ProductId,
        variant_id: &VariantId,
    ) -> CatalogResult<BTreeSet<PromotionId>> {
        let variant = self.owned_variant(product_id, variant_id).await?;
        if variant.promotion_id.is_none() {
            return Ok(BTreeSet::new());
        }
        let siblings = self.variants.variants_for_product(product_id, DecodeMode::Lenient).await?;
        let (stale, released) = stale_record_ops(product_id, &siblings, &BTreeSet::from([variant_id]), None);

        let mut ops = vec![WriteOp::merge(Variant::COLLECTION, variant_id.as_str(), clear_promotion_patch())];
        ops.extend(stale);
        self.store.batch_write(ops).await?;
        Ok(released)
    }

    /// Apply a promotion to every variant of a product.
    pub async fn apply_promotion_to_product(&self, product_id: &ProductId, promotion_id: &PromotionId) -> bool {
        match self.try_apply_to_product(product_id, promotion_id).await {
            Ok((promotion, count, released)) => {
                self.cache.invalidate_product(product_id);
                tracing::info!(product_id = %product_id, promotion_id = %promotion_id, variants = count, "promotion applied to product");
                for prev in &released {
                    self.promotions.notify_promotion_removed(product_id, prev);
                }
                self.promotions.notify_promotion_applied(product_id, &promotion);
                true
            }
            Err(e) => {
                report("apply_promotion_to_product", &e);
                false
            }
        }
    }

    async fn try_apply_to_product(
        &self,
        product_id: &ProductId,
        promotion_id: &PromotionId,
    ) -> CatalogResult<(Promotion, usize, BTreeSet<PromotionId>)> {
        let promotion = self.live_promotion(promotion_id).await?;
        let product = self
            .load_base_product(product_id)
            .await?
            .ok_or_else(|| CatalogError::not_found("product", product_id))?;
        let variants = self.variants.variants_for_product(product_id, DecodeMode::Lenient).await?;

        let mut ops: Vec<WriteOp> = variants
            .iter()
            .map(|v| {
                WriteOp::merge(
                    Variant::COLLECTION,
                    v.id.as_str(),
                    promotion_patch(&promotion, v.price.unwrap_or(product.price)),
                )
            })
            .collect();
        let record = AppliedPromotion::new(
            &promotion,
            PromotionTarget::Product,
            product_id.as_str(),
            product_id.clone(),
            Utc::now(),
        );
        ops.push(WriteOp::set(&record)?);
        let every: BTreeSet<&VariantId> = variants.iter().map(|v| &v.id).collect();
        let (stale, released) = stale_record_ops(product_id, &variants, &every, Some(promotion_id));
        ops.extend(stale);

        self.store.batch_write(ops).await?;
        Ok((promotion, variants.len(), released))
    }

    /// Store a new promotion. An empty id is replaced by a generated one.
    pub async fn create_promotion(&self, mut promotion: Promotion) -> Option<Promotion> {
        if promotion.id.is_empty() {
            promotion.id = PromotionId::generate();
        }
        let result = async {
            validate_promotion(&promotion)?;
            self.store.batch_write(vec![WriteOp::set(&promotion)?]).await?;
            Ok::<_, CatalogError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.cache.invalidate_matching(&KeyPattern::AllProducts);
                tracing::info!(promotion_id = %promotion.id, "promotion created");
                self.promotions.notify_promotion_created(&promotion);
                Some(promotion)
            }
            Err(e) => {
                report("create_promotion", &e);
                None
            }
        }
    }

    /// Replace a stored promotion and re-price every variant carrying it.
    pub async fn update_promotion(&self, promotion: Promotion) -> bool {
        match self.try_update_promotion(&promotion).await {
            Ok(repriced) => {
                self.cache.invalidate_matching(&KeyPattern::AllProducts);
                tracing::info!(promotion_id = %promotion.id, variants = repriced, "promotion updated");
                self.promotions.notify_promotion_updated(&promotion);
                true
            }
            Err(e) => {
                report("update_promotion", &e);
                false
            }
        }
    }

    async fn try_update_promotion(&self, promotion: &Promotion) -> CatalogResult<usize> {
        validate_promotion(promotion)?;
        self.load_promotion(&promotion.id).await?;

        let variants = self.variants.variants_with_promotion(&promotion.id).await?;
        let prices = self.base_prices(&variants).await?;

        let mut ops = vec![WriteOp::set(promotion)?];
        for variant in &variants {
            let base = variant
                .original_price
                .or(variant.price)
                .or_else(|| prices.get(&variant.product_id).copied());
            if let Some(base) = base {
                ops.push(WriteOp::merge(
                    Variant::COLLECTION,
                    variant.id.as_str(),
                    promotion_patch(promotion, base),
                ));
            }
        }
        let repriced = ops.len() - 1;

        self.store.batch_write(ops).await?;
        Ok(repriced)
    }

    /// Delete a promotion together with every variant field and record pointing at it.
    pub async fn delete_promotion(&self, promotion_id: &PromotionId) -> bool {
        match self.try_delete_promotion(promotion_id).await {
            Ok((promotion, products)) => {
                self.cache.invalidate_matching(&KeyPattern::AllProducts);
                tracing::info!(promotion_id = %promotion_id, products = products.len(), "promotion deleted");
                self.promotions.notify_promotion_deleted(&promotion);
                true
            }
            Err(e) => {
                report("delete_promotion", &e);
                false
            }
        }
    }

    async fn try_delete_promotion(
        &self,
        promotion_id: &PromotionId,
    ) -> CatalogResult<(Promotion, BTreeSet<ProductId>)> {
        let promotion = self.load_promotion(promotion_id).await?;
        let variants = self.variants.variants_with_promotion(promotion_id).await?;
        let records = self
            .store
            .query(
                AppliedPromotion::COLLECTION,
                &[Filter::eq("promotionId", promotion_id.as_str())],
            )
            .await?;

        let mut ops = vec![WriteOp::delete(Promotion::COLLECTION, promotion_id.as_str())];
        ops.extend(
            variants
                .iter()
                .map(|v| WriteOp::merge(Variant::COLLECTION, v.id.as_str(), clear_promotion_patch())),
        );
        ops.extend(
            records
                .iter()
                .map(|r| WriteOp::delete(AppliedPromotion::COLLECTION, r.id.clone())),
        );
        self.store.batch_write(ops).await?;

        let products = variants.into_iter().map(|v| v.product_id).collect();
        Ok((promotion, products))
    }

    async fn live_promotion(&self, promotion_id: &PromotionId) -> CatalogResult<Promotion> {
        let promotion = self.load_promotion(promotion_id).await?;
        if !promotion.is_live(Utc::now()) {
            return Err(CatalogError::validation(format!(
                "promotion {promotion_id} is inactive or outside its validity window"
            )));
        }
        Ok(promotion)
    }

    async fn owned_variant(&self, product_id: &ProductId, variant_id: &VariantId) -> CatalogResult<Variant> {
        variant_id.ensure_present()?;
        let variant = self
            .variants
            .get_variant(variant_id)
            .await?
            .ok_or_else(|| CatalogError::not_found("variant", variant_id))?;
        if &variant.product_id != product_id {
            return Err(CatalogError::validation(format!(
                "variant {variant_id} does not belong to product {product_id}"
            )));
        }
        Ok(variant)
    }

    /// Product prices for variants that carry no price of their own.
    async fn base_prices(&self, variants: &[Variant]) -> CatalogResult<HashMap<ProductId, f64>> {
        let needed: BTreeSet<&ProductId> = variants
            .iter()
            .filter(|v| v.original_price.is_none() && v.price.is_none())
            .map(|v| &v.product_id)
            .collect();

        let mut prices = HashMap::new();
        for product_id in needed {
            if let Some(product) = self.load_base_product(product_id).await? {
                prices.insert(product_id.clone(), product.price);
            }
        }
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn promo(kind: DiscountType, value: f64) -> Promotion {
        let now = Utc::now();
        Promotion::new(PromotionId::new("P1"), kind, value, now, now + Duration::days(7))
    }

    fn variant(id: &str, promotion: Option<&str>) -> Variant {
        let mut v = Variant::new(VariantId::new(id), ProductId::new("p1"), "Red", id, 1);
        v.promotion_id = promotion.map(PromotionId::new);
        v
    }

    #[test]
    fn replacing_the_last_carrier_releases_the_previous_promotion() {
        let variants = vec![variant("41", Some("P1")), variant("42", Some("P1")), variant("43", None)];
        let v41 = VariantId::new("41");
        let v42 = VariantId::new("42");
        let p2 = PromotionId::new("P2");

        let one = BTreeSet::from([&v41]);
        assert!(released_promotions(&variants, &one, Some(&p2)).is_empty());

        let both = BTreeSet::from([&v41, &v42]);
        assert_eq!(
            released_promotions(&variants, &both, Some(&p2)),
            BTreeSet::from([PromotionId::new("P1")])
        );
        assert_eq!(
            released_promotions(&variants, &both, None),
            BTreeSet::from([PromotionId::new("P1")])
        );
    }

    #[test]
    fn reapplying_the_same_promotion_deletes_nothing() {
        let variants = vec![variant("41", Some("P1"))];
        let v41 = VariantId::new("41");
        let p1 = PromotionId::new("P1");

        let (ops, released) = stale_record_ops(&ProductId::new("p1"), &variants, &BTreeSet::from([&v41]), Some(&p1));
        assert!(ops.is_empty());
        assert!(released.is_empty());

        let p2 = PromotionId::new("P2");
        let (ops, released) = stale_record_ops(&ProductId::new("p1"), &variants, &BTreeSet::from([&v41]), Some(&p2));
        assert_eq!(ops.len(), 2);
        assert_eq!(released, BTreeSet::from([p1]));
    }

    #[test]
    fn promotion_validation() {
        assert!(validate_promotion(&promo(DiscountType::Percentage, 30.0)).is_ok());
        assert!(validate_promotion(&promo(DiscountType::Fixed, 250.0)).is_ok());
        assert!(validate_promotion(&promo(DiscountType::Percentage, 130.0)).is_err());
        assert!(validate_promotion(&promo(DiscountType::Fixed, -1.0)).is_err());

        let mut backwards = promo(DiscountType::Fixed, 5.0);
        backwards.end_date = backwards.start_date - Duration::days(1);
        assert!(matches!(validate_promotion(&backwards), Err(CatalogError::Validation(_))));
    }
}
