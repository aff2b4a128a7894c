//! Price engine: pure functions, no IO.
//!
//! Money is carried as `f64` in the document store's units and rounded to cents on
//! every derived value. Discount percentages are whole numbers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::PromotionId;

use crate::product::{PricingFields, PricingSnapshot, Product};
use crate::promotion::{DiscountType, Promotion};
use crate::variant::Variant;

pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whole-number percentage that `current` is below `original` (never negative).
pub fn percent_off(original: f64, current: f64) -> f64 {
    if original <= 0.0 {
        return 0.0;
    }
    ((original - current) / original * 100.0).round().max(0.0)
}

/// Outcome of pricing a base amount with one promotion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionPrice {
    pub current_price: f64,
    pub discount_percentage: f64,
    pub savings: f64,
}

/// Which rule produced a variant's effective price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PriceSource {
    /// The variant carries a live promotion.
    VariantPromotion,
    /// The variant has its own price and no promotion.
    VariantPrice,
    /// Product-level price and discount.
    Product,
}

/// Effective price for a selected color+size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub current_price: f64,
    pub original_price: f64,
    pub discount_percentage: f64,
    pub source: PriceSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_id: Option<PromotionId>,
}

/// Fill in `current_price`, `original_price` and `discount_percentage`.
///
/// Idempotent: a product that already has `current_price` and
/// `discount_percentage` is returned unchanged.
pub fn calculate_discounted_price(mut product: Product) -> Product {
    if product.current_price.is_some() && product.discount_percentage.is_some() {
        return product;
    }

    let price = product.price;
    match (product.original_price, product.discount_percentage) {
        (Some(original), _) if original > price => {
            product.discount_percentage = Some(percent_off(original, price));
            product.current_price = Some(price);
        }
        (_, Some(discount)) if discount > 0.0 => {
            product.current_price = Some(round_money(price * (1.0 - discount / 100.0)));
            product.original_price = Some(price);
        }
        _ => {
            product.current_price = Some(price);
            product.original_price = Some(price);
            product.discount_percentage = Some(0.0);
        }
    }

    product
}

/// Price `base_price` under `promotion`.
///
/// Percentage discounts are clamped to `max_discount_amount` when set; fixed
/// discounts subtract the value directly; shipping promotions leave the item price
/// untouched. The result never goes below zero.
pub fn calculate_price_with_promotion(base_price: f64, promotion: &Promotion) -> PromotionPrice {
    let discount = match promotion.discount_type {
        DiscountType::Percentage => {
            let raw = base_price * promotion.discount_value / 100.0;
            match promotion.max_discount_amount {
                Some(max) if max >= 0.0 => raw.min(max),
                _ => raw,
            }
        }
        DiscountType::Fixed => promotion.discount_value,
        DiscountType::Shipping => 0.0,
    }
    .max(0.0);

    let current_price = round_money((base_price - discount).max(0.0));
    PromotionPrice {
        current_price,
        discount_percentage: percent_off(base_price, current_price),
        savings: round_money(base_price - current_price),
    }
}

/// Whether `promotion` currently applies to `product`.
///
/// Product-id scope wins over category scope; an unscoped promotion applies to
/// everything.
pub fn is_promotion_applicable(product: &Product, promotion: &Promotion, now: DateTime<Utc>) -> bool {
    if !promotion.is_live(now) || promotion.usage_exhausted() {
        return false;
    }

    if !promotion.applicable_product_ids.is_empty() {
        return promotion.applicable_product_ids.contains(&product.id);
    }

    if !promotion.applicable_categories.is_empty() {
        return promotion
            .applicable_categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&product.category));
    }

    true
}

/// Applicable promotion with the largest savings on `product.price`.
///
/// Ties keep the earlier promotion. Promotions that save nothing are ignored.
pub fn best_promotion_for<'a, I>(
    product: &Product,
    promotions: I,
    now: DateTime<Utc>,
) -> Option<(&'a Promotion, PromotionPrice)>
where
    I: IntoIterator<Item = &'a Promotion>,
{
    let mut best: Option<(&'a Promotion, PromotionPrice)> = None;

    for promotion in promotions {
        if !is_promotion_applicable(product, promotion, now) {
            continue;
        }
        let priced = calculate_price_with_promotion(product.price, promotion);
        if priced.savings <= 0.0 {
            continue;
        }
        if best.as_ref().is_none_or(|(_, current)| priced.savings > current.savings) {
            best = Some((promotion, priced));
        }
    }

    best
}

/// Product-level pricing: own discount fields, then the best stored promotion if
/// it beats them.
pub fn price_product<'a, I>(product: Product, promotions: I, now: DateTime<Utc>) -> Product
where
    I: IntoIterator<Item = &'a Promotion>,
{
    let stored = match product.pricing {
        Some(snapshot) => snapshot.stored,
        None => PricingFields::of(&product),
    };
    let mut priced = calculate_discounted_price(product);

    if let Some((_, promo)) = best_promotion_for(&priced, promotions, now) {
        if promo.current_price < priced.effective_price() {
            let original = priced.original_price.unwrap_or(priced.price).max(priced.price);
            priced.current_price = Some(promo.current_price);
            priced.original_price = Some(original);
            priced.discount_percentage = Some(percent_off(original, promo.current_price));
        }
    }

    priced.pricing = Some(PricingSnapshot {
        stored,
        derived: PricingFields::of(&priced),
    });
    priced
}

/// Resolve the effective price of a color+size selection.
///
/// Priority, most specific first:
/// 1. the variant carries a promotion that exists and is live,
/// 2. the variant has its own price (no discount),
/// 3. product-level `current_price`/`discount_percentage`.
///
/// A variant that points at a missing or expired promotion falls through to 2/3.
pub fn resolve_variant_price(
    product: &Product,
    variant: Option<&Variant>,
    promotions: &HashMap<PromotionId, Promotion>,
    now: DateTime<Utc>,
) -> PriceQuote {
    if let Some(variant) = variant {
        if let Some(quote) = variant_promotion_quote(product, variant, promotions, now) {
            return quote;
        }

        if let Some(price) = variant.price {
            return PriceQuote {
                current_price: price,
                original_price: price,
                discount_percentage: 0.0,
                source: PriceSource::VariantPrice,
                promotion_id: None,
            };
        }
    }

    product_quote(product)
}

fn variant_promotion_quote(
    product: &Product,
    variant: &Variant,
    promotions: &HashMap<PromotionId, Promotion>,
    now: DateTime<Utc>,
) -> Option<PriceQuote> {
    if !variant.has_promotion_fields() {
        return None;
    }
    let promotion_id = variant.promotion_id.as_ref()?;
    let promotion = promotions.get(promotion_id)?;
    if !promotion.is_live(now) {
        return None;
    }

    let original = variant.original_price.or(variant.price).unwrap_or(product.price);
    let current = variant
        .discounted_price
        .unwrap_or_else(|| calculate_price_with_promotion(original, promotion).current_price);

    Some(PriceQuote {
        current_price: current,
        original_price: original,
        discount_percentage: percent_off(original, current),
        source: PriceSource::VariantPromotion,
        promotion_id: Some(promotion_id.clone()),
    })
}

fn product_quote(product: &Product) -> PriceQuote {
    let (current_price, original_price, discount_percentage) =
        match (product.current_price, product.discount_percentage) {
            (Some(current), Some(discount)) => {
                (current, product.original_price.unwrap_or(product.price), discount)
            }
            _ => {
                let mut bare = Product::new(product.id.clone(), String::new(), product.price);
                bare.original_price = product.original_price;
                bare.discount_percentage = product.discount_percentage;
                let priced = calculate_discounted_price(bare);
                (
                    priced.current_price.unwrap_or(priced.price),
                    priced.original_price.unwrap_or(priced.price),
                    priced.discount_percentage.unwrap_or(0.0),
                )
            }
        };

    PriceQuote {
        current_price,
        original_price,
        discount_percentage,
        source: PriceSource::Product,
        promotion_id: None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use storefront_core::{ProductId, VariantId};

    use super::*;

    fn product(price: f64) -> Product {
        Product::new(ProductId::new("p1"), "Runner", price)
    }

    fn promotion(id: &str, kind: DiscountType, value: f64) -> Promotion {
        let now = Utc::now();
        Promotion::new(
            PromotionId::new(id),
            kind,
            value,
            now - Duration::days(1),
            now + Duration::days(1),
        )
    }

    fn promoted_variant(promotion_id: &str) -> Variant {
        let mut v = Variant::new(VariantId::new("v1"), ProductId::new("p1"), "Red", "42", 3);
        v.promotion_id = Some(PromotionId::new(promotion_id));
        v.discount_type = Some(DiscountType::Percentage);
        v.discount_value = Some(10.0);
        v.original_price = Some(120.0);
        v.discounted_price = Some(108.0);
        v
    }

    #[test]
    fn original_above_price_derives_discount() {
        let mut p = product(100.0);
        p.original_price = Some(150.0);

        let priced = calculate_discounted_price(p);
        assert_eq!(priced.current_price, Some(100.0));
        assert_eq!(priced.discount_percentage, Some(33.0));
        assert_eq!(priced.original_price, Some(150.0));
    }

    #[test]
    fn discount_percentage_derives_current_price() {
        let mut p = product(80.0);
        p.discount_percentage = Some(20.0);

        let priced = calculate_discounted_price(p);
        assert_eq!(priced.original_price, Some(80.0));
        assert_eq!(priced.current_price, Some(64.0));
    }

    #[test]
    fn plain_product_has_zero_discount() {
        let priced = calculate_discounted_price(product(50.0));
        assert_eq!(priced.current_price, Some(50.0));
        assert_eq!(priced.original_price, Some(50.0));
        assert_eq!(priced.discount_percentage, Some(0.0));
    }

    #[test]
    fn already_priced_product_is_left_alone() {
        let mut p = product(80.0);
        p.current_price = Some(70.0);
        p.discount_percentage = Some(5.0);

        assert_eq!(calculate_discounted_price(p.clone()), p);
    }

    #[test]
    fn percentage_promotion_is_clamped_by_max_discount() {
        let mut promo = promotion("P1", DiscountType::Percentage, 50.0);
        promo.max_discount_amount = Some(20.0);

        let priced = calculate_price_with_promotion(100.0, &promo);
        assert_eq!(priced.current_price, 80.0);
        assert_eq!(priced.savings, 20.0);
        assert_eq!(priced.discount_percentage, 20.0);
    }

    #[test]
    fn fixed_promotion_never_goes_negative() {
        let promo = promotion("P1", DiscountType::Fixed, 30.0);
        assert_eq!(calculate_price_with_promotion(100.0, &promo).current_price, 70.0);
        assert_eq!(calculate_price_with_promotion(20.0, &promo).current_price, 0.0);
    }

    #[test]
    fn shipping_promotion_keeps_item_price() {
        let promo = promotion("P1", DiscountType::Shipping, 100.0);
        let priced = calculate_price_with_promotion(42.0, &promo);
        assert_eq!(priced.current_price, 42.0);
        assert_eq!(priced.savings, 0.0);
    }

    #[test]
    fn applicability_checks_flag_window_and_scope() {
        let now = Utc::now();
        let mut p = product(10.0);
        p.category = "Shoes".to_string();

        let mut promo = promotion("P1", DiscountType::Percentage, 10.0);
        assert!(is_promotion_applicable(&p, &promo, now));

        promo.applicable_categories = vec!["shoes".to_string()];
        assert!(is_promotion_applicable(&p, &promo, now));

        // Product-id scope takes precedence over categories.
        promo.applicable_product_ids = vec![ProductId::new("other")];
        assert!(!is_promotion_applicable(&p, &promo, now));

        promo.applicable_product_ids = vec![ProductId::new("p1")];
        assert!(is_promotion_applicable(&p, &promo, now));
        assert!(!is_promotion_applicable(&p, &promo, now + Duration::days(2)));

        promo.is_active = false;
        assert!(!is_promotion_applicable(&p, &promo, now));
    }

    #[test]
    fn best_promotion_prefers_largest_savings() {
        let now = Utc::now();
        let small = promotion("small", DiscountType::Percentage, 10.0);
        let big = promotion("big", DiscountType::Fixed, 25.0);
        let promos = [small, big];

        let (best, priced) = best_promotion_for(&product(100.0), &promos, now).unwrap();
        assert_eq!(best.id.as_str(), "big");
        assert_eq!(priced.current_price, 75.0);
    }

    #[test]
    fn price_product_applies_better_promotion() {
        let now = Utc::now();
        let promos = [promotion("P1", DiscountType::Percentage, 25.0)];

        let priced = price_product(product(80.0), &promos, now);
        assert_eq!(priced.current_price, Some(60.0));
        assert_eq!(priced.original_price, Some(80.0));
        assert_eq!(priced.discount_percentage, Some(25.0));

        assert_eq!(price_product(priced.clone(), &promos, now), priced);
    }

    #[test]
    fn variant_promotion_wins_over_variant_and_product_price() {
        let now = Utc::now();
        let promos: HashMap<_, _> = [promotion("P1", DiscountType::Percentage, 10.0)]
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        let mut v = promoted_variant("P1");
        v.price = Some(120.0);

        let quote = resolve_variant_price(&product(100.0), Some(&v), &promos, now);
        assert_eq!(quote.source, PriceSource::VariantPromotion);
        assert_eq!(quote.current_price, 108.0);
        assert_eq!(quote.original_price, 120.0);
        assert_eq!(quote.discount_percentage, 10.0);
    }

    #[test]
    fn orphaned_variant_promotion_falls_back() {
        let now = Utc::now();
        let promos = HashMap::new();

        let mut v = promoted_variant("P1");
        let quote = resolve_variant_price(&product(100.0), Some(&v), &promos, now);
        assert_eq!(quote.source, PriceSource::Product);
        assert_eq!(quote.current_price, 100.0);

        v.price = Some(95.0);
        let quote = resolve_variant_price(&product(100.0), Some(&v), &promos, now);
        assert_eq!(quote.source, PriceSource::VariantPrice);
        assert_eq!(quote.current_price, 95.0);
    }

    #[test]
    fn no_variant_selected_uses_product_price() {
        let mut p = product(80.0);
        p.discount_percentage = Some(20.0);

        let quote = resolve_variant_price(&p, None, &HashMap::new(), Utc::now());
        assert_eq!(quote.source, PriceSource::Product);
        assert_eq!(quote.current_price, 64.0);
        assert_eq!(quote.discount_percentage, 20.0);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: calculate_discounted_price is idempotent.
            #[test]
            fn discounted_price_is_idempotent(
                price in 0.0f64..10_000.0,
                original in proptest::option::of(0.0f64..20_000.0),
                discount in proptest::option::of(0.0f64..100.0),
            ) {
                let mut p = product(round_money(price));
                p.original_price = original.map(round_money);
                p.discount_percentage = discount.map(f64::round);

                let once = calculate_discounted_price(p);
                let twice = calculate_discounted_price(once.clone());
                prop_assert_eq!(once, twice);
            }

            /// Property: variant promotion > variant price > product price.
            #[test]
            fn variant_price_priority_holds(
                product_price in 1.0f64..1_000.0,
                own_price in proptest::option::of(1.0f64..1_000.0),
                promotion_exists in any::<bool>(),
            ) {
                let now = Utc::now();
                let mut promos = HashMap::new();
                if promotion_exists {
                    let promo = promotion("P1", DiscountType::Percentage, 10.0);
                    promos.insert(promo.id.clone(), promo);
                }
                let mut v = promoted_variant("P1");
                v.price = own_price;

                let quote = resolve_variant_price(&product(product_price), Some(&v), &promos, now);
                let expected = if promotion_exists {
                    PriceSource::VariantPromotion
                } else if own_price.is_some() {
                    PriceSource::VariantPrice
                } else {
                    PriceSource::Product
                };
                prop_assert_eq!(quote.source, expected);
            }
        }
    }
}
