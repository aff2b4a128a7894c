//! Catalog domain module.
//!
//! This crate contains the storefront's product read model and the business rules
//! that shape it (pricing, stock folding, related-product scoring), implemented
//! purely as deterministic domain logic (no IO, no async, no storage).

pub mod enrichment;
pub mod pricing;
pub mod product;
pub mod promotion;
pub mod related;
pub mod variant;

pub use enrichment::{attach_variants, fold_variant_stock, initial_stock, variant_grid};
pub use pricing::{
    PriceQuote, PriceSource, PromotionPrice, best_promotion_for, calculate_discounted_price,
    calculate_price_with_promotion, is_promotion_applicable, percent_off, price_product,
    resolve_variant_price, round_money,
};
pub use product::{Color, ColorStock, Product, Size};
pub use promotion::{AppliedPromotion, DiscountType, Promotion, PromotionTarget};
pub use related::{rank_related, similarity_score};
pub use variant::Variant;
