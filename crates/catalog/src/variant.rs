use serde::{Deserialize, Serialize};

use storefront_core::{Entity, ProductId, PromotionId, VariantId};

use crate::pricing::PriceQuote;
use crate::promotion::DiscountType;

/// One color+size combination of a product.
///
/// `stock` is the authoritative per-combination quantity. A variant with stock 0
/// still exists ("sold out"), which is different from a combination that was never
/// offered.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default)]
    pub id: VariantId,
    pub product_id: ProductId,
    pub color_name: String,
    pub size_name: String,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub sku: String,
    /// Variant-specific price override (no discount implied).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_id: Option<PromotionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_type: Option<DiscountType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discounted_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_price: Option<f64>,

    /// Effective price resolved during enrichment. Read-time only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_quote: Option<PriceQuote>,
}

impl Variant {
    pub fn new(
        id: VariantId,
        product_id: ProductId,
        color_name: impl Into<String>,
        size_name: impl Into<String>,
        stock: u32,
    ) -> Self {
        Self {
            id,
            product_id,
            color_name: color_name.into(),
            size_name: size_name.into(),
            stock,
            ..Self::default()
        }
    }

    /// `promotionId`, `discountType` and `discountValue` are all present.
    ///
    /// Presence alone does not make the promotion valid; price resolution also
    /// checks that the referenced promotion exists and is live.
    pub fn has_promotion_fields(&self) -> bool {
        self.promotion_id.is_some() && self.discount_type.is_some() && self.discount_value.is_some()
    }

    pub fn matches(&self, color_name: &str, size_name: &str) -> bool {
        self.color_name == color_name && self.size_name == size_name
    }

    /// Copy suitable for persisting: read-time fields stripped.
    pub fn to_persisted(&self) -> Self {
        let mut persisted = self.clone();
        persisted.price_quote = None;
        persisted
    }
}

impl Entity for Variant {
    type Id = VariantId;

    const COLLECTION: &'static str = "productVariants";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
