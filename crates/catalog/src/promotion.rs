use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{Entity, ProductId, PromotionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
    /// Free or discounted shipping; never changes the item price.
    Shipping,
}

/// A discount campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    #[serde(default)]
    pub id: PromotionId,
    #[serde(default)]
    pub name: String,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub applicable_product_ids: Vec<ProductId>,
    #[serde(default)]
    pub applicable_categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_discount_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub usage_count: u32,
}

impl Promotion {
    pub fn new(
        id: PromotionId,
        discount_type: DiscountType,
        discount_value: f64,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: String::new(),
            discount_type,
            discount_value,
            start_date,
            end_date,
            is_active: true,
            applicable_product_ids: Vec::new(),
            applicable_categories: Vec::new(),
            max_discount_amount: None,
            usage_limit: None,
            usage_count: 0,
        }
    }

    /// `now` lies within `[start_date, end_date]`.
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now <= self.end_date
    }

    /// Active flag set and inside the validity window (scope not considered).
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.is_within_window(now)
    }

    pub fn usage_exhausted(&self) -> bool {
        self.usage_limit.is_some_and(|limit| self.usage_count >= limit)
    }
}

impl Entity for Promotion {
    type Id = PromotionId;

    const COLLECTION: &'static str = "promotions";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionTarget {
    Product,
    Variant,
}

/// Join record: a promotion applied to a product or variant.
///
/// Kept so that orphaned state (a record or variant pointing at a deleted promotion)
/// can be detected and cleaned up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedPromotion {
    #[serde(default)]
    pub id: String,
    pub promotion_id: PromotionId,
    pub target: PromotionTarget,
    pub target_id: String,
    pub product_id: ProductId,
    pub applied_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AppliedPromotion {
    pub fn new(
        promotion: &Promotion,
        target: PromotionTarget,
        target_id: impl Into<String>,
        product_id: ProductId,
        applied_at: DateTime<Utc>,
    ) -> Self {
        let target_id = target_id.into();
        Self {
            id: Self::record_id(&promotion.id, &target_id),
            promotion_id: promotion.id.clone(),
            target,
            target_id,
            product_id,
            applied_at,
            expires_at: promotion.end_date,
        }
    }

    /// Deterministic id so re-applying the same promotion overwrites the record.
    pub fn record_id(promotion_id: &PromotionId, target_id: &str) -> String {
        format!("{promotion_id}_{target_id}")
    }
}

impl Entity for AppliedPromotion {
    type Id = String;

    const COLLECTION: &'static str = "appliedPromotions";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
