use serde::{Deserialize, Serialize};

use storefront_core::{Entity, ProductId};

use crate::variant::Variant;

/// A color a product is offered in.
///
/// `stock` is derived at read time from the variant rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Color {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub stock: u32,
}

impl Color {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Stock of one color within a size.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorStock {
    pub color_name: String,
    pub stock: u32,
}

/// A size a product is offered in.
///
/// `stock` and `color_stocks` are derived at read time. On create, `color_stocks`
/// doubles as the initial stock for each color+size variant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Size {
    pub name: String,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub color_stocks: Vec<ColorStock>,
}

impl Size {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// The three pricing fields of a product.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct PricingFields {
    pub original_price: Option<f64>,
    pub current_price: Option<f64>,
    pub discount_percentage: Option<f64>,
}

impl PricingFields {
    pub(crate) fn of(product: &Product) -> Self {
        Self {
            original_price: product.original_price,
            current_price: product.current_price,
            discount_percentage: product.discount_percentage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PricingSnapshot {
    pub stored: PricingFields,
    pub derived: PricingFields,
}

/// Put back the stored value unless the field was edited after pricing.
fn restore(field: &mut Option<f64>, stored: Option<f64>, derived: Option<f64>) {
    if *field == derived {
        *field = stored;
    }
}

/// Product read model.
///
/// The persisted document carries the pricing and merchandising fields; the
/// stock figures and `variants` are recomputed from the variant rows on every
/// enrichment pass and never trusted from the stored document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default)]
    pub id: ProductId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub category: String,

    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<f64>,
    /// Pricing fields as stored and as derived by the last pricing pass.
    #[serde(skip)]
    pub(crate) pricing: Option<PricingSnapshot>,

    #[serde(default)]
    pub total_stock: u32,
    #[serde(default)]
    pub colors: Vec<Color>,
    #[serde(default)]
    pub sizes: Vec<Size>,
    /// Populated at read time only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<Variant>,

    #[serde(default)]
    pub is_new: bool,
    #[serde(default, rename = "isBestSeller")]
    pub is_bestseller: bool,
    #[serde(default)]
    pub is_featured: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>, price: f64) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            ..Self::default()
        }
    }

    /// Price the customer pays once enrichment has run.
    pub fn effective_price(&self) -> f64 {
        self.current_price.unwrap_or(self.price)
    }

    pub fn is_discounted(&self) -> bool {
        self.discount_percentage.is_some_and(|d| d > 0.0)
    }

    pub fn in_stock(&self) -> bool {
        self.total_stock > 0
    }

    /// Copy suitable for persisting: read-time fields stripped.
    ///
    /// Pricing fields that still hold what enrichment derived revert to their
    /// stored values, so a discount taken from a promotion is never written back.
    /// Fields changed after enrichment are kept.
    pub fn to_persisted(&self) -> Self {
        let mut persisted = self.clone();
        persisted.variants.clear();
        if let Some(PricingSnapshot { stored, derived }) = persisted.pricing.take() {
            restore(&mut persisted.original_price, stored.original_price, derived.original_price);
            restore(&mut persisted.current_price, stored.current_price, derived.current_price);
            restore(
                &mut persisted.discount_percentage,
                stored.discount_percentage,
                derived.discount_percentage,
            );
        }
        persisted
    }
}

impl Entity for Product {
    type Id = ProductId;

    const COLLECTION: &'static str = "products";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_storefront_document_shape() {
        let doc = serde_json::json!({
            "name": "Runner",
            "price": 100.0,
            "originalPrice": 150.0,
            "totalStock": 7,
            "isBestSeller": true,
            "colors": [{"name": "Red"}],
            "sizes": [{"name": "42", "colorStocks": [{"colorName": "Red", "stock": 7}]}],
        });

        let product: Product = serde_json::from_value(doc).unwrap();
        assert_eq!(product.original_price, Some(150.0));
        assert!(product.is_bestseller);
        assert_eq!(product.sizes[0].color_stocks[0].stock, 7);
        assert!(product.variants.is_empty());
    }

    #[test]
    fn persisted_copy_never_carries_variants() {
        let mut product = Product::new(ProductId::new("p1"), "Runner", 10.0);
        product.variants.push(Variant::new(
            storefront_core::VariantId::new("v1"),
            ProductId::new("p1"),
            "Red",
            "42",
            3,
        ));

        let value = serde_json::to_value(product.to_persisted()).unwrap();
        assert!(value.get("variants").is_none());
    }

    #[test]
    fn derived_pricing_is_not_persisted_but_edits_are() {
        let mut product = Product::new(ProductId::new("p1"), "Runner", 100.0);
        product.original_price = Some(120.0);
        product.pricing = Some(PricingSnapshot {
            stored: PricingFields::of(&product),
            derived: PricingFields {
                original_price: Some(120.0),
                current_price: Some(80.0),
                discount_percentage: Some(33.0),
            },
        });
        product.current_price = Some(80.0);
        product.discount_percentage = Some(10.0); // edited after pricing

        let persisted = product.to_persisted();

        assert_eq!(persisted.original_price, Some(120.0));
        assert_eq!(persisted.current_price, None);
        assert_eq!(persisted.discount_percentage, Some(10.0));
        assert!(persisted.pricing.is_none());
    }
}
