//! Folding variant rows into the product read model.
//!
//! The variant rows are the source of truth for stock. Every enrichment pass
//! recomputes `total_stock`, per-color, per-size and per-size-per-color figures from
//! them, so the invariant `total_stock == Σ variant.stock` holds regardless of what
//! the stored product document says.

use std::collections::HashMap;

use crate::product::{ColorStock, Product};
use crate::variant::Variant;

fn add_stock(slot: &mut u32, stock: u32) {
    *slot = slot.saturating_add(stock);
}

/// Recompute every derived stock figure on `product` from `variants`.
///
/// Variants that belong to another product are ignored. Colors that only appear on
/// variant rows (not on the product's color list) still contribute to the totals
/// and to `color_stocks`.
pub fn fold_variant_stock(product: &mut Product, variants: &[Variant]) {
    let own: Vec<&Variant> = variants.iter().filter(|v| v.product_id == product.id).collect();

    let mut by_color: HashMap<&str, u32> = HashMap::new();
    let mut by_size: HashMap<&str, u32> = HashMap::new();
    let mut by_pair: HashMap<(&str, &str), u32> = HashMap::new();
    let mut total: u32 = 0;

    for v in &own {
        add_stock(&mut total, v.stock);
        add_stock(by_color.entry(v.color_name.as_str()).or_default(), v.stock);
        add_stock(by_size.entry(v.size_name.as_str()).or_default(), v.stock);
        add_stock(by_pair.entry((v.color_name.as_str(), v.size_name.as_str())).or_default(), v.stock);
    }

    product.total_stock = total;

    for color in &mut product.colors {
        color.stock = by_color.get(color.name.as_str()).copied().unwrap_or(0);
    }

    // Color order: the product's declared colors first, then any extras in the
    // order they appear on the variant rows.
    let mut color_order: Vec<String> = product.colors.iter().map(|c| c.name.clone()).collect();
    for v in &own {
        if !color_order.contains(&v.color_name) {
            color_order.push(v.color_name.clone());
        }
    }

    for size in &mut product.sizes {
        size.stock = by_size.get(size.name.as_str()).copied().unwrap_or(0);
        size.color_stocks = color_order
            .iter()
            .filter_map(|color| {
                by_pair
                    .get(&(color.as_str(), size.name.as_str()))
                    .map(|stock| ColorStock {
                        color_name: color.clone(),
                        stock: *stock,
                    })
            })
            .collect();
    }
}

/// Fold stock and attach the variant rows to the read model.
pub fn attach_variants(product: &mut Product, variants: Vec<Variant>) {
    fold_variant_stock(product, &variants);
    product.variants = variants
        .into_iter()
        .filter(|v| v.product_id == product.id)
        .collect();
}

/// Every color×size combination the product offers, colors outermost.
pub fn variant_grid(product: &Product) -> Vec<(String, String)> {
    product
        .colors
        .iter()
        .flat_map(|color| {
            product
                .sizes
                .iter()
                .map(move |size| (color.name.clone(), size.name.clone()))
        })
        .collect()
}

/// Initial stock for a combination, taken from `sizes[].color_stocks`.
pub fn initial_stock(product: &Product, color_name: &str, size_name: &str) -> u32 {
    product
        .sizes
        .iter()
        .find(|s| s.name == size_name)
        .and_then(|s| s.color_stocks.iter().find(|cs| cs.color_name == color_name))
        .map(|cs| cs.stock)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use storefront_core::{ProductId, VariantId};

    use super::*;
    use crate::product::{Color, Size};

    fn product() -> Product {
        let mut p = Product::new(ProductId::new("p1"), "Runner", 100.0);
        p.colors = vec![Color::named("Red"), Color::named("Blue")];
        p.sizes = vec![Size::named("41"), Size::named("42")];
        p.total_stock = 999; // stale stored value
        p
    }

    fn variant(id: &str, color: &str, size: &str, stock: u32) -> Variant {
        Variant::new(VariantId::new(id), ProductId::new("p1"), color, size, stock)
    }

    #[test]
    fn huge_levels_saturate_instead_of_overflowing() {
        let mut p = product();
        let variants = vec![variant("v1", "Red", "41", u32::MAX), variant("v2", "Red", "41", 1)];

        fold_variant_stock(&mut p, &variants);

        assert_eq!(p.total_stock, u32::MAX);
        assert_eq!(p.colors[0].stock, u32::MAX);
        assert_eq!(p.sizes[0].stock, u32::MAX);
        assert_eq!(p.sizes[0].color_stocks[0].stock, u32::MAX);
    }

    #[test]
    fn folds_totals_per_color_and_size() {
        let mut p = product();
        let variants = vec![
            variant("v1", "Red", "41", 2),
            variant("v2", "Red", "42", 3),
            variant("v3", "Blue", "42", 0),
        ];

        fold_variant_stock(&mut p, &variants);

        assert_eq!(p.total_stock, 5);
        assert_eq!(p.colors[0].stock, 5);
        assert_eq!(p.colors[1].stock, 0);
        assert_eq!(p.sizes[0].stock, 2);
        assert_eq!(p.sizes[1].stock, 3);
        assert_eq!(
            p.sizes[1].color_stocks,
            vec![
                ColorStock { color_name: "Red".into(), stock: 3 },
                ColorStock { color_name: "Blue".into(), stock: 0 },
            ]
        );
    }

    #[test]
    fn ignores_rows_of_other_products() {
        let mut p = product();
        let mut foreign = variant("x", "Red", "41", 50);
        foreign.product_id = ProductId::new("p2");

        attach_variants(&mut p, vec![variant("v1", "Red", "41", 1), foreign]);

        assert_eq!(p.total_stock, 1);
        assert_eq!(p.variants.len(), 1);
    }

    #[test]
    fn no_variants_means_zero_stock() {
        let mut p = product();
        fold_variant_stock(&mut p, &[]);
        assert_eq!(p.total_stock, 0);
        assert!(p.sizes.iter().all(|s| s.color_stocks.is_empty()));
    }

    #[test]
    fn grid_and_initial_stock() {
        let mut p = product();
        p.sizes[0].color_stocks = vec![ColorStock { color_name: "Blue".into(), stock: 4 }];

        assert_eq!(variant_grid(&p).len(), 4);
        assert_eq!(variant_grid(&p)[1], ("Red".to_string(), "42".to_string()));
        assert_eq!(initial_stock(&p, "Blue", "41"), 4);
        assert_eq!(initial_stock(&p, "Red", "41"), 0);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: total_stock always equals the sum of variant stock.
            #[test]
            fn total_stock_matches_variant_sum(
                stocks in proptest::collection::vec((0usize..3, 0usize..3, 0u32..1_000), 0..30)
            ) {
                let colors = ["Red", "Blue", "Green"];
                let sizes = ["41", "42", "43"];
                let variants: Vec<Variant> = stocks
                    .iter()
                    .enumerate()
                    .map(|(i, (c, s, stock))| variant(&format!("v{i}"), colors[*c], sizes[*s], *stock))
                    .collect();

                let mut p = product();
                fold_variant_stock(&mut p, &variants);

                let expected: u32 = variants.iter().map(|v| v.stock).sum();
                prop_assert_eq!(p.total_stock, expected);
                let size_sum: u32 = p.sizes.iter().map(|s| s.stock).sum();
                let listed: u32 = variants
                    .iter()
                    .filter(|v| v.size_name == "41" || v.size_name == "42")
                    .map(|v| v.stock)
                    .sum();
                prop_assert_eq!(size_sum, listed);
            }
        }
    }
}
