use std::fmt;

use storefront_core::ProductId;

/// Which listing a cached product list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingKind {
    Featured,
    New,
    Bestselling,
    Discounted,
}

impl ListingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingKind::Featured => "featured",
            ListingKind::New => "new",
            ListingKind::Bestselling => "bestselling",
            ListingKind::Discounted => "discounted",
        }
    }
}

/// Typed cache key.
///
/// The `Display` form is the storage string (`products_<id>`, `variants_<id>`, ...)
/// and is what prefix invalidation matches against. Structural invalidation goes
/// through [`KeyPattern`] instead, so `products_1` never matches `products_10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Full enriched product list.
    Products,
    Product(ProductId),
    /// Product with variants and resolved variant prices.
    CompleteProduct(ProductId),
    Variants(ProductId),
    Listing { kind: ListingKind, limit: usize },
    Category(String),
}

impl CacheKey {
    pub fn product_id(&self) -> Option<&ProductId> {
        match self {
            CacheKey::Product(id) | CacheKey::CompleteProduct(id) | CacheKey::Variants(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Products => write!(f, "products"),
            CacheKey::Product(id) => write!(f, "products_{id}"),
            CacheKey::CompleteProduct(id) => write!(f, "products_complete_{id}"),
            CacheKey::Variants(id) => write!(f, "variants_{id}"),
            CacheKey::Listing { kind, limit } => write!(f, "products_{}_{limit}", kind.as_str()),
            CacheKey::Category(name) => write!(f, "products_category_{name}"),
        }
    }
}

/// Set of cache keys to invalidate together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Storage string starts with the prefix.
    Prefix(String),
    /// Every key scoped to one product: its entry, complete entry and variants.
    ProductScope(ProductId),
    /// The full list, every listing and every category list.
    Listings,
    /// Every product-related key.
    AllProducts,
}

impl KeyPattern {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            KeyPattern::Prefix(prefix) => key.to_string().starts_with(prefix.as_str()),
            KeyPattern::ProductScope(id) => key.product_id() == Some(id),
            KeyPattern::Listings => matches!(
                key,
                CacheKey::Products | CacheKey::Listing { .. } | CacheKey::Category(_)
            ),
            KeyPattern::AllProducts => true,
        }
    }
}
