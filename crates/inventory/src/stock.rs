use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, DomainResult, ProductId, VariantId};
use storefront_events::Event;

/// What caused a stock change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockSource {
    Admin,
    Purchase,
    Restock,
    Transfer,
}

/// Event: the stock of one variant changed.
///
/// `new_stock` is the authoritative absolute value after the change; `stock_change`
/// is the signed delta that produced it. `new_stock` is signed so that a bad
/// producer can be detected and rejected rather than wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdate {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub stock_change: i64,
    pub new_stock: i64,
    pub timestamp: DateTime<Utc>,
    pub source: StockSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_name: Option<String>,
}

impl StockUpdate {
    pub fn new(
        product_id: ProductId,
        variant_id: VariantId,
        stock_change: i64,
        new_stock: i64,
        source: StockSource,
    ) -> Self {
        Self {
            product_id,
            variant_id,
            stock_change,
            new_stock,
            timestamp: Utc::now(),
            source,
            product_name: None,
            color_name: None,
            size_name: None,
        }
    }

    /// Attach display metadata for notification surfaces.
    pub fn with_display(
        mut self,
        product_name: Option<String>,
        color_name: Option<String>,
        size_name: Option<String>,
    ) -> Self {
        self.product_name = product_name;
        self.color_name = color_name;
        self.size_name = size_name;
        self
    }

    pub fn key(&self) -> (ProductId, VariantId) {
        (self.product_id.clone(), self.variant_id.clone())
    }

    /// Reject updates that must never reach subscribers.
    pub fn validate(&self) -> DomainResult<()> {
        self.product_id.ensure_present()?;
        self.variant_id.ensure_present()?;

        if self.new_stock < 0 {
            return Err(DomainError::validation(format!(
                "new stock cannot be negative (got {})",
                self.new_stock
            )));
        }

        // A zero timestamp is what a producer that forgot to set one sends.
        if self.timestamp.timestamp() <= 0 {
            return Err(DomainError::validation("timestamp is missing"));
        }

        Ok(())
    }

    /// Fold a later update for the same variant into this one.
    ///
    /// Deltas are summed; the absolute stock, timestamp and source follow the later
    /// update. Display metadata is kept unless the later update carries its own.
    pub fn coalesce(&mut self, later: &StockUpdate) {
        self.stock_change += later.stock_change;
        self.new_stock = later.new_stock;
        self.timestamp = later.timestamp;
        self.source = later.source;
        if later.product_name.is_some() {
            self.product_name.clone_from(&later.product_name);
        }
        if later.color_name.is_some() {
            self.color_name.clone_from(&later.color_name);
        }
        if later.size_name.is_some() {
            self.size_name.clone_from(&later.size_name);
        }
    }
}

impl Event for StockUpdate {
    fn event_type(&self) -> &'static str {
        "inventory.stock.updated"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Running per-product stock summary maintained from broadcast updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSummary {
    pub product_id: ProductId,
    pub variants: BTreeMap<VariantId, u32>,
    pub total_stock: u32,
    pub last_updated: DateTime<Utc>,
}

impl StockSummary {
    pub fn new(product_id: ProductId) -> Self {
        Self {
            product_id,
            variants: BTreeMap::new(),
            total_stock: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn from_variants(
        product_id: ProductId,
        variants: impl IntoIterator<Item = (VariantId, u32)>,
    ) -> Self {
        let mut summary = Self::new(product_id);
        summary.variants = variants.into_iter().collect();
        summary.recompute_total();
        summary
    }

    /// Record the absolute stock carried by `update`.
    ///
    /// Callers validate first; a negative value is clamped rather than wrapped.
    pub fn apply(&mut self, update: &StockUpdate) {
        let stock = u32::try_from(update.new_stock.max(0)).unwrap_or(u32::MAX);
        self.variants.insert(update.variant_id.clone(), stock);
        self.last_updated = update.timestamp;
        self.recompute_total();
    }

    /// Align the tracked variant set with freshly read rows.
    ///
    /// Levels already tracked are kept: a read can finish after a newer update was
    /// applied, so only variants the summary has never seen take the read value.
    /// Variants missing from `variants` are dropped.
    pub fn reconcile(&mut self, variants: impl IntoIterator<Item = (VariantId, u32)>) {
        let read: BTreeMap<VariantId, u32> = variants.into_iter().collect();
        self.variants.retain(|id, _| read.contains_key(id));
        for (id, stock) in read {
            self.variants.entry(id).or_insert(stock);
        }
        self.recompute_total();
    }

    fn recompute_total(&mut self) {
        self.total_stock = self
            .variants
            .values()
            .fold(0u32, |acc, stock| acc.saturating_add(*stock));
    }
}

/// Admin request: set one variant's stock to an absolute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdateRequest {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub new_stock: u32,
}

impl StockUpdateRequest {
    pub fn new(product_id: ProductId, variant_id: VariantId, new_stock: u32) -> Self {
        Self {
            product_id,
            variant_id,
            new_stock,
        }
    }
}

/// One line of a completed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleLine {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: u32,
}

impl SaleLine {
    pub fn new(product_id: ProductId, variant_id: VariantId, quantity: u32) -> Self {
        Self {
            product_id,
            variant_id,
            quantity,
        }
    }
}

/// Apply a signed delta to a stock level.
pub fn apply_delta(current: u32, delta: i64) -> DomainResult<u32> {
    let next = i64::from(current) + delta;
    if next < 0 {
        return Err(DomainError::invariant(format!(
            "stock cannot go negative ({current} {delta:+})"
        )));
    }
    u32::try_from(next).map_err(|_| DomainError::invariant("stock overflow"))
}

/// Remove `quantity` units, failing if there is not enough stock.
pub fn take_stock(current: u32, quantity: u32) -> DomainResult<u32> {
    if quantity == 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    current.checked_sub(quantity).ok_or_else(|| {
        DomainError::conflict(format!("insufficient stock: {current} available, {quantity} requested"))
    })
}
