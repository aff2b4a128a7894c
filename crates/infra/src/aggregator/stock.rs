//! Stock mutations.
//!
//! Every stock write runs as one store transaction that reads the touched products
//! and *all* of their variant rows, so the product's `totalStock` can be rewritten
//! as the exact sum of its variants in the same commit.

use std::collections::{BTreeSet, HashMap};

use serde_json::json;

use storefront_catalog::{Product, Variant};
use storefront_core::{DomainError, Entity, ProductId, VariantId};
use storefront_inventory::{
    SaleLine, StockSource, StockUpdate, StockUpdateRequest, apply_delta, take_stock,
};

use super::{ProductAggregator, report};
use crate::error::CatalogResult;
use crate::store::{DocRef, Document, DocumentStore, StoreError, WriteOp, patch};
use crate::variants::DecodeMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockChangeKind {
    /// Set to an absolute level.
    SetTo(u32),
    /// Add units (transfer in, restock).
    Add(u32),
    /// Remove units, failing if there are not enough.
    Take(u32),
}

/// One requested change to a variant's stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub kind: StockChangeKind,
}

impl StockChange {
    pub fn new(product_id: ProductId, variant_id: VariantId, kind: StockChangeKind) -> Self {
        Self {
            product_id,
            variant_id,
            kind,
        }
    }
}

/// Writes and events produced by a set of stock changes.
#[derive(Debug, Clone, PartialEq)]
pub struct StockPlan {
    pub ops: Vec<WriteOp>,
    pub updates: Vec<StockUpdate>,
}

struct Level {
    product_id: ProductId,
    stock: u32,
    color_name: String,
    size_name: String,
}

/// Compute the writes for `changes` against the documents read by the transaction.
///
/// `docs` holds one slot per product in `product_ids`, then one per variant in
/// `variant_ids`. Changes to the same variant apply in order. Any missing document,
/// foreign variant or insufficient stock rejects the whole plan.
pub fn plan_stock_writes(
    changes: &[StockChange],
    product_ids: &[ProductId],
    variant_ids: &[VariantId],
    docs: &[Option<Document>],
    source: StockSource,
) -> Result<StockPlan, StoreError> {
    let (product_docs, variant_docs) = docs.split_at(product_ids.len().min(docs.len()));

    let mut names: HashMap<&ProductId, String> = HashMap::new();
    for (product_id, doc) in product_ids.iter().zip(product_docs) {
        let doc = doc.as_ref().ok_or_else(|| StoreError::Missing {
            collection: Product::COLLECTION.to_string(),
            id: product_id.to_string(),
        })?;
        let name = doc.field("name").and_then(|v| v.as_str()).unwrap_or_default();
        names.insert(product_id, name.to_string());
    }

    let mut levels: HashMap<VariantId, Level> = HashMap::new();
    for (variant_id, doc) in variant_ids.iter().zip(variant_docs) {
        // A sibling may have been deleted since it was listed.
        let Some(doc) = doc else { continue };
        let variant: Variant = doc.decode()?;
        levels.insert(
            variant_id.clone(),
            Level {
                product_id: variant.product_id,
                stock: variant.stock,
                color_name: variant.color_name,
                size_name: variant.size_name,
            },
        );
    }

    let mut touched: BTreeSet<VariantId> = BTreeSet::new();
    let mut updates = Vec::with_capacity(changes.len());

    for change in changes {
        let level = levels.get_mut(&change.variant_id).ok_or_else(|| StoreError::Missing {
            collection: Variant::COLLECTION.to_string(),
            id: change.variant_id.to_string(),
        })?;
        if level.product_id != change.product_id {
            return Err(DomainError::validation(format!(
                "variant {} belongs to {}, not {}",
                change.variant_id, level.product_id, change.product_id
            ))
            .into());
        }

        let before = level.stock;
        level.stock = match change.kind {
            StockChangeKind::SetTo(stock) => stock,
            StockChangeKind::Add(quantity) => apply_delta(before, i64::from(quantity))?,
            StockChangeKind::Take(quantity) => take_stock(before, quantity)?,
        };
        touched.insert(change.variant_id.clone());

        updates.push(
            StockUpdate::new(
                change.product_id.clone(),
                change.variant_id.clone(),
                i64::from(level.stock) - i64::from(before),
                i64::from(level.stock),
                source,
            )
            .with_display(
                names.get(&change.product_id).cloned(),
                Some(level.color_name.clone()),
                Some(level.size_name.clone()),
            ),
        );
    }

    let mut ops: Vec<WriteOp> = touched
        .iter()
        .filter_map(|id| levels.get(id).map(|level| (id, level.stock)))
        .map(|(id, stock)| WriteOp::merge(Variant::COLLECTION, id.as_str(), patch([("stock", json!(stock))])))
        .collect();

    for product_id in product_ids {
        let total = levels
            .values()
            .filter(|level| &level.product_id == product_id)
            .fold(0u32, |acc, level| acc.saturating_add(level.stock));
        ops.push(WriteOp::merge(
            Product::COLLECTION,
            product_id.as_str(),
            patch([("totalStock", json!(total))]),
        ));
    }

    Ok(StockPlan { ops, updates })
}

impl<S> ProductAggregator<S>
where
    S: DocumentStore + Clone,
{
    /// Set one variant's stock to an absolute value.
    pub async fn update_stock(&self, request: StockUpdateRequest) -> bool {
        let change = StockChange::new(
            request.product_id,
            request.variant_id,
            StockChangeKind::SetTo(request.new_stock),
        );
        self.run_stock_changes("update_stock", vec![change], StockSource::Admin).await
    }

    /// Apply several absolute updates atomically: all succeed or none do.
    pub async fn update_stock_batch(&self, requests: Vec<StockUpdateRequest>) -> bool {
        let changes = requests
            .into_iter()
            .map(|r| StockChange::new(r.product_id, r.variant_id, StockChangeKind::SetTo(r.new_stock)))
            .collect();
        self.run_stock_changes("update_stock_batch", changes, StockSource::Admin).await
    }

    /// Move units between two variants of the same product.
    pub async fn transfer_stock(
        &self,
        product_id: &ProductId,
        from_variant: &VariantId,
        to_variant: &VariantId,
        quantity: u32,
    ) -> bool {
        if quantity == 0 || from_variant == to_variant {
            tracing::warn!(
                product_id = %product_id,
                from = %from_variant,
                to = %to_variant,
                quantity,
                "ignoring empty stock transfer"
            );
            return false;
        }
        let changes = vec![
            StockChange::new(product_id.clone(), from_variant.clone(), StockChangeKind::Take(quantity)),
            StockChange::new(product_id.clone(), to_variant.clone(), StockChangeKind::Add(quantity)),
        ];
        self.run_stock_changes("transfer_stock", changes, StockSource::Transfer).await
    }

    /// Deduct sold quantities. Fails without writing if any line lacks stock.
    pub async fn register_sale(&self, lines: Vec<SaleLine>) -> bool {
        let changes = lines
            .into_iter()
            .map(|l| StockChange::new(l.product_id, l.variant_id, StockChangeKind::Take(l.quantity)))
            .collect();
        self.run_stock_changes("register_sale", changes, StockSource::Purchase).await
    }

    async fn run_stock_changes(
        &self,
        operation: &'static str,
        changes: Vec<StockChange>,
        source: StockSource,
    ) -> bool {
        match self.commit_stock_changes(changes, source).await {
            Ok(updates) => {
                let products: BTreeSet<&ProductId> = updates.iter().map(|u| &u.product_id).collect();
                for product_id in products {
                    self.cache.invalidate_product(product_id);
                }
                tracing::info!(operation, updates = updates.len(), "stock committed");
                for update in updates {
                    self.stock.notify(update);
                }
                true
            }
            Err(e) => {
                report(operation, &e);
                false
            }
        }
    }

    async fn commit_stock_changes(
        &self,
        changes: Vec<StockChange>,
        source: StockSource,
    ) -> CatalogResult<Vec<StockUpdate>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        for change in &changes {
            change.product_id.ensure_present()?;
            change.variant_id.ensure_present()?;
        }

        let product_ids: Vec<ProductId> = changes
            .iter()
            .map(|c| c.product_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let siblings = self.variants.variants_for_products(&product_ids, DecodeMode::Lenient).await?;
        let mut variant_ids: BTreeSet<VariantId> = siblings.values().flatten().map(|v| v.id.clone()).collect();
        variant_ids.extend(changes.iter().map(|c| c.variant_id.clone()));
        let variant_ids: Vec<VariantId> = variant_ids.into_iter().collect();

        let reads: Vec<DocRef> = product_ids
            .iter()
            .map(DocRef::of::<Product>)
            .chain(variant_ids.iter().map(DocRef::of::<Variant>))
            .collect();

        let updates = self
            .store
            .transaction(reads, move |docs| {
                let plan = plan_stock_writes(&changes, &product_ids, &variant_ids, docs, source)?;
                Ok((plan.ops, plan.updates))
            })
            .await?;
        Ok(updates)
    }
}
