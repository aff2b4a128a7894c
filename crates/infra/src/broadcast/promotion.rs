//! Promotion state broadcasting.
//!
//! Keeps an in-memory `product → promotions` map in step with promotion writes and
//! tells every subscribed surface what changed. Apply and remove are idempotent:
//! applying a promotion twice replaces the stored copy, removing an absent one
//! leaves the map untouched (the event is still emitted so late subscribers can
//! reconcile).

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_catalog::Promotion;
use storefront_core::{DomainError, DomainResult, ProductId, PromotionId};
use storefront_events::{Event, EventBus, InMemoryEventBus, Listener, Subscription, SubscriptionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionChangeKind {
    Created,
    Updated,
    Deleted,
    Applied,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionChangeEvent {
    pub kind: PromotionChangeKind,
    pub promotion_id: PromotionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    /// Products whose promotion state changed, beyond `product_id`.
    #[serde(default)]
    pub affected_products: Vec<ProductId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<Promotion>,
    pub timestamp: DateTime<Utc>,
}

impl PromotionChangeEvent {
    fn new(kind: PromotionChangeKind, promotion_id: PromotionId) -> Self {
        Self {
            kind,
            promotion_id,
            product_id: None,
            affected_products: Vec::new(),
            promotion: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event concerns `product_id`.
    pub fn touches(&self, product_id: &ProductId) -> bool {
        self.product_id.as_ref() == Some(product_id) || self.affected_products.contains(product_id)
    }
}

impl Event for PromotionChangeEvent {
    fn event_type(&self) -> &'static str {
        match self.kind {
            PromotionChangeKind::Created => "promotion.created",
            PromotionChangeKind::Updated => "promotion.updated",
            PromotionChangeKind::Deleted => "promotion.deleted",
            PromotionChangeKind::Applied => "promotion.applied",
            PromotionChangeKind::Removed => "promotion.removed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Pub/sub for promotion lifecycle changes plus the product → promotions map.
#[derive(Debug, Default)]
pub struct PromotionBroadcaster {
    bus: InMemoryEventBus<PromotionChangeEvent>,
    by_product: Mutex<HashMap<ProductId, Vec<Promotion>>>,
}

impl PromotionBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn by_product(&self) -> MutexGuard<'_, HashMap<ProductId, Vec<Promotion>>> {
        self.by_product.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: PromotionChangeEvent) {
        tracing::debug!(
            event_type = event.event_type(),
            promotion_id = %event.promotion_id,
            affected = event.affected_products.len(),
            "broadcasting promotion change"
        );
        if let Err(e) = self.bus.publish(event) {
            tracing::error!(error = ?e, "failed to publish promotion change");
        }
    }

    fn rejected(kind: PromotionChangeKind, error: DomainError) {
        tracing::warn!(?kind, error = %error, "dropping invalid promotion change");
    }

    pub fn notify_promotion_created(&self, promotion: &Promotion) {
        if let Err(e) = promotion.id.ensure_present() {
            return Self::rejected(PromotionChangeKind::Created, e);
        }
        let mut event = PromotionChangeEvent::new(PromotionChangeKind::Created, promotion.id.clone());
        event.affected_products = promotion.applicable_product_ids.clone();
        event.promotion = Some(promotion.clone());
        self.publish(event);
    }

    /// Refresh every stored copy of the promotion, then broadcast.
    pub fn notify_promotion_updated(&self, promotion: &Promotion) {
        if let Err(e) = promotion.id.ensure_present() {
            return Self::rejected(PromotionChangeKind::Updated, e);
        }

        let mut affected = BTreeSet::new();
        for (product_id, promotions) in self.by_product().iter_mut() {
            for stored in promotions.iter_mut().filter(|p| p.id == promotion.id) {
                *stored = promotion.clone();
                affected.insert(product_id.clone());
            }
        }
        affected.extend(promotion.applicable_product_ids.iter().cloned());

        let mut event = PromotionChangeEvent::new(PromotionChangeKind::Updated, promotion.id.clone());
        event.affected_products = affected.into_iter().collect();
        event.promotion = Some(promotion.clone());
        self.publish(event);
    }

    /// Purge the promotion from every product, then broadcast the purged ids.
    pub fn notify_promotion_deleted(&self, promotion: &Promotion) {
        if let Err(e) = promotion.id.ensure_present() {
            return Self::rejected(PromotionChangeKind::Deleted, e);
        }

        let mut affected = Vec::new();
        {
            let mut map = self.by_product();
            for (product_id, promotions) in map.iter_mut() {
                let before = promotions.len();
                promotions.retain(|p| p.id != promotion.id);
                if promotions.len() != before {
                    affected.push(product_id.clone());
                }
            }
            map.retain(|_, promotions| !promotions.is_empty());
        }
        affected.sort();

        let mut event = PromotionChangeEvent::new(PromotionChangeKind::Deleted, promotion.id.clone());
        event.affected_products = affected;
        event.promotion = Some(promotion.clone());
        self.publish(event);
    }

    pub fn notify_promotion_applied(&self, product_id: &ProductId, promotion: &Promotion) {
        if let Err(e) = Self::check_pair(product_id, &promotion.id) {
            return Self::rejected(PromotionChangeKind::Applied, e);
        }

        {
            let mut map = self.by_product();
            let promotions = map.entry(product_id.clone()).or_default();
            match promotions.iter_mut().find(|p| p.id == promotion.id) {
                Some(existing) => *existing = promotion.clone(),
                None => promotions.push(promotion.clone()),
            }
        }

        let mut event = PromotionChangeEvent::new(PromotionChangeKind::Applied, promotion.id.clone());
        event.product_id = Some(product_id.clone());
        event.promotion = Some(promotion.clone());
        self.publish(event);
    }

    pub fn notify_promotion_removed(&self, product_id: &ProductId, promotion_id: &PromotionId) {
        if let Err(e) = Self::check_pair(product_id, promotion_id) {
            return Self::rejected(PromotionChangeKind::Removed, e);
        }

        {
            let mut map = self.by_product();
            if let Some(promotions) = map.get_mut(product_id) {
                promotions.retain(|p| &p.id != promotion_id);
                if promotions.is_empty() {
                    map.remove(product_id);
                }
            }
        }

        let mut event = PromotionChangeEvent::new(PromotionChangeKind::Removed, promotion_id.clone());
        event.product_id = Some(product_id.clone());
        self.publish(event);
    }

    fn check_pair(product_id: &ProductId, promotion_id: &PromotionId) -> DomainResult<()> {
        product_id.ensure_present()?;
        promotion_id.ensure_present()
    }

    pub fn on_promotion_change(&self) -> Subscription<PromotionChangeEvent> {
        self.bus.subscribe()
    }

    pub fn on_promotion_change_by_type(&self, kind: PromotionChangeKind) -> Subscription<PromotionChangeEvent> {
        self.bus
            .subscribe_filtered(Box::new(move |e: &PromotionChangeEvent| e.kind == kind))
    }

    /// Events whose `product_id` or `affected_products` name the product.
    pub fn on_product_promotion_change(&self, product_id: ProductId) -> Subscription<PromotionChangeEvent> {
        self.bus
            .subscribe_filtered(Box::new(move |e: &PromotionChangeEvent| e.touches(&product_id)))
    }

    pub fn listen(&self, listener: Listener<PromotionChangeEvent>) -> SubscriptionId {
        self.bus.listen(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Promotions currently applied to the product, live or not.
    pub fn active_promotions(&self, product_id: &ProductId) -> Vec<Promotion> {
        self.by_product().get(product_id).cloned().unwrap_or_default()
    }

    pub fn products_with_promotion(&self, promotion_id: &PromotionId) -> Vec<ProductId> {
        let mut products: Vec<ProductId> = self
            .by_product()
            .iter()
            .filter(|(_, promotions)| promotions.iter().any(|p| &p.id == promotion_id))
            .map(|(product_id, _)| product_id.clone())
            .collect();
        products.sort();
        products
    }

    /// Forget every promotion applied to a deleted product.
    pub fn forget_product(&self, product_id: &ProductId) {
        self.by_product().remove(product_id);
    }

    pub fn clear(&self) {
        self.by_product().clear();
    }
}
