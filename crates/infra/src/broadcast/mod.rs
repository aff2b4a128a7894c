//! Change broadcasting for stock and promotions.

pub mod promotion;
pub mod stock;

pub use promotion::{PromotionBroadcaster, PromotionChangeEvent, PromotionChangeKind};
pub use stock::StockBroadcaster;
