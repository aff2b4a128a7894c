//! Infrastructure layer: document store, read-model cache, broadcasters, aggregator.

pub mod aggregator;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod error;
pub mod store;
pub mod variants;


pub use aggregator::{ConsistencyReport, InconsistencyWarning, ProductAggregator};
pub use broadcast::{PromotionBroadcaster, PromotionChangeEvent, PromotionChangeKind, StockBroadcaster};
pub use cache::{Cache, CacheKey, CacheStats, KeyPattern, ListingKind, ReadModelCache};
pub use config::StorefrontConfig;
pub use error::{CatalogError, CatalogResult};
pub use store::{Document, DocumentStore, InMemoryDocumentStore, StoreError, WriteOp};
pub use variants::{DecodeMode, VariantStore};
