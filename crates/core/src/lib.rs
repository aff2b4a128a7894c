//! `storefront-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the catalog, inventory
//! and infrastructure crates (no IO, no async).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{ProductId, PromotionId, VariantId};
