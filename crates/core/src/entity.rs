//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Implemented by every document-backed type (products, variants, promotions) so
/// the storage layer can address a record without knowing its concrete shape.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Name of the document collection the entity is persisted in.
    const COLLECTION: &'static str;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
