use thiserror::Error;

use storefront_core::DomainError;

use crate::store::StoreError;

/// Internal error of the consistency layer.
///
/// Public aggregator operations never surface this; they log it and return a
/// fallback value.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A stored document could not be decoded.
    #[error("malformed document: {0}")]
    Malformed(String),

    /// The document store failed.
    #[error(transparent)]
    Upstream(StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl CatalogError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(domain) => Self::Domain(domain),
            StoreError::Serialization(msg) => Self::Malformed(msg),
            other => Self::Upstream(other),
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_by_cause() {
        let rejected: CatalogError = StoreError::Rejected(DomainError::conflict("short")).into();
        assert!(matches!(rejected, CatalogError::Domain(DomainError::Conflict(_))));

        let malformed: CatalogError = StoreError::Serialization("bad".into()).into();
        assert!(matches!(malformed, CatalogError::Malformed(_)));

        let offline: CatalogError = StoreError::Unavailable("down".into()).into();
        assert!(matches!(offline, CatalogError::Upstream(_)));
    }
}
