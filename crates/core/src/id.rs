//! Strongly-typed document identifiers.
//!
//! Document stores hand out opaque string ids, so these wrap `String` rather than
//! `Uuid`. Freshly generated ids are UUIDv7 strings (time-ordered).

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a product document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

/// Identifier of a variant (one color+size combination of a product).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(String);

/// Identifier of a promotion document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromotionId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Generate a new identifier.
            ///
            /// Prefer passing ids explicitly in tests for determinism.
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Wrap an existing id verbatim (no validation).
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }

            /// Validate that the id is usable as a document key.
            pub fn ensure_present(&self) -> Result<(), DomainError> {
                if self.is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, " is empty")));
                }
                Ok(())
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let id = Self(s.to_string());
                id.ensure_present()?;
                Ok(id)
            }
        }
    };
}

impl_string_newtype!(ProductId, "ProductId");
impl_string_newtype!(VariantId, "VariantId");
impl_string_newtype!(PromotionId, "PromotionId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_non_empty() {
        let a = ProductId::generate();
        let b = ProductId::generate();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn parsing_rejects_blank_ids() {
        let err = "   ".parse::<VariantId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(_)));
        assert_eq!("v-1".parse::<VariantId>().unwrap().as_str(), "v-1");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = PromotionId::new("P1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"P1\"");
    }
}
