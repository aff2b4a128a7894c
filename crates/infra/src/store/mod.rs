//! Document store abstraction.
//!
//! The storefront persists everything in a document database. This layer treats
//! that database as a generic async store of JSON documents grouped in
//! collections, with the four primitives the consistency layer relies on:
//! point reads, field queries, atomic batches and read-then-write transactions.
//!
//! ## Write model
//!
//! There are no implicit merge semantics: every change is an explicit [`WriteOp`].
//! Multi-document updates that must stay consistent (a variant's stock and its
//! product's `totalStock`) go through [`DocumentStore::transaction`], which reads the
//! current documents, lets the caller compute the patch, and applies it atomically.

pub mod in_memory;

pub use in_memory::InMemoryDocumentStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use storefront_core::{DomainError, Entity};

/// JSON object used for partial updates.
pub type JsonMap = Map<String, JsonValue>;

/// A stored document: its id plus its JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: JsonValue,
}

impl Document {
    pub fn new(id: impl Into<String>, data: JsonValue) -> Self {
        Self { id: id.into(), data }
    }

    /// Decode the body into `T`, injecting the document id as the `id` field.
    ///
    /// Non-object bodies are rejected rather than coerced.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let JsonValue::Object(mut body) = self.data.clone() else {
            return Err(StoreError::Serialization(format!(
                "document {} is not an object",
                self.id
            )));
        };
        body.insert("id".to_string(), JsonValue::String(self.id.clone()));
        serde_json::from_value(JsonValue::Object(body))
            .map_err(|e| StoreError::Serialization(format!("document {}: {e}", self.id)))
    }

    /// Read a top-level field.
    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.data.get(name)
    }
}

/// Address of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn of<T: Entity>(id: &T::Id) -> Self {
        Self::new(T::COLLECTION, id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Field equals the value.
    Eq,
    /// Field equals one of the values in the (array) value.
    In,
    /// Field is an array containing the value.
    ArrayContains,
}

/// A `where` clause on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: JsonValue,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn one_of<V: Into<JsonValue>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::In,
            value: JsonValue::Array(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn array_contains(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::ArrayContains,
            value: value.into(),
        }
    }

    pub fn matches(&self, data: &JsonValue) -> bool {
        let Some(actual) = data.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::In => self
                .value
                .as_array()
                .is_some_and(|candidates| candidates.contains(actual)),
            FilterOp::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.contains(&self.value)),
        }
    }
}

/// One write in a batch or transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or replace the whole document.
    Set {
        collection: String,
        id: String,
        data: JsonValue,
    },
    /// Update fields of an existing document; a `null` value removes the field.
    Merge {
        collection: String,
        id: String,
        patch: JsonMap,
    },
    Delete { collection: String, id: String },
}

impl WriteOp {
    /// `Set` an entity under its own collection and id.
    pub fn set<T: Entity + Serialize>(entity: &T) -> Result<Self, StoreError> {
        let data = serde_json::to_value(entity).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self::Set {
            collection: T::COLLECTION.to_string(),
            id: entity.id().to_string(),
            data,
        })
    }

    pub fn merge(collection: impl Into<String>, id: impl Into<String>, patch: JsonMap) -> Self {
        Self::Merge {
            collection: collection.into(),
            id: id.into(),
            patch,
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Delete {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Set { collection, .. }
            | WriteOp::Merge { collection, .. }
            | WriteOp::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            WriteOp::Set { id, .. } | WriteOp::Merge { id, .. } | WriteOp::Delete { id, .. } => id,
        }
    }
}

/// Document store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the call (network, permission).
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    /// A document body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A `Merge` targeted a document that does not exist.
    #[error("document {collection}/{id} does not exist")]
    Missing { collection: String, id: String },

    /// A transaction body rejected the write (nothing was applied).
    #[error("transaction rejected: {0}")]
    Rejected(#[from] DomainError),
}

/// Async document store (generic key-value/query store).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// All documents of `collection` matching every filter (all documents when empty).
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, StoreError>;

    /// Apply every op or none of them.
    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Read `reads`, let `apply` compute the writes, and commit them atomically.
    ///
    /// `apply` receives one slot per requested ref, in order (`None` for missing
    /// documents). Returning an error aborts without writing.
    async fn transaction<T, F>(&self, reads: Vec<DocRef>, apply: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&[Option<Document>]) -> Result<(Vec<WriteOp>, T), StoreError> + Send + 'static;
}

#[async_trait]
impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        (**self).get(collection, id).await
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, StoreError> {
        (**self).query(collection, filters).await
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        (**self).batch_write(ops).await
    }

    async fn transaction<T, F>(&self, reads: Vec<DocRef>, apply: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&[Option<Document>]) -> Result<(Vec<WriteOp>, T), StoreError> + Send + 'static,
    {
        (**self).transaction(reads, apply).await
    }
}

/// Build a `Merge` patch from `(field, value)` pairs.
pub fn patch<I, K>(fields: I) -> JsonMap
where
    I: IntoIterator<Item = (K, JsonValue)>,
    K: Into<String>,
{
    fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn filters_match_top_level_fields() {
        let data = json!({"productId": "p1", "tags": ["a", "b"]});

        assert!(Filter::eq("productId", "p1").matches(&data));
        assert!(!Filter::eq("productId", "p2").matches(&data));
        assert!(Filter::one_of("productId", ["p0", "p1"]).matches(&data));
        assert!(Filter::array_contains("tags", "b").matches(&data));
        assert!(!Filter::eq("missing", "x").matches(&data));
    }

    #[test]
    fn decode_injects_id_and_rejects_non_objects() {
        #[derive(Debug, serde::Deserialize)]
        struct Row {
            id: String,
            n: u32,
        }

        let row: Row = Document::new("r1", json!({"n": 3})).decode().unwrap();
        assert_eq!((row.id.as_str(), row.n), ("r1", 3));

        let err = Document::new("r2", json!("oops")).decode::<Row>().unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
