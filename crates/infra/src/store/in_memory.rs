use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{DocRef, Document, DocumentStore, Filter, StoreError, WriteOp};

type Collections = HashMap<String, BTreeMap<String, JsonValue>>;

/// In-memory document store.
///
/// Intended for tests/dev. Documents are kept ordered by id inside a collection so
/// query results are deterministic. Batches and transactions hold the write lock
/// for their whole duration and are applied to a working copy first, so a failing
/// op leaves nothing behind.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<Collections>,
    reads: AtomicU64,
    writes: AtomicU64,
    offline: AtomicBool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document directly, bypassing the counters.
    pub fn seed(&self, collection: &str, id: &str, data: JsonValue) {
        if let Ok(mut collections) = self.collections.write() {
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), data);
        }
    }

    /// Current body of a document, bypassing the counters.
    pub fn snapshot(&self, collection: &str, id: &str) -> Option<JsonValue> {
        self.collections
            .read()
            .ok()?
            .get(collection)?
            .get(id)
            .cloned()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Number of documents returned by `get`/`query`/transaction reads so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of ops committed so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Simulate an unreachable backend: every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("lock poisoned".to_string())
    }

    fn apply_ops(collections: &mut Collections, ops: Vec<WriteOp>) -> Result<u64, StoreError> {
        let mut working = collections.clone();
        let mut applied = 0;

        for op in ops {
            match op {
                WriteOp::Set { collection, id, data } => {
                    working.entry(collection).or_default().insert(id, data);
                }
                WriteOp::Merge { collection, id, patch } => {
                    let Some(JsonValue::Object(body)) =
                        working.get_mut(&collection).and_then(|c| c.get_mut(&id))
                    else {
                        return Err(StoreError::Missing { collection, id });
                    };
                    for (field, value) in patch {
                        if value.is_null() {
                            body.remove(&field);
                        } else {
                            body.insert(field, value);
                        }
                    }
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(c) = working.get_mut(&collection) {
                        c.remove(&id);
                    }
                }
            }
            applied += 1;
        }

        *collections = working;
        Ok(applied)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_online()?;
        let collections = self.collections.read().map_err(|_| Self::poisoned())?;
        let doc = collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|data| Document::new(id, data.clone()));
        if doc.is_some() {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
        Ok(doc)
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, StoreError> {
        self.ensure_online()?;
        let collections = self.collections.read().map_err(|_| Self::poisoned())?;
        let docs: Vec<Document> = collections
            .get(collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, data)| filters.iter().all(|f| f.matches(data)))
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default();
        self.reads.fetch_add(docs.len() as u64, Ordering::SeqCst);
        Ok(docs)
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut collections = self.collections.write().map_err(|_| Self::poisoned())?;
        let applied = Self::apply_ops(&mut collections, ops)?;
        self.writes.fetch_add(applied, Ordering::SeqCst);
        Ok(())
    }

    async fn transaction<T, F>(&self, reads: Vec<DocRef>, apply: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&[Option<Document>]) -> Result<(Vec<WriteOp>, T), StoreError> + Send + 'static,
    {
        self.ensure_online()?;
        let mut collections = self.collections.write().map_err(|_| Self::poisoned())?;

        let snapshot: Vec<Option<Document>> = reads
            .iter()
            .map(|r| {
                collections
                    .get(&r.collection)
                    .and_then(|c| c.get(&r.id))
                    .map(|data| Document::new(r.id.clone(), data.clone()))
            })
            .collect();
        self.reads
            .fetch_add(snapshot.iter().flatten().count() as u64, Ordering::SeqCst);

        let (ops, output) = apply(&snapshot)?;
        let applied = Self::apply_ops(&mut collections, ops)?;
        self.writes.fetch_add(applied, Ordering::SeqCst);
        Ok(output)
    }
}
