//! Remote document store contract and an in-process implementation.
//!
//! The store holds schemaless documents grouped into collections. The
//! reporting service only needs three calls: find by field, update by id,
//! and insert.

use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub type Fields = serde_json::Map<String, Value>;

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

pub trait DocumentStore: Send + Sync + 'static {
    /// Documents in `collection` whose `field` equals `value`.
    fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Document>>> + Send;

    /// Merge `fields` into an existing document. Missing id is `NotFound`.
    fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Create a document and return its id.
    fn insert(
        &self,
        collection: &str,
        fields: &Fields,
    ) -> impl Future<Output = Result<String>> + Send;
}

impl<T: DocumentStore> DocumentStore for Arc<T> {
    fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Document>>> + Send {
        (**self).query_by_field(collection, field, value, limit)
    }

    fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).update_by_id(collection, id, fields)
    }

    fn insert(
        &self,
        collection: &str,
        fields: &Fields,
    ) -> impl Future<Output = Result<String>> + Send {
        (**self).insert(collection, fields)
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Which call touched the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOp {
    Query,
    Update,
    Insert,
}

/// One successful mutation, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub op: DocumentOp,
    pub collection: String,
    pub id: String,
    pub fields: Fields,
}

#[derive(Debug, Default)]
struct MemoryInner {
    collections: BTreeMap<String, BTreeMap<String, Fields>>,
    writes: Vec<WriteRecord>,
    queries: usize,
    /// Number of upcoming calls that fail.
    fail_next: usize,
}

/// In-process document store. Clones share state, so a test can keep one
/// handle while the service owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls of any kind.
    pub async fn fail_next(&self, n: usize) {
        self.inner.lock().await.fail_next = n;
    }

    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.inner.lock().await.writes.clone()
    }

    pub async fn count(&self, op: DocumentOp) -> usize {
        let inner = self.inner.lock().await;
        match op {
            DocumentOp::Query => inner.queries,
            op => inner.writes.iter().filter(|w| w.op == op).count(),
        }
    }

    pub async fn get(&self, collection: &str, id: &str) -> Option<Fields> {
        self.inner
            .lock()
            .await
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .await
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Seed a document without recording a write.
    pub async fn seed(&self, collection: &str, fields: Fields) -> String {
        let id = Uuid::new_v4().to_string();
        self.inner
            .lock()
            .await
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        id
    }
}

fn take_failure(inner: &mut MemoryInner) -> Result<()> {
    if inner.fail_next > 0 {
        inner.fail_next -= 1;
        return Err(Error::Document("memory store unavailable".to_string()));
    }
    Ok(())
}

impl DocumentStore for MemoryDocumentStore {
    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let mut inner = self.inner.lock().await;
        take_failure(&mut inner)?;
        inner.queries += 1;
        let docs = inner
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| fields.get(field) == Some(value))
                    .take(limit)
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn update_by_id(&self, collection: &str, id: &str, fields: &Fields) -> Result<()> {
        let mut inner = self.inner.lock().await;
        take_failure(&mut inner)?;
        let doc = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| Error::NotFound(format!("document {collection}/{id}")))?;
        for (k, v) in fields {
            doc.insert(k.clone(), v.clone());
        }
        inner.writes.push(WriteRecord {
            op: DocumentOp::Update,
            collection: collection.to_string(),
            id: id.to_string(),
            fields: fields.clone(),
        });
        Ok(())
    }

    async fn insert(&self, collection: &str, fields: &Fields) -> Result<String> {
        let mut inner = self.inner.lock().await;
        take_failure(&mut inner)?;
        let id = Uuid::new_v4().to_string();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields.clone());
        inner.writes.push(WriteRecord {
            op: DocumentOp::Insert,
            collection: collection.to_string(),
            id: id.clone(),
            fields: fields.clone(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Fields {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn query_matches_exact_field_value() {
        let store = MemoryDocumentStore::new();
        let id = store.seed("locs", fields(json!({"worker_id": 7}))).await;
        store.seed("locs", fields(json!({"worker_id": 8}))).await;

        let found = store
            .query_by_field("locs", "worker_id", &json!(7), 1)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);

        let none = store
            .query_by_field("other", "worker_id", &json!(7), 1)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn update_merges_and_missing_id_errors() {
        let store = MemoryDocumentStore::new();
        let id = store.insert("locs", &fields(json!({"a": 1, "b": 2}))).await.unwrap();
        store
            .update_by_id("locs", &id, &fields(json!({"b": 3})))
            .await
            .unwrap();
        assert_eq!(store.get("locs", &id).await.unwrap(), fields(json!({"a": 1, "b": 3})));

        let err = store
            .update_by_id("locs", "nope", &fields(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryDocumentStore::new();
        store.fail_next(1).await;
        assert!(store.insert("locs", &Fields::new()).await.is_err());
        assert!(store.insert("locs", &Fields::new()).await.is_ok());
        assert_eq!(store.count(DocumentOp::Insert).await, 1);
    }
}
