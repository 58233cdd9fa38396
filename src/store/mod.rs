//! Document store adapter.
//!
//! A store holds named collections of flat JSON documents. Every lookup is an
//! exact match on one field, mirroring how the gateway addresses its records:
//! routes by `name`, visitors by `ip`.
//!
//! ```text
//! api database   -> "routes"   collection, one RouteRecord per name
//! logs database  -> "visitors" collection, one VisitorRecord per ip
//! ```

pub mod file;
pub mod memory;
pub mod redis;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::{StoreError, StoreResult};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;

pub const ROUTES: &str = "routes";
pub const VISITORS: &str = "visitors";

/// A stored record. Schema is whatever the writer put there.
pub type Document = Map<String, Value>;

/// Identifier assigned by the store on insert.
pub type DocId = u64;

/// Exact-match predicate on a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    field: String,
    value: Value,
}

impl Query {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.get(&self.field) == Some(&self.value)
    }
}

/// CRUD-by-predicate over named collections. Each call is independent; there
/// are no transactions spanning calls.
pub trait DocumentStore: Send + Sync {
    /// First document matching `query`, if any.
    fn get(&self, collection: &str, query: &Query) -> StoreResult<Option<Document>>;

    fn insert(&self, collection: &str, doc: Document) -> StoreResult<DocId>;

    /// Overwrite every document matching `query`, or insert `doc` when none
    /// match. Returns the ids written.
    fn upsert(&self, collection: &str, doc: Document, query: &Query) -> StoreResult<Vec<DocId>>;

    /// Delete every document matching `query`. Returns the ids removed.
    fn remove(&self, collection: &str, query: &Query) -> StoreResult<Vec<DocId>>;

    fn all(&self, collection: &str) -> StoreResult<Vec<Document>>;
}

/// Typed view of one collection.
pub struct Table<T> {
    store: Arc<dyn DocumentStore>,
    name: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name,
            _record: PhantomData,
        }
    }
}

impl<T> Table<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn DocumentStore>, name: &'static str) -> Self {
        Self {
            store,
            name,
            _record: PhantomData,
        }
    }

    pub fn get(&self, query: &Query) -> StoreResult<Option<T>> {
        self.store
            .get(self.name, query)?
            .map(|doc| self.decode(doc))
            .transpose()
    }

    pub fn insert(&self, record: &T) -> StoreResult<DocId> {
        self.store.insert(self.name, self.encode(record)?)
    }

    pub fn upsert(&self, record: &T, query: &Query) -> StoreResult<Vec<DocId>> {
        self.store.upsert(self.name, self.encode(record)?, query)
    }

    pub fn remove(&self, query: &Query) -> StoreResult<Vec<DocId>> {
        self.store.remove(self.name, query)
    }

    pub fn all(&self) -> StoreResult<Vec<T>> {
        self.store
            .all(self.name)?
            .into_iter()
            .map(|doc| self.decode(doc))
            .collect()
    }

    fn encode(&self, record: &T) -> StoreResult<Document> {
        match serde_json::to_value(record)? {
            Value::Object(doc) => Ok(doc),
            other => Err(StoreError::Corrupt {
                collection: self.name.to_string(),
                message: format!("record serialized to non-object {}", other),
            }),
        }
    }

    fn decode(&self, doc: Document) -> StoreResult<T> {
        serde_json::from_value(Value::Object(doc)).map_err(|e| StoreError::Corrupt {
            collection: self.name.to_string(),
            message: e.to_string(),
        })
    }
}

/// The two databases the gateway keeps: route metadata in `api`, visitor
/// timestamps in `logs`. Both may point at the same backend.
#[derive(Clone)]
pub struct Stores {
    pub api: Arc<dyn DocumentStore>,
    pub logs: Arc<dyn DocumentStore>,
}

impl Stores {
    pub fn new(api: Arc<dyn DocumentStore>, logs: Arc<dyn DocumentStore>) -> Self {
        Self { api, logs }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub fn routes<T: Serialize + DeserializeOwned>(&self) -> Table<T> {
        Table::new(Arc::clone(&self.api), ROUTES)
    }

    pub fn visitors<T: Serialize + DeserializeOwned>(&self) -> Table<T> {
        Table::new(Arc::clone(&self.logs), VISITORS)
    }

    /// Liveness check used by the health route.
    pub fn ping(&self) -> StoreResult<()> {
        self.api.all(ROUTES)?;
        self.logs.get(VISITORS, &Query::eq("ip", Value::Null))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        key: String,
        n: u32,
    }

    #[test]
    fn test_query_matches_exact_field() {
        let doc = json!({"name": "test", "n": 1}).as_object().cloned().unwrap();
        assert!(Query::eq("name", "test").matches(&doc));
        assert!(!Query::eq("name", "other").matches(&doc));
        assert!(!Query::eq("missing", "test").matches(&doc));
        assert!(Query::eq("n", 1).matches(&doc));
    }

    #[test]
    fn test_table_round_trips_typed_records() {
        let table: Table<Item> = Table::new(Arc::new(MemoryStore::new()), "items");
        table.insert(&Item { key: "a".into(), n: 1 }).unwrap();
        table
            .upsert(&Item { key: "a".into(), n: 2 }, &Query::eq("key", "a"))
            .unwrap();

        let found = table.get(&Query::eq("key", "a")).unwrap();
        assert_eq!(found, Some(Item { key: "a".into(), n: 2 }));
        assert_eq!(table.all().unwrap().len(), 1);
    }

    #[test]
    fn test_table_reports_corrupt_documents() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("items", json!({"key": "a"}).as_object().cloned().unwrap())
            .unwrap();

        let table: Table<Item> = Table::new(store, "items");
        let err = table.all().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
