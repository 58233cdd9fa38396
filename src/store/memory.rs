use super::{DocId, Document, DocumentStore, Query};
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// One named collection: documents keyed by id, ids handed out in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct Collection {
    docs: BTreeMap<DocId, Document>,
}

impl Collection {
    fn next_id(&self) -> DocId {
        self.docs.keys().next_back().map_or(1, |last| last + 1)
    }

    pub(crate) fn get(&self, query: &Query) -> Option<Document> {
        self.docs.values().find(|doc| query.matches(doc)).cloned()
    }

    pub(crate) fn insert(&mut self, doc: Document) -> DocId {
        let id = self.next_id();
        self.docs.insert(id, doc);
        id
    }

    pub(crate) fn upsert(&mut self, doc: Document, query: &Query) -> Vec<DocId> {
        let ids = self.matching(query);
        if ids.is_empty() {
            return vec![self.insert(doc)];
        }
        for id in &ids {
            self.docs.insert(*id, doc.clone());
        }
        ids
    }

    pub(crate) fn remove(&mut self, query: &Query) -> Vec<DocId> {
        let ids = self.matching(query);
        for id in &ids {
            self.docs.remove(id);
        }
        ids
    }

    pub(crate) fn all(&self) -> Vec<Document> {
        self.docs.values().cloned().collect()
    }

    fn matching(&self, query: &Query) -> Vec<DocId> {
        self.docs
            .iter()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write<R>(&self, collection: &str, f: impl FnOnce(&mut Collection) -> R) -> StoreResult<R> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        Ok(f(collections.entry(collection.to_string()).or_default()))
    }

    fn read<R>(&self, collection: &str, f: impl FnOnce(&Collection) -> R) -> StoreResult<R>
    where
        R: Default,
    {
        let collections = self
            .collections
            .read()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        Ok(collections.get(collection).map(f).unwrap_or_default())
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, collection: &str, query: &Query) -> StoreResult<Option<Document>> {
        self.read(collection, |c| c.get(query))
    }

    fn insert(&self, collection: &str, doc: Document) -> StoreResult<DocId> {
        self.write(collection, |c| c.insert(doc))
    }

    fn upsert(&self, collection: &str, doc: Document, query: &Query) -> StoreResult<Vec<DocId>> {
        self.write(collection, |c| c.upsert(doc, query))
    }

    fn remove(&self, collection: &str, query: &Query) -> StoreResult<Vec<DocId>> {
        self.write(collection, |c| c.remove(query))
    }

    fn all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.read(collection, |c| c.all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let store = MemoryStore::new();
        assert_eq!(store.insert("routes", doc(json!({"name": "a"}))).unwrap(), 1);
        assert_eq!(store.insert("routes", doc(json!({"name": "b"}))).unwrap(), 2);
        assert_eq!(store.all("routes").unwrap().len(), 2);
    }

    #[test]
    fn test_upsert_inserts_then_overwrites() {
        let store = MemoryStore::new();
        let query = Query::eq("ip", "10.0.0.1");

        let ids = store
            .upsert("visitors", doc(json!({"ip": "10.0.0.1", "t": 1.0})), &query)
            .unwrap();
        assert_eq!(ids, vec![1]);

        let ids = store
            .upsert("visitors", doc(json!({"ip": "10.0.0.1", "t": 2.0})), &query)
            .unwrap();
        assert_eq!(ids, vec![1]);

        let stored = store.get("visitors", &query).unwrap().unwrap();
        assert_eq!(stored["t"], json!(2.0));
        assert_eq!(store.all("visitors").unwrap().len(), 1);
    }

    #[test]
    fn test_remove_deletes_every_match() {
        let store = MemoryStore::new();
        store.insert("routes", doc(json!({"group": "x", "n": 1}))).unwrap();
        store.insert("routes", doc(json!({"group": "x", "n": 2}))).unwrap();
        store.insert("routes", doc(json!({"group": "y", "n": 3}))).unwrap();

        let removed = store.remove("routes", &Query::eq("group", "x")).unwrap();
        assert_eq!(removed, vec![1, 2]);
        assert_eq!(store.all("routes").unwrap().len(), 1);
    }

    #[test]
    fn test_collections_are_independent() {
        let store = MemoryStore::new();
        store.insert("routes", doc(json!({"name": "a"}))).unwrap();
        assert!(store.all("visitors").unwrap().is_empty());
        assert!(store.get("visitors", &Query::eq("name", "a")).unwrap().is_none());
    }
}
