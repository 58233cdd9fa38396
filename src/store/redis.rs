//! Redis backed store.
//!
//! Each collection is a hash at `<prefix>:<collection>` mapping document id to
//! the JSON document. Ids come from `INCR <prefix>:<collection>:_last_id`.

use super::{DocId, Document, DocumentStore, Query};
use crate::error::{StoreError, StoreResult};
use redis::{Client, Commands, Connection};
use std::collections::HashMap;
use std::sync::Mutex;

pub struct RedisStore {
    client: Client,
    connection: Mutex<Option<Connection>>,
    prefix: String,
}

impl RedisStore {
    pub fn open(redis_url: &str, prefix: impl Into<String>) -> StoreResult<Self> {
        let client = Client::open(redis_url)?;
        let connection = client.get_connection()?;

        Ok(Self {
            client,
            connection: Mutex::new(Some(connection)),
            prefix: prefix.into(),
        })
    }

    fn hash_key(&self, collection: &str) -> String {
        hash_key(&self.prefix, collection)
    }

    fn id_key(&self, collection: &str) -> String {
        id_key(&self.prefix, collection)
    }

    /// Run `f` on the shared connection, reconnecting once if the previous
    /// command left it unusable.
    fn with_conn<R>(&self, f: impl FnOnce(&mut Connection) -> redis::RedisResult<R>) -> StoreResult<R> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| StoreError::Poisoned("redis connection"))?;

        if guard.is_none() {
            *guard = Some(self.client.get_connection()?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(StoreError::Poisoned("redis connection"));
        };

        match f(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    tracing::warn!(target: "route_gateway::store", error = %e, "Dropping Redis connection");
                    *guard = None;
                }
                Err(e.into())
            }
        }
    }

    fn load(&self, collection: &str) -> StoreResult<Vec<(DocId, Document)>> {
        let key = self.hash_key(collection);
        let raw: HashMap<String, String> = self.with_conn(|conn| conn.hgetall(&key))?;
        decode_entries(collection, raw)
    }

    fn matching(&self, collection: &str, query: &Query) -> StoreResult<Vec<DocId>> {
        Ok(self
            .load(collection)?
            .into_iter()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(id, _)| id)
            .collect())
    }
}

fn hash_key(prefix: &str, collection: &str) -> String {
    format!("{}:{}", prefix, collection)
}

fn id_key(prefix: &str, collection: &str) -> String {
    format!("{}:{}:_last_id", prefix, collection)
}

/// Turn an `HGETALL` reply into documents ordered by id.
fn decode_entries(
    collection: &str,
    raw: HashMap<String, String>,
) -> StoreResult<Vec<(DocId, Document)>> {
    let mut docs = raw
        .into_iter()
        .map(|(id, json)| {
            let id = id.parse::<DocId>().map_err(|e| StoreError::Corrupt {
                collection: collection.to_string(),
                message: format!("bad document id '{}': {}", id, e),
            })?;
            Ok((id, serde_json::from_str(&json)?))
        })
        .collect::<StoreResult<Vec<(DocId, Document)>>>()?;
    docs.sort_by_key(|(id, _)| *id);
    Ok(docs)
}

impl DocumentStore for RedisStore {
    fn get(&self, collection: &str, query: &Query) -> StoreResult<Option<Document>> {
        Ok(self
            .load(collection)?
            .into_iter()
            .map(|(_, doc)| doc)
            .find(|doc| query.matches(doc)))
    }

    fn insert(&self, collection: &str, doc: Document) -> StoreResult<DocId> {
        let json = serde_json::to_string(&doc)?;
        let hash_key = self.hash_key(collection);
        let id_key = self.id_key(collection);

        self.with_conn(|conn| {
            let id: DocId = conn.incr(&id_key, 1)?;
            conn.hset::<_, _, _, ()>(&hash_key, id, &json)?;
            Ok(id)
        })
    }

    fn upsert(&self, collection: &str, doc: Document, query: &Query) -> StoreResult<Vec<DocId>> {
        let ids = self.matching(collection, query)?;
        if ids.is_empty() {
            return Ok(vec![self.insert(collection, doc)?]);
        }

        let json = serde_json::to_string(&doc)?;
        let hash_key = self.hash_key(collection);
        let fields: Vec<(DocId, &str)> = ids.iter().map(|id| (*id, json.as_str())).collect();
        self.with_conn(|conn| conn.hset_multiple::<_, _, _, ()>(&hash_key, &fields))?;
        Ok(ids)
    }

    fn remove(&self, collection: &str, query: &Query) -> StoreResult<Vec<DocId>> {
        let ids = self.matching(collection, query)?;
        if !ids.is_empty() {
            let hash_key = self.hash_key(collection);
            self.with_conn(|conn| conn.hdel::<_, _, ()>(&hash_key, ids.clone()))?;
        }
        Ok(ids)
    }

    fn all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        Ok(self.load(collection)?.into_iter().map(|(_, doc)| doc).collect())
    }
}
