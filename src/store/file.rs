//! JSON file backed store.
//!
//! One file per database, laid out as
//! `{"<collection>": {"<doc id>": {...}, ...}, ...}`. The file is read once on
//! open and rewritten in full after every mutation. A mutation becomes
//! visible in memory only once the rewrite succeeded.

use super::memory::Collection;
use super::{DocId, Document, DocumentStore, Query};
use crate::error::{StoreError, StoreResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

type Tables = BTreeMap<String, Collection>;

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonFileStore {
    /// Open `path`, creating it (and its parent directory) as `{}` if it does
    /// not exist yet.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };

        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            fs::write(&path, b"{}").map_err(io_err)?;
            tracing::info!(target: "route_gateway::store", path = %path.display(), "Created database file");
        }

        let raw = fs::read_to_string(&path).map_err(io_err)?;
        let tables: Tables = if raw.trim().is_empty() {
            Tables::new()
        } else {
            serde_json::from_str(&raw)?
        };

        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    fn persist(&self, tables: &Tables) -> StoreResult<()> {
        let io_err = |source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(tables)?).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }

    fn mutate<R>(&self, collection: &str, f: impl FnOnce(&mut Collection) -> R) -> StoreResult<R> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| StoreError::Poisoned("file store"))?;
        let previous = tables.get(collection).cloned();
        let mut next = previous.clone().unwrap_or_default();
        let result = f(&mut next);

        tables.insert(collection.to_string(), next);
        if let Err(e) = self.persist(&tables) {
            match previous {
                Some(previous) => tables.insert(collection.to_string(), previous),
                None => tables.remove(collection),
            };
            return Err(e);
        }
        Ok(result)
    }

    fn view<R: Default>(&self, collection: &str, f: impl FnOnce(&Collection) -> R) -> StoreResult<R> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| StoreError::Poisoned("file store"))?;
        Ok(tables.get(collection).map(f).unwrap_or_default())
    }
}

impl DocumentStore for JsonFileStore {
    fn get(&self, collection: &str, query: &Query) -> StoreResult<Option<Document>> {
        self.view(collection, |c| c.get(query))
    }

    fn insert(&self, collection: &str, doc: Document) -> StoreResult<DocId> {
        self.mutate(collection, |c| c.insert(doc))
    }

    fn upsert(&self, collection: &str, doc: Document, query: &Query) -> StoreResult<Vec<DocId>> {
        self.mutate(collection, |c| c.upsert(doc, query))
    }

    fn remove(&self, collection: &str, query: &Query) -> StoreResult<Vec<DocId>> {
        self.mutate(collection, |c| c.remove(query))
    }

    fn all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.view(collection, |c| c.all())
    }
}
