//! Embedded Storage Engine
//!
//! Main entry point for the file-backed document store

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::collection::{validate_name, Collection};
use super::document::{id_of, Document};
use super::error::{NoSqlError, Result};
use super::query;
use super::{DocumentBackend, UpdateResult};
use crate::engine::query::{Filter, FindOptions};

/// One database of the embedded store, rooted at `<root>/<database>`
pub struct EmbeddedStore {
    base_path: PathBuf,
    database: String,
    closed: AtomicBool,
    /// Writers take it exclusively, readers shared
    lock: RwLock<()>,
}

impl std::fmt::Debug for EmbeddedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedStore")
            .field("base_path", &self.base_path)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl EmbeddedStore {
    /// Open a database, creating its directory if needed
    pub fn open(root: &Path, database: &str) -> Result<Self> {
        validate_name(database).map_err(|_| NoSqlError::InvalidDatabaseName(database.to_string()))?;
        let base_path = root.join(database);
        fs::create_dir_all(&base_path)?;
        tracing::debug!(path = %base_path.display(), "embedded store opened");

        Ok(Self {
            base_path,
            database: database.to_string(),
            closed: AtomicBool::new(false),
            lock: RwLock::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Names of the collections created so far
    pub fn list_collections(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let _guard = self.read();
        let mut collections = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name() {
                let name = name.to_string_lossy();
                if !name.starts_with('.') && !name.starts_with('_') {
                    collections.push(name.to_string());
                }
            }
        }
        collections.sort();
        Ok(collections)
    }

    pub fn collection_exists(&self, name: &str) -> bool {
        matches!(Collection::open(&self.base_path, name), Ok(Some(_)))
    }

    /// Remove a collection and all its documents; missing is not an error
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.write();
        if let Some(col) = Collection::open(&self.base_path, name)? {
            col.drop()?;
            tracing::info!(collection = name, "collection dropped");
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(NoSqlError::Closed)
        } else {
            Ok(())
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Matching documents of an existing collection, in id order
    fn select(&self, col: &Collection, filter: &Filter, multi: bool) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        for doc in col.all()? {
            if query::matches(&doc, filter) {
                out.push(doc);
                if !multi {
                    break;
                }
            }
        }
        Ok(out)
    }
}

impl DocumentBackend for EmbeddedStore {
    fn insert_many(&self, collection: &str, docs: Vec<Map<String, Value>>) -> Result<Vec<u32>> {
        self.ensure_open()?;
        let _guard = self.write();
        let col = Collection::open_or_create(&self.base_path, collection)?;

        let mut ids = Vec::with_capacity(docs.len());
        for fields in docs {
            let id = id_of(&fields)?;
            ids.push(col.insert(Document::with_id(id, fields))?);
        }
        tracing::debug!(collection, count = ids.len(), "documents inserted");
        Ok(ids)
    }

    fn find(&self, collection: &str, opts: &FindOptions) -> Result<Vec<Map<String, Value>>> {
        self.ensure_open()?;
        let _guard = self.read();
        let Some(col) = Collection::open(&self.base_path, collection)? else {
            return Ok(Vec::new());
        };
        Ok(query::execute(col.all()?, opts)
            .iter()
            .map(Document::to_fields)
            .collect())
    }

    fn update(
        &self,
        collection: &str,
        filter: &Filter,
        fields: &Map<String, Value>,
        multi: bool,
    ) -> Result<UpdateResult> {
        self.ensure_open()?;
        let _guard = self.write();
        let Some(col) = Collection::open(&self.base_path, collection)? else {
            return Ok(UpdateResult::default());
        };

        let mut result = UpdateResult::default();
        for mut doc in self.select(&col, filter, multi)? {
            result.matched += 1;
            if doc.set_fields(fields) {
                col.replace(&doc)?;
                result.modified += 1;
            }
        }
        tracing::debug!(collection, matched = result.matched, modified = result.modified, "documents updated");
        Ok(result)
    }

    fn delete(&self, collection: &str, filter: &Filter, multi: bool) -> Result<u64> {
        self.ensure_open()?;
        let _guard = self.write();
        let Some(col) = Collection::open(&self.base_path, collection)? else {
            return Ok(0);
        };

        let mut deleted = 0;
        for doc in self.select(&col, filter, multi)? {
            col.delete(doc.id)?;
            deleted += 1;
        }
        tracing::debug!(collection, deleted, "documents deleted");
        Ok(deleted)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(database = %self.database, "embedded store closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn fields(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_store_lifecycle() {
        let dir = tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path(), "main").unwrap();
        assert!(store.list_collections().unwrap().is_empty());

        let ids = store
            .insert_many("users", vec![fields(json!({"name": "Alice"})), fields(json!({"name": "Bob"}))])
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
        assert!(store.collection_exists("users"));

        let found = store.find("users", &FindOptions::new()).unwrap();
        assert_eq!(found[1], fields(json!({"_id": 2, "name": "Bob"})));

        let res = store
            .update("users", &Filter::new().eq("name", "Bob"), &fields(json!({"age": 40})), false)
            .unwrap();
        assert_eq!(res, UpdateResult { matched: 1, modified: 1 });

        assert_eq!(store.delete("users", &Filter::new(), true).unwrap(), 2);
        store.drop_collection("users").unwrap();
        assert!(!store.collection_exists("users"));
    }

    #[test]
    fn test_missing_collection_is_empty() {
        let dir = tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path(), "main").unwrap();
        assert!(store.find("ghosts", &FindOptions::new()).unwrap().is_empty());
        assert_eq!(store.delete("ghosts", &Filter::new(), true).unwrap(), 0);
        assert!(!store.collection_exists("ghosts"));
    }

    #[test]
    fn test_reopen_keeps_documents() {
        let dir = tempdir().unwrap();
        {
            let store = EmbeddedStore::open(dir.path(), "main").unwrap();
            store.insert_many("test", vec![fields(json!({"x": 1}))]).unwrap();
        }
        let store = EmbeddedStore::open(dir.path(), "main").unwrap();
        assert_eq!(store.find("test", &FindOptions::new()).unwrap().len(), 1);
        assert_eq!(store.insert_many("test", vec![fields(json!({"x": 2}))]).unwrap(), vec![2]);
    }

    #[test]
    fn test_find_during_concurrent_delete() {
        let dir = tempdir().unwrap();
        let store = std::sync::Arc::new(EmbeddedStore::open(dir.path(), "main").unwrap());

        for _ in 0..10 {
            let docs = (0..100).map(|i| fields(json!({"n": i}))).collect();
            store.insert_many("books", docs).unwrap();

            let deleter = {
                let store = store.clone();
                std::thread::spawn(move || store.delete("books", &Filter::new(), true))
            };
            for _ in 0..5 {
                let found = store.find("books", &FindOptions::new()).unwrap();
                assert!(found.is_empty() || found.len() == 100);
            }
            assert_eq!(deleter.join().unwrap().unwrap(), 100);
        }
    }

    #[test]
    fn test_closed_store_rejects_calls() {
        let dir = tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path(), "main").unwrap();
        store.close();
        store.close();
        assert!(matches!(store.find("x", &FindOptions::new()), Err(NoSqlError::Closed)));
        assert!(EmbeddedStore::open(dir.path(), "bad/name").is_err());
    }
}
