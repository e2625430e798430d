//! Collection management for the embedded store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::document::Document;
use super::error::{NoSqlError, Result};

const COLLECTION_META: &str = "_collection.json";

/// Per-collection bookkeeping stored in `_collection.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionMeta {
    /// Highest id handed out or stored so far
    sequence: u32,
    created_at: DateTime<Utc>,
}

/// A directory of `<id>.json` documents
pub struct Collection {
    pub name: String,
    path: PathBuf,
}

impl Collection {
    /// Open an existing collection, or `None` if it was never created
    pub fn open(base_path: &Path, name: &str) -> Result<Option<Self>> {
        validate_name(name)?;
        let path = base_path.join(name);
        if !path.is_dir() {
            return Ok(None);
        }
        Ok(Some(Self { name: name.to_string(), path }))
    }

    /// Open a collection, creating it on first use
    pub fn open_or_create(base_path: &Path, name: &str) -> Result<Self> {
        if let Some(col) = Self::open(base_path, name)? {
            return Ok(col);
        }

        let path = base_path.join(name);
        fs::create_dir_all(&path)?;
        let col = Self { name: name.to_string(), path };
        col.save_meta(&CollectionMeta { sequence: 0, created_at: Utc::now() })?;
        tracing::debug!(collection = name, "collection created");
        Ok(col)
    }

    fn doc_path(&self, id: u32) -> PathBuf {
        self.path.join(format!("{}.json", id))
    }

    fn load_meta(&self) -> Result<CollectionMeta> {
        let meta_path = self.path.join(COLLECTION_META);
        if !meta_path.exists() {
            return Ok(CollectionMeta { sequence: 0, created_at: Utc::now() });
        }
        let content = fs::read_to_string(meta_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save_meta(&self, meta: &CollectionMeta) -> Result<()> {
        let content = serde_json::to_string_pretty(meta)?;
        fs::write(self.path.join(COLLECTION_META), content)?;
        Ok(())
    }

    /// Insert a document. An id of 0 takes the next value of the
    /// collection sequence; explicit ids move the sequence past them.
    pub fn insert(&self, mut doc: Document) -> Result<u32> {
        let mut meta = self.load_meta()?;
        if doc.id == 0 {
            doc.id = meta.sequence.checked_add(1).ok_or_else(|| {
                NoSqlError::InvalidDocument(format!("id sequence of {} is exhausted", self.name))
            })?;
        }

        let doc_path = self.doc_path(doc.id);
        if doc_path.exists() {
            return Err(NoSqlError::DuplicateId { collection: self.name.clone(), id: doc.id });
        }

        fs::write(doc_path, serde_json::to_string_pretty(&doc)?)?;
        if doc.id > meta.sequence {
            meta.sequence = doc.id;
            self.save_meta(&meta)?;
        }
        Ok(doc.id)
    }

    pub fn get(&self, id: u32) -> Result<Document> {
        let doc_path = self.doc_path(id);
        if !doc_path.exists() {
            return Err(NoSqlError::DocumentNotFound { collection: self.name.clone(), id });
        }
        let content = fs::read_to_string(doc_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write back an existing document
    pub fn replace(&self, doc: &Document) -> Result<()> {
        let doc_path = self.doc_path(doc.id);
        if !doc_path.exists() {
            return Err(NoSqlError::DocumentNotFound { collection: self.name.clone(), id: doc.id });
        }
        fs::write(doc_path, serde_json::to_string_pretty(doc)?)?;
        Ok(())
    }

    pub fn delete(&self, id: u32) -> Result<()> {
        let doc_path = self.doc_path(id);
        if !doc_path.exists() {
            return Err(NoSqlError::DocumentNotFound { collection: self.name.clone(), id });
        }
        fs::remove_file(doc_path)?;
        Ok(())
    }

    /// Document ids in ascending order
    pub fn list_ids(&self) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            // System files start with '_' and never parse as ids
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// All documents, ascending by id
    pub fn all(&self) -> Result<Vec<Document>> {
        let ids = self.list_ids()?;
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            docs.push(self.get(id)?);
        }
        Ok(docs)
    }

    pub fn drop(self) -> Result<()> {
        fs::remove_dir_all(&self.path)?;
        Ok(())
    }
}

/// Collection and database names become directory names
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(NoSqlError::InvalidCollectionName("name cannot be empty".to_string()));
    }
    if name.starts_with('_') {
        return Err(NoSqlError::InvalidCollectionName(format!("{}: name cannot start with underscore", name)));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(NoSqlError::InvalidCollectionName(format!("{}: name must be alphanumeric", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn doc(id: u32, data: serde_json::Value) -> Document {
        Document::with_id(id, data.as_object().unwrap().clone())
    }

    #[test]
    fn test_collection_crud() {
        let dir = tempdir().unwrap();
        assert!(Collection::open(dir.path(), "users").unwrap().is_none());
        let col = Collection::open_or_create(dir.path(), "users").unwrap();

        let id = col.insert(doc(0, json!({"name": "Alice", "age": 30}))).unwrap();
        assert_eq!(id, 1);

        let mut stored = col.get(id).unwrap();
        assert_eq!(stored.get("name"), Some(&json!("Alice")));

        stored.set_fields(json!({"age": 31}).as_object().unwrap());
        col.replace(&stored).unwrap();
        assert_eq!(col.get(id).unwrap().get("age"), Some(&json!(31)));

        col.delete(id).unwrap();
        assert!(matches!(col.get(id), Err(NoSqlError::DocumentNotFound { .. })));
    }

    #[test]
    fn test_sequence_skips_explicit_ids() {
        let dir = tempdir().unwrap();
        let col = Collection::open_or_create(dir.path(), "items").unwrap();

        assert_eq!(col.insert(doc(10, json!({}))).unwrap(), 10);
        assert_eq!(col.insert(doc(0, json!({}))).unwrap(), 11);
        assert!(matches!(
            col.insert(doc(10, json!({}))),
            Err(NoSqlError::DuplicateId { id: 10, .. })
        ));
        assert_eq!(col.list_ids().unwrap(), vec![10, 11]);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("app_widgets").is_ok());
        assert!(validate_name("_collection").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("").is_err());
    }
}
