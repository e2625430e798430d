//! Embedded document store
//!
//! File-backed JSON document storage used as the bundled document
//! backend:
//! - one directory per database and per collection
//! - one `<id>.json` file per document, numeric `_id` keys
//! - a per-collection id sequence in `_collection.json`
//!
//! [`DocumentBackend`] is the boundary the document facade talks to.

pub mod collection;
pub mod document;
pub mod error;
pub mod query;
pub mod storage;

pub use collection::Collection;
pub use document::{Document, ID_FIELD};
pub use error::NoSqlError;
pub use storage::EmbeddedStore;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::query::{Filter, FindOptions};

/// Outcome of an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Documents the filter selected
    pub matched: u64,
    /// Documents whose stored value changed
    pub modified: u64,
}

/// Document storage engine. Documents cross this boundary as field maps
/// keyed by name, with the identity under `_id`.
pub trait DocumentBackend: Send + Sync {
    /// Insert documents in order, returning their ids. A missing or zero
    /// `_id` is assigned by the backend.
    fn insert_many(&self, collection: &str, docs: Vec<Map<String, Value>>) -> error::Result<Vec<u32>>;

    /// Documents matching `opts`; a collection that does not exist holds
    /// no documents.
    fn find(&self, collection: &str, opts: &FindOptions) -> error::Result<Vec<Map<String, Value>>>;

    /// Set `fields` on the first (or, with `multi`, every) matching document
    fn update(
        &self,
        collection: &str,
        filter: &Filter,
        fields: &Map<String, Value>,
        multi: bool,
    ) -> error::Result<UpdateResult>;

    /// Remove the first (or, with `multi`, every) matching document
    fn delete(&self, collection: &str, filter: &Filter, multi: bool) -> error::Result<u64>;

    /// Release the backend. Calling it again is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
