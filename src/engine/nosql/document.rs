//! Stored document representation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{NoSqlError, Result};

/// Key of the document identity field
pub const ID_FIELD: &str = "_id";

/// A stored document with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: u32,

    #[serde(rename = "_created_at")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "_modified_at")]
    pub modified_at: DateTime<Utc>,

    /// Record fields, without `_id`
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Document {
    /// Build a document from a record's field map; `_id` is taken out of
    /// `data` and replaced by `id`.
    pub fn with_id(id: u32, mut data: Map<String, Value>) -> Self {
        data.remove(ID_FIELD);
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            modified_at: now,
            data,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Overwrite the given fields. Returns true if any value changed.
    pub fn set_fields(&mut self, fields: &Map<String, Value>) -> bool {
        let mut changed = false;
        for (key, value) in fields {
            if key == ID_FIELD {
                continue;
            }
            if self.data.get(key) != Some(value) {
                self.data.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        if changed {
            self.modified_at = Utc::now();
        }
        changed
    }

    /// The record-facing view: data plus `_id`, no metadata
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = self.data.clone();
        fields.insert(ID_FIELD.to_string(), Value::from(self.id));
        fields
    }
}

/// Read the `_id` of a record field map; absent or zero means unassigned.
pub fn id_of(fields: &Map<String, Value>) -> Result<u32> {
    match fields.get(ID_FIELD) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| NoSqlError::InvalidDocument(format!("_id {} is not a valid id", n))),
        Some(other) => Err(NoSqlError::InvalidDocument(format!("_id must be a number, got {}", other))),
    }
}
