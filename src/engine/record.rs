//! Record contract
//!
//! Application types implement [`Record`] to be stored by the facades.
//! The trait declares the base table/collection name and the identity
//! accessors; column layout is inferred from the zero value unless the
//! type overrides [`Record::columns`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::adapter::dialect::{ColumnDef, ColumnType};
use super::error::{DbError, Result};

/// Name of the identity column for relational records
pub const ID_COLUMN: &str = "id";

pub trait Record: Serialize + DeserializeOwned + Default {
    /// Base table or collection name, before any session prefix
    const TABLE: &'static str;

    fn id(&self) -> u32;

    fn set_id(&mut self, id: u32);

    /// Column layout used by auto-migrate
    fn columns() -> Result<Vec<ColumnDef>> {
        infer_columns(&Self::default())
    }
}

/// Identity base for relational records; embed with `#[serde(flatten)]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    pub id: u32,
}

impl Model {
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Apply a session prefix to a base name
pub fn prefixed_name(prefix: &str, base: &str) -> String {
    if prefix.is_empty() {
        base.to_string()
    } else {
        format!("{}_{}", prefix, base)
    }
}

/// Serialize a record into its field map.
pub fn to_fields<T: Serialize>(record: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(DbError::InvalidArgument(format!(
            "record must serialize to a map, got {}",
            kind_of(&other)
        ))),
    }
}

/// Zero values are skipped when a record is used as a filter template
pub fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Derive a column layout from a record's zero value.
///
/// Fields that are null in the zero value (`Option`s) get their type from
/// the first sample value the record accepts in that position.
pub fn infer_columns<T: Serialize + DeserializeOwned>(zero: &T) -> Result<Vec<ColumnDef>> {
    let fields = to_fields(zero)?;
    let mut columns = Vec::with_capacity(fields.len());

    if fields.contains_key(ID_COLUMN) {
        columns.push(ColumnDef::primary_key(ID_COLUMN));
    }
    for (name, value) in &fields {
        if name == ID_COLUMN {
            continue;
        }
        let col = match value {
            Value::Null => ColumnDef::new(name.as_str(), optional_type::<T>(&fields, name)?),
            Value::Bool(_) => ColumnDef::new(name.as_str(), ColumnType::Boolean).not_null(),
            Value::Number(n) if n.is_f64() => ColumnDef::new(name.as_str(), ColumnType::Real).not_null(),
            Value::Number(_) => ColumnDef::new(name.as_str(), ColumnType::Integer).not_null(),
            Value::String(_) => ColumnDef::new(name.as_str(), ColumnType::Text).not_null(),
            Value::Array(_) | Value::Object(_) => ColumnDef::new(name.as_str(), ColumnType::Json),
        };
        columns.push(col);
    }
    Ok(columns)
}

/// Column type of a field whose zero value is null, found by asking serde
/// which sample value the record deserializes with in that slot.
fn optional_type<T: DeserializeOwned>(zero: &Map<String, Value>, field: &str) -> Result<ColumnType> {
    let accepts = |sample: Value| {
        let mut candidate = zero.clone();
        candidate.insert(field.to_string(), sample);
        serde_json::from_value::<T>(Value::Object(candidate)).is_ok()
    };

    if accepts(Value::Bool(true)) && accepts(Value::String(String::new())) {
        return Err(DbError::InvalidArgument(format!(
            "field {} has no fixed type; override Record::columns",
            field
        )));
    }
    let samples = [
        (ColumnType::Boolean, serde_json::json!(true)),
        (ColumnType::Real, serde_json::json!(0.5)),
        (ColumnType::Integer, serde_json::json!(0)),
        (ColumnType::Text, serde_json::json!("")),
        (ColumnType::Text, serde_json::json!("1970-01-01T00:00:00Z")),
        (ColumnType::Json, serde_json::json!([])),
        (ColumnType::Json, serde_json::json!({})),
    ];
    samples
        .into_iter()
        .find(|(_, sample)| accepts(sample.clone()))
        .map(|(col_type, _)| col_type)
        .ok_or_else(|| {
            DbError::InvalidArgument(format!(
                "cannot infer a column type for optional field {}; override Record::columns",
                field
            ))
        })
}

/// Turn a driver row back into a record, undoing storage conversions:
/// booleans stored as integers and JSON stored as text.
pub fn decode_row<T: Record>(mut row: Map<String, Value>, columns: &[ColumnDef]) -> Result<T> {
    for col in columns {
        let Some(value) = row.get_mut(&col.name) else {
            continue;
        };
        let restored = match (col.col_type, &*value) {
            (ColumnType::Boolean, Value::Number(n)) => Some(Value::Bool(n.as_i64().unwrap_or(0) != 0)),
            (ColumnType::Json, Value::String(s)) => Some(serde_json::from_str(s).map_err(|e| {
                DbError::InvalidData(format!("column {} holds invalid JSON: {}", col.name, e))
            })?),
            _ => None,
        };
        if let Some(restored) = restored {
            *value = restored;
        }
    }
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Convert a driver-assigned key to a record id
pub fn id_from_i64(id: i64) -> Result<u32> {
    u32::try_from(id).map_err(|_| DbError::InvalidData(format!("id {} does not fit a record id", id)))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Gadget {
        #[serde(flatten)]
        model: Model,
        label: String,
        weight: f64,
        enabled: bool,
        tags: Vec<String>,
        note: Option<String>,
    }

    impl Record for Gadget {
        const TABLE: &'static str = "gadgets";

        fn id(&self) -> u32 {
            self.model.id
        }

        fn set_id(&mut self, id: u32) {
            self.model.id = id;
        }
    }

    #[test]
    fn test_prefixed_name() {
        assert_eq!(prefixed_name("app", "widgets"), "app_widgets");
        assert_eq!(prefixed_name("", "widgets"), "widgets");
    }

    #[test]
    fn test_infer_columns() {
        let cols = Gadget::columns().unwrap();
        assert_eq!(cols[0], ColumnDef::primary_key("id"));

        let find = |name: &str| cols.iter().find(|c| c.name == name).unwrap().clone();
        assert_eq!(find("label").col_type, ColumnType::Text);
        assert_eq!(find("weight").col_type, ColumnType::Real);
        assert_eq!(find("enabled").col_type, ColumnType::Boolean);
        assert_eq!(find("tags").col_type, ColumnType::Json);
        assert!(find("note").nullable);
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sparse {
        #[serde(flatten)]
        model: Model,
        qty: Option<i64>,
        ratio: Option<f64>,
        flag: Option<bool>,
        labels: Option<Vec<String>>,
        note: Option<String>,
    }

    impl Record for Sparse {
        const TABLE: &'static str = "sparse";

        fn id(&self) -> u32 {
            self.model.id
        }

        fn set_id(&mut self, id: u32) {
            self.model.id = id;
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Loose {
        #[serde(flatten)]
        model: Model,
        extra: Option<Value>,
    }

    impl Record for Loose {
        const TABLE: &'static str = "loose";

        fn id(&self) -> u32 {
            self.model.id
        }

        fn set_id(&mut self, id: u32) {
            self.model.id = id;
        }
    }

    #[test]
    fn test_infer_optional_columns() {
        let cols = Sparse::columns().unwrap();
        let find = |name: &str| cols.iter().find(|c| c.name == name).unwrap().clone();
        assert_eq!(find("qty").col_type, ColumnType::Integer);
        assert_eq!(find("ratio").col_type, ColumnType::Real);
        assert_eq!(find("flag").col_type, ColumnType::Boolean);
        assert_eq!(find("labels").col_type, ColumnType::Json);
        assert_eq!(find("note").col_type, ColumnType::Text);
        assert!(cols.iter().skip(1).all(|c| c.nullable));

        let err = Loose::columns().unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(ref msg) if msg.contains("extra")));
    }

    #[test]
    fn test_decode_row_restores_types() {
        let cols = Gadget::columns().unwrap();
        let row = json!({
            "id": 4,
            "label": "lamp",
            "weight": 1.5,
            "enabled": 1,
            "tags": "[\"a\",\"b\"]",
            "note": null
        });
        let gadget: Gadget = decode_row(row.as_object().unwrap().clone(), &cols).unwrap();
        assert_eq!(gadget.id(), 4);
        assert!(gadget.enabled);
        assert_eq!(gadget.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_is_zero() {
        assert!(is_zero(&json!(0)));
        assert!(is_zero(&json!(0.0)));
        assert!(is_zero(&json!("")));
        assert!(is_zero(&json!(false)));
        assert!(!is_zero(&json!(-1)));
        assert!(!is_zero(&json!("x")));
    }

    #[test]
    fn test_id_conversion() {
        assert_eq!(id_from_i64(12).unwrap(), 12);
        assert!(id_from_i64(-1).is_err());
        assert!(id_from_i64(i64::from(u32::MAX) + 1).is_err());
    }
}
