//! Synced record model

use serde_json::{Map, Value};
use thiserror::Error;

use crate::util::compact_text;

/// Type discriminator of records that belong to the statistics collection.
pub const STATISTICS_TYPE: &str = "statistics";

/// Fields the backend may deliver as numeric strings.
const NUMERIC_FIELDS: [&str; 3] = ["id", "vid", "timestamp"];

/// Numeric fields a record cannot be stored without.
const REQUIRED_NUMERIC_FIELDS: [&str; 2] = ["id", "vid"];

/// Reasons a pulled document is rejected before it reaches the local store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("record field `{field}` is not an integer: {value}")]
    InvalidNumber { field: &'static str, value: String },
}

/// One synchronized document, after numeric coercion.
///
/// The document is kept verbatim (apart from coercion) so the local API can
/// serve exactly what the backend delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: i64,
    pub vid: i64,
    pub node_type: String,
    pub document: Value,
}

impl Record {
    /// Coerce numeric fields and validate the required ones.
    pub fn from_value(mut document: Value) -> Result<Self, RecordError> {
        let object = document.as_object_mut().ok_or(RecordError::NotAnObject)?;
        coerce_numeric_fields(object)?;

        let id = required_i64(object, "id")?;
        let vid = required_i64(object, "vid")?;
        let node_type = object
            .get("type")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
            .ok_or(RecordError::MissingField("type"))?;

        Ok(Self {
            id,
            vid,
            node_type,
            document,
        })
    }

    /// Whether this record is an aggregate statistics entry.
    pub fn is_statistics(&self) -> bool {
        self.node_type == STATISTICS_TYPE
    }
}

fn coerce_numeric_fields(object: &mut Map<String, Value>) -> Result<(), RecordError> {
    for field in NUMERIC_FIELDS {
        let Some(Value::String(raw)) = object.get(field) else {
            continue;
        };

        match raw.trim().parse::<i64>() {
            Ok(parsed) => {
                object.insert(field.to_string(), Value::from(parsed));
            }
            Err(_) if REQUIRED_NUMERIC_FIELDS.contains(&field) => {
                return Err(RecordError::InvalidNumber {
                    field,
                    value: compact_text(raw),
                });
            }
            // Optional fields such as ISO timestamps stay as delivered.
            Err(_) => {}
        }
    }
    Ok(())
}

fn required_i64(object: &Map<String, Value>, field: &'static str) -> Result<i64, RecordError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(RecordError::MissingField(field)),
        Some(value) => value.as_i64().ok_or_else(|| RecordError::InvalidNumber {
            field,
            value: compact_text(&value.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_numeric_strings() {
        let record = Record::from_value(json!({
            "id": "12",
            "vid": "340",
            "type": "person",
            "timestamp": "1700000000",
            "status": 1,
        }))
        .unwrap();

        assert_eq!(record.id, 12);
        assert_eq!(record.vid, 340);
        assert_eq!(record.node_type, "person");
        assert_eq!(record.document["id"], json!(12));
        assert_eq!(record.document["timestamp"], json!(1_700_000_000));
    }

    #[test]
    fn keeps_non_numeric_optional_fields() {
        let record = Record::from_value(json!({
            "id": 1,
            "vid": 2,
            "type": "session",
            "timestamp": "2024-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(record.document["timestamp"], json!("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn rejects_missing_or_invalid_required_fields() {
        assert_eq!(
            Record::from_value(json!({"vid": 1, "type": "person"})).unwrap_err(),
            RecordError::MissingField("id")
        );
        assert!(matches!(
            Record::from_value(json!({"id": "abc", "vid": 1, "type": "person"})).unwrap_err(),
            RecordError::InvalidNumber { field: "id", .. }
        ));
        assert_eq!(
            Record::from_value(json!({"id": 1, "vid": 1})).unwrap_err(),
            RecordError::MissingField("type")
        );
        assert_eq!(
            Record::from_value(json!([1, 2])).unwrap_err(),
            RecordError::NotAnObject
        );
    }

    #[test]
    fn detects_statistics_records() {
        let record =
            Record::from_value(json!({"id": 5, "vid": 9, "type": STATISTICS_TYPE})).unwrap();
        assert!(record.is_statistics());
    }
}
