use crate::schema::MemberRecord;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("member payload is not a JSON object")]
    NotAnObject,
    #[error("member payload field `rows` is not an array")]
    RowsNotArray,
    #[error("member row {index} is not a JSON object")]
    RowNotObject { index: usize },
}

/// One generation of the member dataset.
///
/// Keeps the provider envelope as decoded (every key, not only `rows`) so a
/// cache written from it loses nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    payload: Map<String, Value>,
    fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn from_payload(payload: Value, fetched_at: DateTime<Utc>) -> Result<Self, SnapshotError> {
        let Value::Object(payload) = payload else {
            return Err(SnapshotError::NotAnObject);
        };
        match payload.get("rows") {
            None => {}
            Some(Value::Array(rows)) => {
                if let Some(index) = rows.iter().position(|row| !row.is_object()) {
                    return Err(SnapshotError::RowNotObject { index });
                }
            }
            Some(_) => return Err(SnapshotError::RowsNotArray),
        }
        Ok(Self {
            payload,
            fetched_at,
        })
    }

    pub fn from_rows(rows: Vec<Map<String, Value>>, fetched_at: DateTime<Utc>) -> Self {
        let mut payload = Map::new();
        payload.insert(
            "rows".to_string(),
            Value::Array(rows.into_iter().map(Value::Object).collect()),
        );
        Self {
            payload,
            fetched_at,
        }
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Raw rows in provider order; empty when the envelope has no `rows`.
    pub fn rows(&self) -> impl Iterator<Item = &Map<String, Value>> {
        self.payload
            .get("rows")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
    }

    pub fn row_count(&self) -> usize {
        self.rows().count()
    }

    pub fn records(&self) -> Vec<MemberRecord> {
        self.rows().map(MemberRecord::from_row).collect()
    }
}
