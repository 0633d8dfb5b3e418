//! Records exchanged between the local store and the remote API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::SystemTime;

/// Epoch timestamp in seconds.
pub type Timestamp = i64;

/// Column filter for list queries (column name to expected value).
pub type Filter = Map<String, Value>;

/// Returns the current time as epoch seconds.
pub fn unix_seconds() -> Timestamp {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as Timestamp)
        .unwrap_or_default()
}

/// A single row of an entity table.
///
/// Every record carries a stable `id` and the three bookkeeping timestamps.
/// `created_at` and `updated_at` are mandatory in well-formed data but are
/// kept optional here so malformed rows can be reported instead of rejected.
/// All remaining columns are carried in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Globally unique identifier.
    pub id: String,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    /// Tombstone marker.
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
    /// Remaining columns.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record stamped as created and updated at `at`.
    pub fn new(id: impl Into<String>, at: Timestamp) -> Self {
        Self {
            id: id.into(),
            created_at: Some(at),
            updated_at: Some(at),
            deleted_at: None,
            fields: Map::new(),
        }
    }

    /// Creates a record carrying only an identifier.
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            updated_at: None,
            deleted_at: None,
            fields: Map::new(),
        }
    }

    /// Sets a column value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the last modification time.
    pub fn with_updated_at(mut self, at: Timestamp) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Marks the record as deleted at `at`.
    pub fn with_deleted_at(mut self, at: Timestamp) -> Self {
        self.deleted_at = Some(at);
        self
    }

    /// Returns the tombstone time if the record is deleted.
    ///
    /// A zero `deleted_at` does not count as a tombstone.
    pub fn tombstone(&self) -> Option<Timestamp> {
        self.deleted_at.filter(|at| *at > 0)
    }

    /// Returns true if the record carries a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.tombstone().is_some()
    }

    /// Returns true if both mandatory timestamps are present.
    pub fn has_timestamps(&self) -> bool {
        self.created_at.is_some() && self.updated_at.is_some()
    }

    /// Returns true if every filter column equals the record's value.
    ///
    /// An array filter value matches any of its elements.
    pub fn matches(&self, filter: &Filter) -> bool {
        filter.iter().all(|(column, expected)| {
            let actual = self.column(column);
            match expected {
                Value::Array(options) => options.iter().any(|v| *v == actual),
                other => *other == actual,
            }
        })
    }

    /// Returns a column by name, including the bookkeeping columns.
    pub fn column(&self, name: &str) -> Value {
        match name {
            "id" => Value::String(self.id.clone()),
            "createdAt" => self.created_at.map(Value::from).unwrap_or(Value::Null),
            "updatedAt" => self.updated_at.map(Value::from).unwrap_or(Value::Null),
            "deletedAt" => self.deleted_at.map(Value::from).unwrap_or(Value::Null),
            other => self.fields.get(other).cloned().unwrap_or(Value::Null),
        }
    }

    /// Returns the key used to address this record in delete calls.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            id: self.id.clone(),
        }
    }
}

/// Identifier-only payload for batch deletes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Record identifier.
    pub id: String,
}

impl From<String> for RecordKey {
    fn from(id: String) -> Self {
        Self { id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_camel_case_with_extra_columns() {
        let record: Record = serde_json::from_value(json!({
            "id": "x",
            "createdAt": 100,
            "updatedAt": 120,
            "deletedAt": null,
            "title": "hello"
        }))
        .unwrap();

        assert_eq!(record.id, "x");
        assert_eq!(record.created_at, Some(100));
        assert_eq!(record.updated_at, Some(120));
        assert_eq!(record.deleted_at, None);
        assert_eq!(record.fields.get("title"), Some(&json!("hello")));
        assert!(record.has_timestamps());
    }

    #[test]
    fn missing_timestamps_are_kept() {
        let record: Record = serde_json::from_value(json!({ "id": "y" })).unwrap();
        assert!(!record.has_timestamps());
        assert!(!record.is_deleted());
    }

    #[test]
    fn zero_deleted_at_is_not_a_tombstone() {
        let record = Record::new("z", 10).with_deleted_at(0);
        assert!(!record.is_deleted());
        assert!(Record::new("z", 10).with_deleted_at(11).is_deleted());
    }

    #[test]
    fn filter_matching() {
        let record = Record::new("a", 1).with_field("owner", "u1");

        let mut filter = Filter::new();
        filter.insert("owner".into(), json!("u1"));
        assert!(record.matches(&filter));

        filter.insert("owner".into(), json!(["u2", "u1"]));
        assert!(record.matches(&filter));

        filter.insert("deletedAt".into(), Value::Null);
        assert!(record.matches(&filter));

        filter.insert("owner".into(), json!("u3"));
        assert!(!record.matches(&filter));
    }
}
