//! Arguments exchanged between the local store and the sync handlers.

use crate::change_set::Changes;
use crate::record::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arguments handed to a pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullArgs {
    /// Watermark of the last successful pull, if any.
    pub last_pulled_at: Option<Timestamp>,
    /// Local schema version.
    pub schema_version: u32,
    /// Migration descriptor from the local store, forwarded untouched.
    #[serde(default)]
    pub migration: Option<Value>,
}

impl PullArgs {
    /// Creates pull arguments for the given watermark.
    pub fn new(last_pulled_at: Option<Timestamp>, schema_version: u32) -> Self {
        Self {
            last_pulled_at,
            schema_version,
            migration: None,
        }
    }

    /// Attaches a migration descriptor.
    pub fn with_migration(mut self, migration: Value) -> Self {
        self.migration = Some(migration);
        self
    }
}

/// Result of a pull: the changes to apply and the next watermark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullResult {
    /// Remote changes keyed by table.
    pub changes: Changes,
    /// Time of the pull, used as the next watermark.
    pub timestamp: Timestamp,
}

impl PullResult {
    /// Creates a pull result.
    pub fn new(changes: Changes, timestamp: Timestamp) -> Self {
        Self { changes, timestamp }
    }

    /// Merges another table's pull into this one.
    ///
    /// The later of the two timestamps is kept.
    pub fn merge(&mut self, other: PullResult) {
        self.changes.merge(other.changes);
        self.timestamp = self.timestamp.max(other.timestamp);
    }
}

/// Arguments handed to a push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushArgs {
    /// Outstanding local changes keyed by table.
    pub changes: Changes,
    /// Watermark in effect for this push.
    pub last_pulled_at: Option<Timestamp>,
}

impl PushArgs {
    /// Creates push arguments.
    pub fn new(changes: Changes, last_pulled_at: Option<Timestamp>) -> Self {
        Self {
            changes,
            last_pulled_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_set::ChangeSet;
    use crate::record::Record;

    #[test]
    fn pull_results_merge_keeps_latest_timestamp() {
        let mut result = PullResult::new(
            Changes::single("a", ChangeSet::from_records([Record::new("1", 1)], None)),
            100,
        );
        result.merge(PullResult::new(Changes::single("b", ChangeSet::new()), 105));
        result.merge(PullResult::new(Changes::single("c", ChangeSet::new()), 99));

        assert_eq!(result.timestamp, 105);
        assert_eq!(result.changes.tables().count(), 3);
    }

    #[test]
    fn migration_is_forwarded_as_is() {
        let args = PullArgs::new(Some(10), 3).with_migration(serde_json::json!({ "from": 2 }));
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["lastPulledAt"], 10);
        assert_eq!(json["schemaVersion"], 3);
        assert_eq!(json["migration"]["from"], 2);
    }
}
