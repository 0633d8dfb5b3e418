//! Per-table change sets and the merged change map.

use crate::classify::{classify, ChangeKind};
use crate::record::{Record, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts of created, updated and deleted records for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Number of created records.
    pub created: usize,
    /// Number of updated records.
    pub updated: usize,
    /// Number of deleted records.
    pub deleted: usize,
}

impl SyncStats {
    /// Creates stats from explicit counts.
    pub fn new(created: usize, updated: usize, deleted: usize) -> Self {
        Self {
            created,
            updated,
            deleted,
        }
    }

    /// Returns the total number of changes.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// The created/updated/deleted partition of one table.
///
/// Created and updated entries carry full records, deletions only carry
/// identifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Records new since the watermark.
    #[serde(default)]
    pub created: Vec<Record>,
    /// Records modified since the watermark.
    #[serde(default)]
    pub updated: Vec<Record>,
    /// Identifiers of records deleted since the watermark.
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies records against the watermark and partitions them.
    ///
    /// Ignored records are dropped.
    pub fn from_records(
        records: impl IntoIterator<Item = Record>,
        watermark: Option<Timestamp>,
    ) -> Self {
        let mut set = Self::new();
        for record in records {
            match classify(&record, watermark) {
                ChangeKind::Created => set.created.push(record),
                ChangeKind::Updated => set.updated.push(record),
                ChangeKind::Deleted => set.deleted.push(record.id),
                ChangeKind::Ignored => {}
            }
        }
        set
    }

    /// Returns the counts of this change set.
    pub fn stats(&self) -> SyncStats {
        SyncStats::new(self.created.len(), self.updated.len(), self.deleted.len())
    }

    /// Returns true if there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Appends another change set.
    pub fn extend(&mut self, other: ChangeSet) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.deleted.extend(other.deleted);
    }
}

/// Change sets keyed by table name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Changes(BTreeMap<String, ChangeSet>);

impl Changes {
    /// Creates an empty change map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a change map holding a single table.
    pub fn single(table: impl Into<String>, set: ChangeSet) -> Self {
        let mut changes = Self::new();
        changes.insert(table, set);
        changes
    }

    /// Inserts or replaces a table's change set.
    pub fn insert(&mut self, table: impl Into<String>, set: ChangeSet) {
        self.0.insert(table.into(), set);
    }

    /// Returns a table's change set.
    pub fn get(&self, table: &str) -> Option<&ChangeSet> {
        self.0.get(table)
    }

    /// Merges another change map into this one.
    ///
    /// Tables are normally disjoint; a table present in both has its
    /// entries appended.
    pub fn merge(&mut self, other: Changes) {
        for (table, set) in other.0 {
            self.0.entry(table).or_default().extend(set);
        }
    }

    /// Returns the table names in this map.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterates over tables and their change sets.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ChangeSet)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the counts for a table (zero if absent).
    pub fn stats_for(&self, table: &str) -> SyncStats {
        self.get(table).map(ChangeSet::stats).unwrap_or_default()
    }

    /// Returns true if no table has any change.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(ChangeSet::is_empty)
    }
}
