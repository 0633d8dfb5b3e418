//! Local store abstraction and an in-memory implementation.

use crate::error::{SyncError, SyncResult, MISSING_MIGRATION_DIAGNOSTIC};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tablesync_protocol::{
    unix_seconds, ChangeSet, Changes, Filter, PullArgs, PullResult, PushArgs, Record, Timestamp,
};
use tracing::{debug, info, warn};

/// Row count above which a local list query is reported as unbounded.
pub const LARGE_RESULT_THRESHOLD: usize = 500;

/// The pull and push halves of a sync cycle, as seen by the local store.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Fetches remote changes since the watermark in `args`.
    async fn pull_changes(&self, args: PullArgs) -> SyncResult<PullResult>;

    /// Sends outstanding local changes.
    async fn push_changes(&self, args: PushArgs) -> SyncResult<()>;
}

/// A local record store that can run a two-phase sync.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Runs one cycle: pull, apply the pulled changes and advance the
    /// watermark, then push outstanding local changes and mark them synced.
    async fn synchronize(&self, handler: &dyn SyncHandler) -> SyncResult<()>;
}

/// Tables and version of a local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    /// Schema version.
    pub version: u32,
    /// Known table names.
    pub tables: Vec<String>,
}

impl StoreSchema {
    /// Creates a schema.
    pub fn new(version: u32, tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            version,
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the table is part of the schema.
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }
}

/// Local sync status of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RowStatus {
    /// Matches the last pulled or pushed state.
    Synced,
    /// Created locally, not yet pushed.
    Created,
    /// Modified locally, not yet pushed.
    Updated,
}

/// Options for [`MemoryStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Column filter.
    pub filter: Option<Filter>,
    /// Include tombstoned rows.
    pub include_deleted: bool,
    /// Rows to skip.
    pub offset: usize,
    /// Maximum rows to return.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Row {
    record: Record,
    status: RowStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TableState {
    rows: BTreeMap<String, Row>,
    deleted: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreState {
    schema: StoreSchema,
    last_pulled_at: Option<Timestamp>,
    #[serde(default)]
    migration: Option<Value>,
    #[serde(default)]
    tables: BTreeMap<String, TableState>,
}

/// An in-memory local store.
///
/// Tracks per-row sync status so local writes become outstanding changes,
/// applies pulled changes last-writer-wins by `updatedAt`, and can be
/// snapshotted to JSON.
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Creates an empty store for the schema.
    pub fn new(schema: StoreSchema) -> Self {
        Self {
            state: RwLock::new(StoreState {
                schema,
                last_pulled_at: None,
                migration: None,
                tables: BTreeMap::new(),
            }),
        }
    }

    /// Loads a snapshot written by [`MemoryStore::save`].
    pub fn load(path: &Path) -> SyncResult<Self> {
        let state: StoreState = serde_json::from_slice(&std::fs::read(path)?)?;
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Loads a snapshot if one exists, otherwise creates an empty store.
    pub fn open_or_create(path: &Path, schema: StoreSchema) -> SyncResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new(schema))
        }
    }

    /// Writes a JSON snapshot of the whole store.
    pub fn save(&self, path: &Path) -> SyncResult<()> {
        let json = serde_json::to_vec_pretty(&*self.state.read())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Returns the schema.
    pub fn schema(&self) -> StoreSchema {
        self.state.read().schema.clone()
    }

    /// Sets the migration descriptor forwarded with the next pull.
    pub fn set_migration(&self, migration: Option<Value>) {
        self.state.write().migration = migration;
    }

    /// Returns the watermark of the last applied pull.
    pub fn last_pulled_at(&self) -> Option<Timestamp> {
        self.state.read().last_pulled_at
    }

    /// Creates a record with a fresh id.
    pub fn create(&self, table: &str, fields: Map<String, Value>) -> SyncResult<Record> {
        let now = unix_seconds();
        let mut record = Record::new(uuid::Uuid::new_v4().to_string(), now);
        record.fields = fields;

        let mut state = self.state.write();
        let rows = &mut table_mut(&mut state, table)?.rows;
        rows.insert(
            record.id.clone(),
            Row {
                record: record.clone(),
                status: RowStatus::Created,
            },
        );
        Ok(record)
    }

    /// Merges `fields` into a record and stamps `updatedAt`.
    pub fn update(&self, table: &str, id: &str, fields: Map<String, Value>) -> SyncResult<Record> {
        self.modify(table, id, |record| record.fields.extend(fields))
    }

    /// Tombstones a record. The tombstone is pushed as an update.
    pub fn soft_delete(&self, table: &str, id: &str) -> SyncResult<Record> {
        self.modify(table, id, |record| record.deleted_at = Some(unix_seconds()))
    }

    /// Removes a record locally and queues its id for a remote delete.
    ///
    /// Records never pushed are simply dropped.
    pub fn mark_as_deleted(&self, table: &str, id: &str) -> SyncResult<()> {
        let mut state = self.state.write();
        let table_state = table_mut(&mut state, table)?;
        let row = table_state
            .rows
            .remove(id)
            .ok_or_else(|| SyncError::Store(format!("record {id} not found in {table}")))?;
        if row.status != RowStatus::Created {
            table_state.deleted.insert(id.to_string());
        }
        Ok(())
    }

    fn modify(&self, table: &str, id: &str, f: impl FnOnce(&mut Record)) -> SyncResult<Record> {
        let mut state = self.state.write();
        let row = table_mut(&mut state, table)?
            .rows
            .get_mut(id)
            .ok_or_else(|| SyncError::Store(format!("record {id} not found in {table}")))?;
        f(&mut row.record);
        row.record.updated_at = Some(unix_seconds());
        if row.status == RowStatus::Synced {
            row.status = RowStatus::Updated;
        }
        Ok(row.record.clone())
    }

    /// Returns a record by id, tombstoned or not.
    pub fn get(&self, table: &str, id: &str) -> Option<Record> {
        let state = self.state.read();
        state.tables.get(table)?.rows.get(id).map(|r| r.record.clone())
    }

    /// Returns the sync status of a record.
    pub fn status(&self, table: &str, id: &str) -> Option<RowStatus> {
        let state = self.state.read();
        state.tables.get(table)?.rows.get(id).map(|r| r.status)
    }

    /// Lists records of a table in id order.
    pub fn list(&self, table: &str, query: &ListQuery) -> Vec<Record> {
        let state = self.state.read();
        let Some(table_state) = state.tables.get(table) else {
            return Vec::new();
        };

        let records: Vec<Record> = table_state
            .rows
            .values()
            .map(|row| &row.record)
            .filter(|r| query.include_deleted || !r.is_deleted())
            .filter(|r| query.filter.as_ref().map_or(true, |f| r.matches(f)))
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        if records.len() > LARGE_RESULT_THRESHOLD {
            warn!(
                table,
                count = records.len(),
                filter = ?query.filter,
                "more than {LARGE_RESULT_THRESHOLD} rows returned by query; add a filter or offset and limit"
            );
        }
        records
    }

    /// Returns every local change not yet pushed.
    pub fn outstanding_changes(&self) -> Changes {
        let state = self.state.read();
        let mut changes = Changes::new();
        for (table, table_state) in &state.tables {
            let mut set = ChangeSet::new();
            for row in table_state.rows.values() {
                match row.status {
                    RowStatus::Created => set.created.push(row.record.clone()),
                    RowStatus::Updated => set.updated.push(row.record.clone()),
                    RowStatus::Synced => {}
                }
            }
            set.deleted.extend(table_state.deleted.iter().cloned());
            if !set.is_empty() {
                changes.insert(table.clone(), set);
            }
        }
        changes
    }

    /// Applies pulled changes atomically.
    ///
    /// Fails without touching the store if a table is unknown to the schema.
    pub fn apply_remote_changes(&self, changes: &Changes) -> SyncResult<()> {
        let mut state = self.state.write();
        if let Some(table) = changes.tables().find(|t| !state.schema.has_table(t)) {
            warn!(table, "pulled changes for a table missing from the local schema");
            return Err(SyncError::Store(MISSING_MIGRATION_DIAGNOSTIC.into()));
        }

        for (table, set) in changes.iter() {
            let table_state = state.tables.entry(table.to_string()).or_default();
            for record in set.created.iter().chain(&set.updated) {
                if table_state.deleted.contains(&record.id) {
                    continue;
                }
                let keep_local = table_state.rows.get(&record.id).is_some_and(|row| {
                    row.status != RowStatus::Synced && row.record.updated_at >= record.updated_at
                });
                if keep_local {
                    debug!(table, id = %record.id, "local change is newer, keeping it");
                    continue;
                }
                table_state.rows.insert(
                    record.id.clone(),
                    Row {
                        record: record.clone(),
                        status: RowStatus::Synced,
                    },
                );
            }
            for id in &set.deleted {
                table_state.rows.remove(id);
                table_state.deleted.remove(id);
            }
        }
        Ok(())
    }

    /// Marks pushed changes as synced.
    ///
    /// Rows modified again since the push was collected stay outstanding.
    pub fn mark_synced(&self, pushed: &Changes) {
        let mut state = self.state.write();
        for (table, set) in pushed.iter() {
            let Some(table_state) = state.tables.get_mut(table) else {
                continue;
            };
            for record in set.created.iter().chain(&set.updated) {
                if let Some(row) = table_state.rows.get_mut(&record.id) {
                    if row.record == *record {
                        row.status = RowStatus::Synced;
                    }
                }
            }
            for id in &set.deleted {
                table_state.deleted.remove(id);
            }
        }
    }
}

fn table_mut<'a>(state: &'a mut StoreState, table: &str) -> SyncResult<&'a mut TableState> {
    if !state.schema.has_table(table) {
        return Err(SyncError::Store(format!("unknown table {table}")));
    }
    Ok(state.tables.entry(table.to_string()).or_default())
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn synchronize(&self, handler: &dyn SyncHandler) -> SyncResult<()> {
        let args = {
            let state = self.state.read();
            PullArgs {
                last_pulled_at: state.last_pulled_at,
                schema_version: state.schema.version,
                migration: state.migration.clone(),
            }
        };

        let pulled = handler.pull_changes(args).await?;
        self.apply_remote_changes(&pulled.changes)?;
        self.state.write().last_pulled_at = Some(pulled.timestamp);
        info!(timestamp = pulled.timestamp, "applied remote changes");

        let outstanding = self.outstanding_changes();
        if outstanding.is_empty() {
            return Ok(());
        }
        handler
            .push_changes(PushArgs::new(outstanding.clone(), Some(pulled.timestamp)))
            .await?;
        self.mark_synced(&outstanding);
        Ok(())
    }
}
