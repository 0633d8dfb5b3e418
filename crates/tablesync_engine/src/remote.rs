//! Remote API abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tablesync_protocol::{unix_seconds, Filter, Record, RecordKey};
use tracing::debug;

/// A window into a remote table listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Number of rows to skip.
    pub offset: usize,
    /// Maximum number of rows to return.
    pub limit: usize,
}

impl Page {
    /// Creates a page.
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

/// A remote CRUD API addressed by table name.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-memory for testing, etc.).
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Lists records of a table.
    async fn get_list(
        &self,
        table: &str,
        filter: Option<&Filter>,
        page: Page,
    ) -> SyncResult<Vec<Record>>;

    /// Creates records.
    async fn create_list(&self, table: &str, records: &[Record]) -> SyncResult<()>;

    /// Updates records.
    async fn update_list(&self, table: &str, records: &[Record]) -> SyncResult<()>;

    /// Deletes records by identifier.
    async fn delete_list(&self, table: &str, keys: &[RecordKey]) -> SyncResult<()>;
}

/// Fetches every record of a table page by page.
///
/// Pages are requested until one comes back shorter than `limit`, so a table
/// of `M` rows costs `M / limit + 1` requests.
pub async fn fetch_in_chunks(
    client: &dyn RemoteClient,
    table: &str,
    limit: usize,
) -> SyncResult<Vec<Record>> {
    if limit == 0 {
        return Err(SyncError::InvalidConfig(
            "page limit must be greater than 0".into(),
        ));
    }

    let mut items = Vec::new();
    let mut offset = 0;
    loop {
        let page = client.get_list(table, None, Page::new(offset, limit)).await?;
        let received = page.len();
        items.extend(page);
        offset += limit;
        if received != limit {
            break;
        }
    }

    debug!(table, count = items.len(), "fetched remote table");
    Ok(items)
}

/// Remote operations, as recorded by [`MemoryRemote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    /// `get_list`.
    GetList,
    /// `create_list`.
    CreateList,
    /// `update_list`.
    UpdateList,
    /// `delete_list`.
    DeleteList,
}

impl RemoteOp {
    /// Returns the API name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            RemoteOp::GetList => "getList",
            RemoteOp::CreateList => "createList",
            RemoteOp::UpdateList => "updateList",
            RemoteOp::DeleteList => "deleteList",
        }
    }
}

/// A completed call against a [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// Operation.
    pub op: RemoteOp,
    /// Table name.
    pub table: String,
    /// Number of records sent, or returned for listings.
    pub size: usize,
    /// Sequence number taken when the call was issued.
    pub issued: u64,
    /// Sequence number taken when the call resolved.
    pub completed: u64,
}

/// A foreign key enforced by [`MemoryRemote`] on create.
#[derive(Debug, Clone)]
struct ForeignKey {
    table: String,
    column: String,
    referenced: String,
}

/// An in-memory remote API for testing and local tooling.
///
/// Keeps one ordered map per table, records every call with issue and
/// completion sequence numbers, and can inject failures, latency and
/// foreign-key checks.
#[derive(Default)]
pub struct MemoryRemote {
    tables: RwLock<BTreeMap<String, BTreeMap<String, Record>>>,
    foreign_keys: RwLock<Vec<ForeignKey>>,
    failures: RwLock<HashSet<(String, RemoteOp)>>,
    calls: Mutex<Vec<RemoteCall>>,
    sequence: AtomicU64,
    latency: RwLock<Option<Duration>>,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts records into a table, replacing rows with the same id.
    pub fn seed(&self, table: &str, records: impl IntoIterator<Item = Record>) {
        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_string()).or_default();
        for record in records {
            rows.insert(record.id.clone(), record);
        }
    }

    /// Returns all rows of a table in id order.
    pub fn records(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns a single row.
    pub fn record(&self, table: &str, id: &str) -> Option<Record> {
        self.tables.read().get(table)?.get(id).cloned()
    }

    /// Rejects creates in `table` whose `column` does not name an existing
    /// row of `referenced`.
    pub fn with_foreign_key(self, table: &str, column: &str, referenced: &str) -> Self {
        self.foreign_keys.write().push(ForeignKey {
            table: table.into(),
            column: column.into(),
            referenced: referenced.into(),
        });
        self
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Makes every future `op` on `table` fail.
    pub fn fail_on(&self, table: &str, op: RemoteOp) {
        self.failures.write().insert((table.to_string(), op));
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    /// Returns the recorded calls in issue order.
    pub fn call_log(&self) -> Vec<RemoteCall> {
        let mut calls = self.calls.lock().clone();
        calls.sort_by_key(|call| call.issued);
        calls
    }

    /// Returns the recorded calls of one operation.
    pub fn calls_of(&self, op: RemoteOp) -> Vec<RemoteCall> {
        self.call_log()
            .into_iter()
            .filter(|call| call.op == op)
            .collect()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Loads a remote from a directory holding one `<table>.json` array per
    /// table.
    pub fn load_dir(path: &Path) -> SyncResult<Self> {
        let remote = Self::new();
        for entry in std::fs::read_dir(path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(table) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let records: Vec<Record> = serde_json::from_slice(&std::fs::read(&path)?)?;
            remote.seed(table, records);
        }
        Ok(remote)
    }

    /// Writes every table to `<table>.json` under `path`.
    pub fn save_dir(&self, path: &Path) -> SyncResult<()> {
        std::fs::create_dir_all(path)?;
        for (table, rows) in self.tables.read().iter() {
            let records: Vec<&Record> = rows.values().collect();
            let json = serde_json::to_vec_pretty(&records)?;
            std::fs::write(path.join(format!("{table}.json")), json)?;
        }
        Ok(())
    }

    async fn begin(&self, table: &str, op: RemoteOp) -> SyncResult<u64> {
        let issued = self.sequence.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failures.read().contains(&(table.to_string(), op)) {
            self.finish(table, op, 0, issued);
            return Err(SyncError::remote(table, op.name(), "injected failure"));
        }
        Ok(issued)
    }

    fn finish(&self, table: &str, op: RemoteOp, size: usize, issued: u64) {
        let completed = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(RemoteCall {
            op,
            table: table.to_string(),
            size,
            issued,
            completed,
        });
    }

    fn check_foreign_keys(&self, table: &str, records: &[Record]) -> SyncResult<()> {
        let foreign_keys = self.foreign_keys.read();
        let tables = self.tables.read();
        for fk in foreign_keys.iter().filter(|fk| fk.table == table) {
            for record in records {
                let Some(target) = record.fields.get(&fk.column).and_then(|v| v.as_str()) else {
                    continue;
                };
                let local = fk.referenced == table && records.iter().any(|r| r.id == target);
                let stored = tables
                    .get(&fk.referenced)
                    .is_some_and(|rows| rows.contains_key(target));
                if !local && !stored {
                    return Err(SyncError::remote(
                        table,
                        RemoteOp::CreateList.name(),
                        format!(
                            "foreign key {}.{} references missing {} {}",
                            table, fk.column, fk.referenced, target
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn get_list(
        &self,
        table: &str,
        filter: Option<&Filter>,
        page: Page,
    ) -> SyncResult<Vec<Record>> {
        let issued = self.begin(table, RemoteOp::GetList).await?;
        let records: Vec<Record> = self
            .tables
            .read()
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|r| filter.map_or(true, |f| r.matches(f)))
                    .skip(page.offset)
                    .take(page.limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        self.finish(table, RemoteOp::GetList, records.len(), issued);
        Ok(records)
    }

    async fn create_list(&self, table: &str, records: &[Record]) -> SyncResult<()> {
        let issued = self.begin(table, RemoteOp::CreateList).await?;
        if let Err(e) = self.check_foreign_keys(table, records) {
            self.finish(table, RemoteOp::CreateList, records.len(), issued);
            return Err(e);
        }
        self.seed(table, stamped(records));
        self.finish(table, RemoteOp::CreateList, records.len(), issued);
        Ok(())
    }

    async fn update_list(&self, table: &str, records: &[Record]) -> SyncResult<()> {
        let issued = self.begin(table, RemoteOp::UpdateList).await?;
        self.seed(table, stamped(records));
        self.finish(table, RemoteOp::UpdateList, records.len(), issued);
        Ok(())
    }

    async fn delete_list(&self, table: &str, keys: &[RecordKey]) -> SyncResult<()> {
        let issued = self.begin(table, RemoteOp::DeleteList).await?;
        let now = unix_seconds();
        {
            let mut tables = self.tables.write();
            let rows = tables.entry(table.to_string()).or_default();
            for key in keys {
                // Deletes leave a tombstone so other clients can pull them.
                if let Some(row) = rows.get_mut(&key.id) {
                    row.deleted_at = Some(now);
                    row.updated_at = Some(now);
                }
            }
        }
        self.finish(table, RemoteOp::DeleteList, keys.len(), issued);
        Ok(())
    }
}

/// Copies records with `updatedAt` set to the server clock.
fn stamped(records: &[Record]) -> impl Iterator<Item = Record> + '_ {
    let now = unix_seconds();
    records.iter().cloned().map(move |mut record| {
        record.created_at.get_or_insert(now);
        record.updated_at = Some(now);
        record
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::new(format!("r{i:04}"), 10)).collect()
    }

    #[tokio::test]
    async fn chunked_fetch_stops_on_short_page() {
        let remote = MemoryRemote::new();
        remote.seed("items", rows(25));

        let items = fetch_in_chunks(&remote, "items", 10).await.unwrap();
        assert_eq!(items.len(), 25);
        assert_eq!(remote.calls_of(RemoteOp::GetList).len(), 3);
    }

    #[tokio::test]
    async fn chunked_fetch_needs_extra_page_on_exact_multiple() {
        let remote = MemoryRemote::new();
        remote.seed("items", rows(20));

        let items = fetch_in_chunks(&remote, "items", 10).await.unwrap();
        assert_eq!(items.len(), 20);
        assert_eq!(remote.calls_of(RemoteOp::GetList).len(), 3);
    }

    #[tokio::test]
    async fn chunked_fetch_of_empty_table() {
        let remote = MemoryRemote::new();
        let items = fetch_in_chunks(&remote, "empty", 10).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(remote.call_log().len(), 1);
    }

    #[tokio::test]
    async fn chunked_fetch_rejects_zero_limit() {
        let remote = MemoryRemote::new();
        let err = fetch_in_chunks(&remote, "items", 0).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn injected_failure() {
        let remote = MemoryRemote::new();
        remote.fail_on("items", RemoteOp::CreateList);

        let err = remote
            .create_list("items", &rows(1))
            .await
            .unwrap_err();
        assert!(err.is_remote());
        assert!(remote.records("items").is_empty());
    }

    #[tokio::test]
    async fn delete_leaves_tombstone() {
        let remote = MemoryRemote::new();
        remote.seed("items", rows(2));

        remote
            .delete_list("items", &[RecordKey::from("r0000".to_string())])
            .await
            .unwrap();

        assert!(remote.record("items", "r0000").unwrap().is_deleted());
        assert!(!remote.record("items", "r0001").unwrap().is_deleted());
    }

    #[tokio::test]
    async fn writes_carry_server_time() {
        let remote = MemoryRemote::new();
        let before = unix_seconds();

        remote
            .create_list("items", &[Record::new("a", 5).with_field("n", 1)])
            .await
            .unwrap();
        let created = remote.record("items", "a").unwrap();
        assert_eq!(created.created_at, Some(5));
        assert!(created.updated_at.unwrap() >= before);
        assert_eq!(created.fields["n"], serde_json::json!(1));

        remote
            .update_list("items", &[Record::new("a", 5).with_updated_at(6)])
            .await
            .unwrap();
        assert!(remote.record("items", "a").unwrap().updated_at.unwrap() >= before);
    }

    #[tokio::test]
    async fn foreign_key_rejects_dangling_reference() {
        let remote = MemoryRemote::new().with_foreign_key("orders", "customerId", "customers");

        let order = Record::new("o1", 10).with_field("customerId", "c1");
        let err = remote.create_list("orders", &[order.clone()]).await.unwrap_err();
        assert!(err.is_remote());

        remote
            .create_list("customers", &[Record::new("c1", 10)])
            .await
            .unwrap();
        remote.create_list("orders", &[order]).await.unwrap();
        assert_eq!(remote.records("orders").len(), 1);
    }

    #[test]
    fn json_dir_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemote::new();
        remote.seed("items", rows(3));
        remote.save_dir(dir.path()).unwrap();

        let loaded = MemoryRemote::load_dir(dir.path()).unwrap();
        assert_eq!(loaded.records("items"), remote.records("items"));
    }
}
