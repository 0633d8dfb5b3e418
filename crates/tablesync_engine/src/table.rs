//! Per-table pull and push.

use crate::config::DEFAULT_PAGE_LIMIT;
use crate::error::SyncResult;
use crate::remote::{fetch_in_chunks, RemoteClient};
use std::fmt;
use std::sync::Arc;
use tablesync_protocol::{
    normalize_watermark, unix_seconds, ChangeSet, Changes, PullArgs, PullResult, PushArgs, Record,
    RecordKey, SyncStats,
};
use tracing::{debug, warn};

/// Callback receiving per-table change counts after a pull or before a push.
pub type OnSync = dyn Fn(&str, SyncStats) + Send + Sync;

/// Normalizes a record on its way in from or out to the remote API.
pub type RecordParser = Arc<dyn Fn(Record) -> Record + Send + Sync>;

/// Pull and push logic for one entity table.
#[derive(Clone)]
pub struct TableSync {
    name: String,
    references: Vec<String>,
    page_limit: usize,
    parser: Option<RecordParser>,
}

impl TableSync {
    /// Creates a synchronizer for the named table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            references: Vec::new(),
            page_limit: DEFAULT_PAGE_LIMIT,
            parser: None,
        }
    }

    /// Declares a table this one holds a foreign key into.
    pub fn references(mut self, table: impl Into<String>) -> Self {
        self.references.push(table.into());
        self
    }

    /// Sets the page size used to enumerate the remote table.
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit;
        self
    }

    /// Sets the record parser.
    ///
    /// It sees every fetched record and every outgoing create and update.
    /// Deletes go through it as id-only records and send the resulting id.
    pub fn with_parser(mut self, parser: impl Fn(Record) -> Record + Send + Sync + 'static) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tables this one references.
    pub fn referenced_tables(&self) -> &[String] {
        &self.references
    }

    /// Returns the page size.
    pub fn page_limit(&self) -> usize {
        self.page_limit
    }

    fn parse(&self, record: Record) -> Record {
        match &self.parser {
            Some(parser) => parser(record),
            None => record,
        }
    }

    /// Pulls the whole remote table and classifies it against the watermark.
    ///
    /// `on_sync` is invoked once with the resulting counts before returning.
    pub async fn pull_changes(
        &self,
        client: &dyn RemoteClient,
        args: &PullArgs,
        on_sync: Option<&OnSync>,
    ) -> SyncResult<PullResult> {
        let items: Vec<Record> = fetch_in_chunks(client, &self.name, self.page_limit)
            .await?
            .into_iter()
            .map(|record| self.parse(record))
            .collect();

        let invalid = items.iter().filter(|r| !r.has_timestamps()).count();
        if invalid > 0 {
            warn!(
                table = %self.name,
                invalid,
                "columns createdAt and updatedAt must not be empty"
            );
        }

        let watermark = normalize_watermark(args.last_pulled_at);
        let set = ChangeSet::from_records(items, watermark);
        let stats = set.stats();
        debug!(table = %self.name, ?watermark, ?stats, "pulled changes");

        if let Some(on_sync) = on_sync {
            on_sync(&self.name, stats);
        }

        Ok(PullResult::new(
            Changes::single(self.name.clone(), set),
            unix_seconds(),
        ))
    }

    /// Pushes this table's outstanding local changes.
    ///
    /// Creates, updates and deletes are sent in that order, each only if
    /// non-empty. The first failure aborts the remaining calls.
    pub async fn push_changes(
        &self,
        client: &dyn RemoteClient,
        args: &PushArgs,
        on_sync: Option<&OnSync>,
    ) -> SyncResult<()> {
        let empty = ChangeSet::new();
        let set = args.changes.get(&self.name).unwrap_or(&empty);

        let stats = set.stats();
        if let Some(on_sync) = on_sync {
            on_sync(&self.name, stats);
        }

        let creates: Vec<Record> = set.created.iter().cloned().map(|r| self.parse(r)).collect();
        let updates: Vec<Record> = set.updated.iter().cloned().map(|r| self.parse(r)).collect();
        let deletes: Vec<RecordKey> = set
            .deleted
            .iter()
            .map(|id| self.parse(Record::bare(id.clone())).key())
            .collect();

        if !creates.is_empty() {
            client.create_list(&self.name, &creates).await?;
        }
        if !updates.is_empty() {
            client.update_list(&self.name, &updates).await?;
        }
        if !deletes.is_empty() {
            client.delete_list(&self.name, &deletes).await?;
        }

        debug!(table = %self.name, ?stats, "pushed changes");
        Ok(())
    }
}

impl fmt::Debug for TableSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSync")
            .field("name", &self.name)
            .field("references", &self.references)
            .field("page_limit", &self.page_limit)
            .field("parser", &self.parser.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, RemoteOp};
    use crate::test_log::CapturedLog;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<(String, SyncStats)>>>, Box<OnSync>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_sync: Box<OnSync> = Box::new(move |table: &str, stats: SyncStats| {
            sink.lock().push((table.to_string(), stats));
        });
        (seen, on_sync)
    }

    #[tokio::test]
    async fn pull_reports_stats_once() {
        let remote = MemoryRemote::new();
        remote.seed(
            "orders",
            [
                Record::new("o1", 200).with_updated_at(100),
                Record::new("o2", 210).with_updated_at(100),
                Record::new("o3", 50).with_deleted_at(220),
                Record::new("o4", 50),
            ],
        );
        let (seen, on_sync) = recorder();

        let result = TableSync::new("orders")
            .pull_changes(&remote, &PullArgs::new(Some(150), 1), Some(&*on_sync))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock(),
            vec![("orders".to_string(), SyncStats::new(2, 0, 1))]
        );
        assert_eq!(result.changes.stats_for("orders"), SyncStats::new(2, 0, 1));
        assert!(result.timestamp > 0);
    }

    #[tokio::test]
    async fn pull_keeps_rows_missing_timestamps() {
        let remote = MemoryRemote::new();
        let mut bad = Record::new("bad", 0);
        bad.created_at = None;
        bad.updated_at = None;
        remote.seed("notes", [bad, Record::new("good", 20)]);

        let log = CapturedLog::default();
        let result = {
            let _guard = log.install();
            TableSync::new("notes")
                .pull_changes(&remote, &PullArgs::new(Some(10), 1), None)
                .await
                .unwrap()
        };
        assert_eq!(result.changes.stats_for("notes"), SyncStats::new(1, 1, 0));

        let output = log.contents();
        assert_eq!(output.matches("WARN").count(), 1);
        assert!(output.contains("columns createdAt and updatedAt must not be empty"));
        assert!(output.contains("invalid=1"));
    }

    #[tokio::test]
    async fn pull_applies_parser() {
        let remote = MemoryRemote::new();
        remote.seed("notes", [Record::new("n1", 10)]);

        let result = TableSync::new("notes")
            .with_parser(|r| r.with_field("parsed", true))
            .pull_changes(&remote, &PullArgs::default(), None)
            .await
            .unwrap();
        let created = &result.changes.get("notes").unwrap().created;
        assert_eq!(created[0].fields.get("parsed"), Some(&serde_json::Value::Bool(true)));
    }

    #[tokio::test]
    async fn push_sends_batches_in_fixed_order() {
        let remote = MemoryRemote::new();
        remote.seed("orders", [Record::new("old", 1)]);
        let set = ChangeSet {
            created: vec![Record::new("new", 5)],
            updated: vec![Record::new("old", 1).with_updated_at(6)],
            deleted: vec!["old".into()],
        };
        let args = PushArgs::new(Changes::single("orders", set), Some(3));
        let (seen, on_sync) = recorder();

        TableSync::new("orders")
            .push_changes(&remote, &args, Some(&*on_sync))
            .await
            .unwrap();

        let ops: Vec<RemoteOp> = remote.call_log().iter().map(|c| c.op).collect();
        assert_eq!(
            ops,
            vec![RemoteOp::CreateList, RemoteOp::UpdateList, RemoteOp::DeleteList]
        );
        assert_eq!(seen.lock()[0].1, SyncStats::new(1, 1, 1));
    }

    #[tokio::test]
    async fn push_parses_delete_keys() {
        let remote = MemoryRemote::new();
        remote.seed("orders", [Record::new("remote-7", 1), Record::new("7", 1)]);
        let set = ChangeSet {
            deleted: vec!["7".into()],
            ..ChangeSet::new()
        };
        let args = PushArgs::new(Changes::single("orders", set), None);

        TableSync::new("orders")
            .with_parser(|mut r| {
                r.id = format!("remote-{}", r.id);
                r
            })
            .push_changes(&remote, &args, None)
            .await
            .unwrap();

        assert!(remote.record("orders", "remote-7").unwrap().is_deleted());
        assert!(!remote.record("orders", "7").unwrap().is_deleted());
    }

    #[tokio::test]
    async fn push_of_absent_table_is_a_no_op() {
        let remote = MemoryRemote::new();
        let (seen, on_sync) = recorder();

        TableSync::new("orders")
            .push_changes(&remote, &PushArgs::default(), Some(&*on_sync))
            .await
            .unwrap();

        assert!(remote.call_log().is_empty());
        assert_eq!(seen.lock()[0].1, SyncStats::default());
    }

    #[tokio::test]
    async fn push_failure_aborts_remaining_calls() {
        let remote = MemoryRemote::new();
        remote.fail_on("orders", RemoteOp::CreateList);
        let set = ChangeSet {
            created: vec![Record::new("new", 5)],
            updated: vec![Record::new("other", 5)],
            deleted: vec!["gone".into()],
        };
        let args = PushArgs::new(Changes::single("orders", set), None);
        let (seen, on_sync) = recorder();

        let err = TableSync::new("orders")
            .push_changes(&remote, &args, Some(&*on_sync))
            .await
            .unwrap_err();

        assert!(err.is_remote());
        assert_eq!(remote.call_log().len(), 1);
        // Stats are reported before the failing call.
        assert_eq!(seen.lock().len(), 1);
    }
}
