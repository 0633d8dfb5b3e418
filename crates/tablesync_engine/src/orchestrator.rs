//! Multi-table sync cycle.

use crate::error::{SyncError, SyncResult};
use crate::event::{Direction, SyncEvent};
use crate::remote::RemoteClient;
use crate::session::{SyncContext, SyncTask};
use crate::store::{LocalStore, SyncHandler};
use crate::table::TableSync;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tablesync_protocol::{unix_seconds, Changes, PullArgs, PullResult, PushArgs};
use tracing::{info, warn};

/// Runs one sync cycle across a list of tables.
///
/// Tables are pulled concurrently and pushed one after another in list
/// order, so a referenced table must be listed before the tables that
/// reference it.
pub struct Synchronizer {
    client: Arc<dyn RemoteClient>,
    store: Arc<dyn LocalStore>,
    tables: Vec<TableSync>,
}

impl Synchronizer {
    /// Creates a synchronizer, checking table order.
    pub fn new(
        client: Arc<dyn RemoteClient>,
        store: Arc<dyn LocalStore>,
        tables: Vec<TableSync>,
    ) -> SyncResult<Self> {
        validate_order(&tables)?;
        Ok(Self {
            client,
            store,
            tables,
        })
    }

    /// Returns the tables in push order.
    pub fn tables(&self) -> &[TableSync] {
        &self.tables
    }

    /// Runs one cycle against the local store.
    pub async fn synchronize(&self, ctx: &SyncContext) -> SyncResult<()> {
        info!(tables = self.tables.len(), "synchronizing");
        let handler = CycleHandler { sync: self, ctx };
        self.store
            .synchronize(&handler)
            .await
            .map_err(|err| handle_failure(err, ctx))
    }
}

#[async_trait]
impl SyncTask for Synchronizer {
    async fn run(&self, ctx: &SyncContext) -> SyncResult<()> {
        self.synchronize(ctx).await
    }
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}

fn validate_order(tables: &[TableSync]) -> SyncResult<()> {
    let mut seen = HashSet::new();
    for table in tables {
        if !seen.insert(table.name()) {
            return Err(SyncError::InvalidConfig(format!(
                "table {} is listed twice",
                table.name()
            )));
        }
    }

    for (index, table) in tables.iter().enumerate() {
        for referenced in table.referenced_tables() {
            if referenced == table.name() {
                continue;
            }
            let position = tables.iter().position(|t| t.name() == referenced);
            if position.is_some_and(|p| p > index) {
                return Err(SyncError::TableOrder {
                    table: table.name().to_string(),
                    referenced: referenced.clone(),
                });
            }
        }
    }
    Ok(())
}

fn handle_failure(err: SyncError, ctx: &SyncContext) -> SyncError {
    if !err.is_migration_diagnostic() {
        warn!(error = %err, "synchronize failed");
        return err;
    }

    warn!("local database changed but did not migrate; reset the local store");
    match &ctx.hooks().on_error {
        Some(on_error) => {
            on_error(&SyncError::MigrationRequired);
            SyncError::MigrationRequired
        }
        None => err,
    }
}

struct CycleHandler<'a> {
    sync: &'a Synchronizer,
    ctx: &'a SyncContext,
}

#[async_trait]
impl SyncHandler for CycleHandler<'_> {
    async fn pull_changes(&self, args: PullArgs) -> SyncResult<PullResult> {
        let client = &*self.sync.client;
        let on_pull = &*self.ctx.hooks().on_pull;

        let results = try_join_all(
            self.sync
                .tables
                .iter()
                .map(|table| table.pull_changes(client, &args, Some(on_pull))),
        )
        .await?;

        let mut merged = PullResult::new(Changes::new(), 0);
        for (table, result) in self.sync.tables.iter().zip(results) {
            self.ctx.emit(SyncEvent::TableSynced {
                table: table.name().to_string(),
                direction: Direction::Pull,
                stats: result.changes.stats_for(table.name()),
            });
            merged.merge(result);
        }
        if self.sync.tables.is_empty() {
            merged.timestamp = unix_seconds();
        }
        Ok(merged)
    }

    async fn push_changes(&self, args: PushArgs) -> SyncResult<()> {
        let client = &*self.sync.client;
        let on_push = &*self.ctx.hooks().on_push;

        for table in &self.sync.tables {
            table.push_changes(client, &args, Some(on_push)).await?;
            self.ctx.emit(SyncEvent::TableSynced {
                table: table.name().to_string(),
                direction: Direction::Push,
                stats: args.changes.stats_for(table.name()),
            });
        }
        Ok(())
    }
}
