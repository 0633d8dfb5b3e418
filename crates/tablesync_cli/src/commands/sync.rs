//! Sync command implementation.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tablesync_engine::{
    AutoSync, MemoryRemote, MemoryStore, StoreSchema, SyncConfig, SyncEvent, SyncHooks,
    SyncResult, SyncSession, Synchronizer, TableSync,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// Options for the sync command.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Remote directory.
    pub remote: PathBuf,
    /// Local snapshot file.
    pub local: PathBuf,
    /// Table specs in push order.
    pub tables: Vec<String>,
    /// Optional JSON configuration file.
    pub config: Option<PathBuf>,
    /// Local schema version.
    pub schema_version: u32,
    /// Run a single cycle.
    pub once: bool,
}

/// Runs the sync command.
pub fn run(options: &SyncOptions) -> Result<(), Box<dyn Error>> {
    let config = match &options.config {
        Some(path) => serde_json::from_slice::<SyncConfig>(&std::fs::read(path)?)?,
        None => SyncConfig::default(),
    };
    config.validate()?;

    let tables: Vec<TableSync> = options
        .tables
        .iter()
        .map(|spec| parse_table(spec, config.page_limit))
        .collect::<Result<_, _>>()?;

    let remote = Arc::new(if options.remote.exists() {
        MemoryRemote::load_dir(&options.remote)?
    } else {
        MemoryRemote::new()
    });
    let schema = StoreSchema::new(
        options.schema_version,
        tables.iter().map(|t| t.name().to_string()),
    );
    let store = Arc::new(MemoryStore::open_or_create(&options.local, schema)?);

    let sync = Synchronizer::new(remote.clone(), store.clone(), tables)?;
    let hooks = SyncHooks::new().with_on_error(|e| error!(error = %e, "sync needs attention"));
    let session = SyncSession::new(config, hooks, Some(Arc::new(sync)))?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(drive(session, &remote, &store, options))
}

async fn drive(
    session: SyncSession,
    remote: &MemoryRemote,
    store: &MemoryStore,
    options: &SyncOptions,
) -> Result<(), Box<dyn Error>> {
    let mut events = session.subscribe();

    if options.once {
        let ok = session.trigger().await;
        persist(remote, store, options)?;
        if !ok {
            return Err("sync failed".into());
        }
        println!("Synchronized");
        return Ok(());
    }

    let auto = AutoSync::new(session.clone());
    if !auto.is_running() {
        warn!("auto sync is off; running the initial cycle only");
    }
    session.trigger().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("stopping sync");
                break;
            }
            event = events.recv() => match event {
                Ok(SyncEvent::Failed { error, .. }) => {
                    warn!(%error, "cycle failed");
                    persist(remote, store, options)?;
                }
                Ok(event) if event.is_terminal() => persist(remote, store, options)?,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "missed sync events"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    drop(auto);
    persist(remote, store, options)?;
    Ok(())
}

fn persist(remote: &MemoryRemote, store: &MemoryStore, options: &SyncOptions) -> SyncResult<()> {
    remote.save_dir(&options.remote)?;
    store.save(&options.local)
}

/// Parses `name` or `name:referenced,...`.
fn parse_table(spec: &str, page_limit: usize) -> Result<TableSync, String> {
    let (name, references) = match spec.split_once(':') {
        Some((name, refs)) => (name, refs),
        None => (spec, ""),
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid table spec {spec:?}"));
    }

    let table = references
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .fold(TableSync::new(name), |table, referenced| table.references(referenced));
    Ok(table.with_page_limit(page_limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablesync_protocol::Record;

    #[test]
    fn parses_table_specs() {
        let table = parse_table("orders:customers, products", 50).unwrap();
        assert_eq!(table.name(), "orders");
        assert_eq!(table.referenced_tables(), ["customers", "products"]);
        assert_eq!(table.page_limit(), 50);

        assert!(parse_table("notes", 10).unwrap().referenced_tables().is_empty());
        assert!(parse_table(":customers", 10).is_err());
    }

    #[test]
    fn single_cycle_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let remote_dir = dir.path().join("remote");
        let seeded = MemoryRemote::new();
        seeded.seed("notes", [Record::new("n1", 100).with_field("title", "hello")]);
        seeded.save_dir(&remote_dir).unwrap();

        let options = SyncOptions {
            remote: remote_dir,
            local: dir.path().join("local.json"),
            tables: vec!["notes".into()],
            config: None,
            schema_version: 1,
            once: true,
        };
        run(&options).unwrap();

        let store = MemoryStore::load(&options.local).unwrap();
        assert!(store.get("notes", "n1").is_some());
        assert!(store.last_pulled_at().is_some());
    }
}
