//! Status command implementation.

use serde::Serialize;
use std::path::Path;
use tablesync_engine::MemoryStore;
use tablesync_protocol::{SyncStats, Timestamp};

/// Snapshot status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    /// Snapshot path.
    pub path: String,
    /// Local schema version.
    pub schema_version: u32,
    /// Watermark of the last applied pull.
    pub last_pulled_at: Option<Timestamp>,
    /// Outstanding changes per table, in schema order.
    pub outstanding: Vec<(String, SyncStats)>,
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No snapshot found at {:?}", path).into());
    }
    let store = MemoryStore::load(path)?;
    let schema = store.schema();
    let changes = store.outstanding_changes();

    let result = StatusResult {
        path: path.display().to_string(),
        schema_version: schema.version,
        last_pulled_at: store.last_pulled_at(),
        outstanding: schema
            .tables
            .iter()
            .map(|t| (t.clone(), changes.stats_for(t)))
            .collect(),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Snapshot: {}", result.path);
            println!("Schema version: {}", result.schema_version);
            match result.last_pulled_at {
                Some(at) => println!("Last pulled at: {at}"),
                None => println!("Last pulled at: never"),
            }
            println!("Outstanding changes:");
            for (table, stats) in &result.outstanding {
                println!(
                    "  {table}: {} created, {} updated, {} deleted",
                    stats.created, stats.updated, stats.deleted
                );
            }
        }
    }

    Ok(())
}
