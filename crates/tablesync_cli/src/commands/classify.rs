//! Classify command implementation.

use serde::Serialize;
use std::path::Path;
use tablesync_protocol::{classify, normalize_watermark, ChangeKind, Record, Timestamp};

/// Classification of a record dump.
#[derive(Debug, Default, Serialize)]
pub struct ClassifyResult {
    /// Effective watermark.
    pub watermark: Option<Timestamp>,
    /// Ids classified as created.
    pub created: Vec<String>,
    /// Ids classified as updated.
    pub updated: Vec<String>,
    /// Ids classified as deleted.
    pub deleted: Vec<String>,
    /// Ids with no change since the watermark.
    pub ignored: Vec<String>,
    /// Ids missing `createdAt` or `updatedAt`.
    pub invalid: Vec<String>,
}

/// Runs the classify command.
pub fn run(
    input: &Path,
    watermark: Option<Timestamp>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records: Vec<Record> = serde_json::from_slice(&std::fs::read(input)?)
        .map_err(|e| format!("{} is not a JSON array of records: {e}", input.display()))?;

    let result = classify_records(&records, watermark);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn classify_records(records: &[Record], watermark: Option<Timestamp>) -> ClassifyResult {
    let watermark = normalize_watermark(watermark);
    let mut result = ClassifyResult {
        watermark,
        ..ClassifyResult::default()
    };

    for record in records {
        if !record.has_timestamps() {
            result.invalid.push(record.id.clone());
        }
        let bucket = match classify(record, watermark) {
            ChangeKind::Created => &mut result.created,
            ChangeKind::Updated => &mut result.updated,
            ChangeKind::Deleted => &mut result.deleted,
            ChangeKind::Ignored => &mut result.ignored,
        };
        bucket.push(record.id.clone());
    }
    result
}

fn print_text_output(result: &ClassifyResult) {
    match result.watermark {
        Some(w) => println!("Watermark: {w}"),
        None => println!("Watermark: none (full sync)"),
    }
    for (label, ids) in [
        ("Created", &result.created),
        ("Updated", &result.updated),
        ("Deleted", &result.deleted),
        ("Ignored", &result.ignored),
    ] {
        println!("{label}: {}", ids.len());
        for id in ids {
            println!("  {id}");
        }
    }
    if !result.invalid.is_empty() {
        println!(
            "Warning: {} record(s) missing createdAt or updatedAt",
            result.invalid.len()
        );
    }
}
