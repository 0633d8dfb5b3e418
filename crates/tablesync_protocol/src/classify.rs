//! Watermark-based change classification.

use crate::record::{Record, Timestamp};

/// How a remote record relates to the last pulled watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Record appeared after the watermark.
    Created,
    /// Record was modified after the watermark.
    Updated,
    /// Record was tombstoned after the watermark.
    Deleted,
    /// Nothing to transfer.
    Ignored,
}

/// Normalizes a persisted watermark.
///
/// A zero watermark means the store was never pulled and is treated the same
/// as no watermark at all.
pub fn normalize_watermark(last_pulled_at: Option<Timestamp>) -> Option<Timestamp> {
    last_pulled_at.filter(|at| *at > 0)
}

/// Classifies a record against the watermark.
///
/// Deletion takes precedence over everything else, then modification, then
/// creation. A live record stamped after the watermark is therefore reported
/// as updated even if it was also created after it. Comparisons are strict,
/// so a record last touched exactly at the watermark is ignored. Without a
/// watermark every live record is created and tombstones are skipped.
pub fn classify(record: &Record, watermark: Option<Timestamp>) -> ChangeKind {
    let Some(watermark) = normalize_watermark(watermark) else {
        return if record.is_deleted() {
            ChangeKind::Ignored
        } else {
            ChangeKind::Created
        };
    };

    match record.tombstone() {
        Some(deleted_at) if deleted_at > watermark => ChangeKind::Deleted,
        Some(_) => ChangeKind::Ignored,
        None => match (record.created_at, record.updated_at) {
            (_, Some(updated_at)) if updated_at > watermark => ChangeKind::Updated,
            (Some(created_at), _) if created_at > watermark => ChangeKind::Created,
            // Unstamped rows are assumed new.
            (None, _) => ChangeKind::Created,
            _ => ChangeKind::Ignored,
        },
    }
}
