//! Property tests for change classification.

use proptest::prelude::*;
use tablesync_protocol::{classify, ChangeKind, ChangeSet, Record, Timestamp};

/// Strategy for timestamps around a small range so collisions with the
/// watermark are common.
fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    0i64..400
}

/// Strategy for well-formed records, optionally tombstoned.
fn record_strategy() -> impl Strategy<Value = Record> {
    (
        "[a-z0-9]{1,12}",
        timestamp_strategy(),
        timestamp_strategy(),
        prop::option::of(timestamp_strategy()),
    )
        .prop_map(|(id, created, edit, deleted)| {
            let mut record = Record::new(id, created).with_updated_at(created.max(edit));
            record.deleted_at = deleted;
            record
        })
}

proptest! {
    #[test]
    fn deleted_iff_tombstone_after_watermark(
        record in record_strategy(),
        watermark in 1i64..400,
    ) {
        let kind = classify(&record, Some(watermark));
        let expected = record.deleted_at.is_some_and(|at| at > watermark);
        prop_assert_eq!(kind == ChangeKind::Deleted, expected);
    }

    #[test]
    fn tombstones_never_create_or_update(
        record in record_strategy(),
        watermark in prop::option::of(timestamp_strategy()),
    ) {
        let kind = classify(&record, watermark);
        if record.is_deleted() {
            prop_assert!(matches!(kind, ChangeKind::Deleted | ChangeKind::Ignored));
        }
    }

    #[test]
    fn records_at_or_before_watermark_are_ignored(
        record in record_strategy(),
        offset in 0i64..50,
    ) {
        let newest = [record.created_at, record.updated_at, record.deleted_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(0);
        let watermark = newest.max(1) + offset;
        prop_assert_eq!(classify(&record, Some(watermark)), ChangeKind::Ignored);
    }

    #[test]
    fn partition_preserves_every_relevant_record(
        records in prop::collection::vec(record_strategy(), 0..64),
        watermark in prop::option::of(timestamp_strategy()),
    ) {
        let relevant = records
            .iter()
            .filter(|r| classify(r, watermark) != ChangeKind::Ignored)
            .count();
        let set = ChangeSet::from_records(records, watermark);
        prop_assert_eq!(set.stats().total(), relevant);
    }
}
