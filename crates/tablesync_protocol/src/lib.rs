//! # TableSync Protocol
//!
//! Record model and change classification for TableSync.
//!
//! This crate provides:
//! - `Record` for rows exchanged with the remote API
//! - `classify` for watermark-based change detection
//! - `ChangeSet` / `Changes` for per-table created/updated/deleted partitions
//! - Pull and push arguments passed between the local store and the engine
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_set;
mod classify;
mod messages;
mod record;

pub use change_set::{ChangeSet, Changes, SyncStats};
pub use classify::{classify, normalize_watermark, ChangeKind};
pub use messages::{PullArgs, PullResult, PushArgs};
pub use record::{unix_seconds, Filter, Record, RecordKey, Timestamp};
