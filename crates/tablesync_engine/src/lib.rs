//! # Tablesync Engine
//!
//! Bidirectional sync between a local record store and a remote CRUD API.
//!
//! This crate provides:
//! - Per-table pull and push against a remote list/create/update/delete API
//! - Multi-table cycles with foreign-key aware push order
//! - A single-flight trigger controller with periodic and condition activation
//! - In-memory remote and local store implementations
//!
//! ## Architecture
//!
//! Sync follows a **pull-then-push** model:
//! 1. Enumerate each remote table and classify rows against the watermark
//! 2. Apply the classified changes locally and advance the watermark
//! 3. Push outstanding local changes, table by table
//!
//! ## Key Invariants
//!
//! - At most one cycle runs per session
//! - Pull always happens before push
//! - Referenced tables are pushed before the tables referencing them
//! - Re-pulling with the returned watermark yields no changes

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod activation;
mod config;
mod error;
mod event;
mod orchestrator;
mod remote;
mod session;
mod store;
mod table;
#[cfg(test)]
mod test_log;

pub use activation::{spawn_condition_sync, AutoSync, ConditionSync, IntervalSync};
pub use config::{SyncConfig, DEFAULT_PAGE_LIMIT, DEFAULT_SYNC_INTERVAL_SECONDS};
pub use error::{SyncError, SyncResult, MISSING_MIGRATION_DIAGNOSTIC};
pub use event::{Direction, SyncEvent};
pub use orchestrator::Synchronizer;
pub use remote::{fetch_in_chunks, MemoryRemote, Page, RemoteCall, RemoteClient, RemoteOp};
pub use session::{
    ErrorHook, NotifyHook, StatsHook, SyncContext, SyncHooks, SyncSession, SyncTask, TriggerState,
};
pub use store::{
    ListQuery, LocalStore, MemoryStore, RowStatus, StoreSchema, SyncHandler,
    LARGE_RESULT_THRESHOLD,
};
pub use table::{OnSync, RecordParser, TableSync};
