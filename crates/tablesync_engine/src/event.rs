//! Sync lifecycle events.

use std::fmt;
use tablesync_protocol::{SyncStats, Timestamp};

/// Phase a per-table event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Remote to local.
    Pull,
    /// Local to remote.
    Push,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Pull => write!(f, "pull"),
            Direction::Push => write!(f, "push"),
        }
    }
}

/// Event emitted by a sync session.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A cycle started.
    Started,
    /// One table finished a phase.
    TableSynced {
        /// Table name.
        table: String,
        /// Pull or push.
        direction: Direction,
        /// Change counts.
        stats: SyncStats,
    },
    /// A cycle completed.
    Succeeded {
        /// Completion time in Unix seconds.
        at: Timestamp,
    },
    /// A cycle failed.
    Failed {
        /// Error message.
        error: String,
        /// Failure time in Unix seconds.
        at: Timestamp,
    },
}

impl SyncEvent {
    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncEvent::Succeeded { .. } | SyncEvent::Failed { .. })
    }
}
