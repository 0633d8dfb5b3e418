//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use serde::Deserialize;
use std::time::Duration;

/// Default automatic sync period in seconds.
pub const DEFAULT_SYNC_INTERVAL_SECONDS: i64 = 10;

/// Default page size for remote enumeration.
pub const DEFAULT_PAGE_LIMIT: usize = 1000;

/// Configuration for sync sessions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Automatic sync period in seconds. Zero or negative disables it.
    pub sync_interval_seconds: i64,
    /// Page size used when enumerating remote tables.
    pub page_limit: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with the defaults.
    pub fn new() -> Self {
        Self {
            sync_interval_seconds: DEFAULT_SYNC_INTERVAL_SECONDS,
            page_limit: DEFAULT_PAGE_LIMIT,
            event_capacity: 64,
        }
    }

    /// Sets the automatic sync period in seconds.
    pub fn with_sync_interval_seconds(mut self, seconds: i64) -> Self {
        self.sync_interval_seconds = seconds;
        self
    }

    /// Sets the remote page size.
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit;
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Returns the automatic sync period, if enabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        u64::try_from(self.sync_interval_seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Checks the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.page_limit == 0 {
            return Err(SyncError::InvalidConfig(
                "page_limit must be greater than 0".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "event_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
