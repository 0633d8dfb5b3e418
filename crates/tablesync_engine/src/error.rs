//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Diagnostic raised by the local store when its schema changed without a
/// data migration.
pub const MISSING_MIGRATION_DIAGNOSTIC: &str = "Cannot read properties of null (reading 'find')";

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A remote list/create/update/delete call failed.
    #[error("remote {operation} on table {table} failed: {message}")]
    Remote {
        /// Table the call was made for.
        table: String,
        /// Remote operation name.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// The local store failed to apply or collect changes.
    #[error("{0}")]
    Store(String),

    /// Local schema changed without a data migration.
    #[error("local database changed but was not migrated; reset the local store")]
    MigrationRequired,

    /// Configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A table is listed before a table it references.
    #[error("table {table} references {referenced}, which must be listed before it")]
    TableOrder {
        /// Table holding the foreign key.
        table: String,
        /// Referenced table.
        referenced: String,
    },

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error while loading or saving a snapshot.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Creates a remote call failure.
    pub fn remote(
        table: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Remote {
            table: table.into(),
            operation,
            message: message.into(),
        }
    }

    /// Returns true if this error came from the remote API.
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::Remote { .. })
    }

    /// Returns true if the local store reported the missing-migration
    /// diagnostic.
    pub fn is_migration_diagnostic(&self) -> bool {
        match self {
            SyncError::Store(message) => message == MISSING_MIGRATION_DIAGNOSTIC,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_diagnostic_detection() {
        assert!(SyncError::Store(MISSING_MIGRATION_DIAGNOSTIC.into()).is_migration_diagnostic());
        assert!(!SyncError::Store("disk full".into()).is_migration_diagnostic());
        assert!(!SyncError::MigrationRequired.is_migration_diagnostic());
    }

    #[test]
    fn error_display() {
        let err = SyncError::remote("orders", "createList", "503");
        assert!(err.is_remote());
        assert_eq!(
            err.to_string(),
            "remote createList on table orders failed: 503"
        );

        let err = SyncError::Store(MISSING_MIGRATION_DIAGNOSTIC.into());
        assert_eq!(err.to_string(), MISSING_MIGRATION_DIAGNOSTIC);
    }
}
