//! Error types for the snapshot pipeline.

use serde::{Deserialize, Serialize};

/// Category of a failure, as reported in [`crate::engine::MigrationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Either endpoint could not be reached.
    Connectivity,
    /// Missing or contradictory settings.
    Configuration,
    /// DDL for a table was rejected by the target.
    Schema,
    /// An index or foreign key was rejected.
    Constraint,
    /// Row transfer failed.
    Data,
    /// Auto-increment restoration or counter reconciliation failed.
    PostMigration,
}

/// Errors that can occur while taking a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Cannot reach a source or target endpoint.
    #[error("Connection to {endpoint} failed: {message}")]
    Connectivity {
        /// Which end failed ("source" or "target").
        endpoint: String,
        /// Error message.
        message: String,
    },

    /// Invalid configuration, detected before any I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Schema migration of a table failed.
    #[error("Schema migration failed for table '{table}': {message}")]
    Schema {
        /// Table name.
        table: String,
        /// Error message.
        message: String,
    },

    /// Index or foreign key could not be created.
    #[error("Constraint '{name}' on '{table}' failed: {message}")]
    Constraint {
        /// Table name.
        table: String,
        /// Constraint or index name.
        name: String,
        /// Error message.
        message: String,
    },

    /// Data transfer of a table failed.
    #[error("Data migration failed for table '{table}': {message}")]
    Data {
        /// Table name.
        table: String,
        /// Error message.
        message: String,
    },

    /// Post-migration fix-up failed.
    #[error("Post-migration step failed: {0}")]
    PostMigration(String),

    /// The provider does not support the requested operation.
    #[error("Operation not supported by {provider}: {operation}")]
    Unsupported {
        /// Provider name.
        provider: String,
        /// The unsupported operation.
        operation: String,
    },

    /// The provider was used before `connect`.
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading configuration, writing scripts).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid pattern.
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

impl SnapshotError {
    /// Returns the failure category used in run results.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connectivity { .. } | Self::NotConnected(_) => ErrorKind::Connectivity,
            Self::Configuration(_) | Self::Pattern(_) | Self::Serialization(_) => {
                ErrorKind::Configuration
            }
            Self::Constraint { .. } => ErrorKind::Constraint,
            Self::Data { .. } => ErrorKind::Data,
            Self::PostMigration(_) => ErrorKind::PostMigration,
            Self::Schema { .. } | Self::Unsupported { .. } | Self::Database(_) | Self::Io(_) => {
                ErrorKind::Schema
            }
        }
    }

    /// Wraps this error as a connectivity failure of `endpoint`.
    #[must_use]
    pub fn into_connectivity(self, endpoint: &str) -> Self {
        match self {
            e @ Self::Connectivity { .. } => e,
            other => Self::Connectivity {
                endpoint: endpoint.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Wraps this error as a data failure of `table`.
    #[must_use]
    pub fn into_data(self, table: &str) -> Self {
        match self {
            e @ (Self::Data { .. } | Self::Connectivity { .. }) => e,
            other => Self::Data {
                table: table.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;
