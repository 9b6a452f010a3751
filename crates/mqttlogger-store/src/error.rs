//! Error types for mqttlogger-store.

use std::path::PathBuf;

/// Result type for mqttlogger-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mqttlogger-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A file operation during backup or restore failed.
    #[error("Failed to {action} {path}: {source}")]
    File {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    /// The snapshot to restore from does not exist.
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(PathBuf),

    /// The snapshot to restore from is not an SQLite database.
    #[error("Not an SQLite database: {0}")]
    InvalidSnapshot(PathBuf),

    /// Source and destination of a copy are the same file.
    #[error("Refusing to copy {0} onto itself")]
    SameFile(PathBuf),

    /// SQLite refused to switch the journal mode.
    #[error("Journal mode is '{actual}', expected '{expected}'")]
    JournalMode {
        expected: &'static str,
        actual: String,
    },

    /// The operation needs a database file but the store is in memory.
    #[error("Store is not backed by a file")]
    NotFileBacked,
}
