//! Storage error types for meshsync-store.

use thiserror::Error;

/// Errors produced by local persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The SQLite backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// JSON serialization of a stored value failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
