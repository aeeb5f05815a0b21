//! Error types for the entity store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record was rejected before it reached the database.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// One row of a typed copy failed; the surrounding transaction is rolled back.
    #[error("Insert into '{table}' failed for entity {entity}: {source}")]
    RowInsert {
        table: String,
        entity: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The caller cancelled a typed copy before it committed; nothing was written.
    #[error("Copy into '{table}' cancelled before commit")]
    Cancelled { table: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
