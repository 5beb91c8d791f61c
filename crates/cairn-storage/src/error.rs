//! Storage error types

use cairn_core::{DocumentId, SchemaConflict};
use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage-specific error types
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model error: {0}")]
    Model(#[from] cairn_core::Error),

    #[error("Schema conflict: {0}")]
    SchemaConflict(#[from] SchemaConflict),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Document {id} was modified concurrently (expected version {expected}, found {found})")]
    ConcurrentModification { id: DocumentId, expected: u64, found: u64 },

    #[error("Unknown index table: {0}")]
    UnknownTable(String),

    #[error("Invalid row for table '{table}': {reason}")]
    InvalidRow { table: String, reason: String },

    #[error("Ledger for '{feature}' is at version {current}, refusing to move back to {requested}")]
    LedgerRegression { feature: String, current: u32, requested: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "redb")]
    #[error("ReDB error: {0}")]
    Redb(#[from] ::redb::Error),

    #[cfg(feature = "redb")]
    #[error("ReDB database error: {0}")]
    RedbDatabase(#[from] ::redb::DatabaseError),

    #[cfg(feature = "redb")]
    #[error("ReDB table error: {0}")]
    RedbTable(#[from] ::redb::TableError),

    #[cfg(feature = "redb")]
    #[error("ReDB storage error: {0}")]
    RedbStorage(#[from] ::redb::StorageError),

    #[cfg(feature = "redb")]
    #[error("ReDB commit error: {0}")]
    RedbCommit(#[from] ::redb::CommitError),

    #[cfg(feature = "redb")]
    #[error("ReDB transaction error: {0}")]
    RedbTransaction(#[from] ::redb::TransactionError),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] ::rusqlite::Error),
}
