//! Cairn Storage - Collaborator backends for the migration engine
//!
//! Every backend provides the version ledger, the schema facility, the
//! document store and map index rows behind one `StorageBackend` trait.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod error;
pub mod rows;
pub mod traits;

#[cfg(feature = "redb")]
pub mod redb;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod memory;

pub use cache::{ChangeToken, DisplayCache, Signal};
pub use error::{StorageError, StorageResult};
pub use traits::{DocumentStore, DocumentStream, IndexStore, SchemaBackend, StorageBackend, VersionLedger};

#[cfg(feature = "redb")]
pub use redb::RedbStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

pub use memory::MemoryStorage;
