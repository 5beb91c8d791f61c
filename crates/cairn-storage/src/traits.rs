//! Storage backend trait definitions

use async_trait::async_trait;
use cairn_core::{ChangeOutcome, Document, DocumentId, FeatureId, FeatureVersion, IndexRow, StructuralChange, TableSchema};
use futures::stream::BoxStream;

use crate::error::StorageResult;

/// Lazy sequence of documents of one type, in id order
pub type DocumentStream<'a> = BoxStream<'a, StorageResult<Document>>;

/// Persistent record of the last applied migration version per feature
#[async_trait]
pub trait VersionLedger: Send + Sync {
    /// Applied version, 0 when the feature was never migrated
    async fn get_applied_version(&self, feature: &FeatureId) -> StorageResult<u32>;

    /// Record a committed version; lowering it is rejected
    async fn set_applied_version(&self, feature: &FeatureId, version: u32) -> StorageResult<()>;

    /// Every ledger entry, ordered by feature id
    async fn list_versions(&self) -> StorageResult<Vec<FeatureVersion>>;
}

/// Native schema facility of a backend
#[async_trait]
pub trait SchemaBackend: Send + Sync {
    /// Apply one structural change, creating only what is absent
    async fn apply_change(&self, change: &StructuralChange) -> StorageResult<Vec<ChangeOutcome>>;

    /// Current shape of a table, if it exists
    async fn table_schema(&self, table: &str) -> StorageResult<Option<TableSchema>>;
}

/// Generic document persistence, one commit per call
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stream every document of `type_id`; pages are read on demand
    fn load_documents_by_type<'a>(&'a self, type_id: &'a str) -> DocumentStream<'a>;

    async fn get_document(&self, id: DocumentId) -> StorageResult<Option<Document>>;

    /// Insert a new document and return its assigned id
    async fn insert_document(&self, document: &Document) -> StorageResult<DocumentId>;

    /// Replace an existing document
    ///
    /// `document.version` must match the stored version; the store bumps it.
    async fn save_document(&self, document: &Document) -> StorageResult<()>;

    async fn count_documents(&self, type_id: &str) -> StorageResult<usize>;
}

/// Rows of map index tables
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Drop every row of `table` and insert `rows` in one commit
    async fn replace_index_rows(&self, table: &str, rows: &[IndexRow]) -> StorageResult<()>;

    async fn index_rows(&self, table: &str) -> StorageResult<Vec<IndexRow>>;

    async fn index_rows_for_document(&self, table: &str, document_id: DocumentId) -> StorageResult<Vec<IndexRow>>;
}

/// Trait for storage backend implementations
#[async_trait]
pub trait StorageBackend: VersionLedger + SchemaBackend + DocumentStore + IndexStore {
    /// Initialize the storage (create internal tables, etc.)
    async fn initialize(&self) -> StorageResult<()>;

    /// Close the storage connection
    async fn close(&self) -> StorageResult<()>;

    /// Health check
    async fn health_check(&self) -> StorageResult<bool>;
}
