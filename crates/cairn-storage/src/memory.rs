//! In-memory storage backend for testing

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use cairn_core::{
    ChangeOutcome, Document, DocumentId, FeatureId, FeatureVersion, IndexRow, SchemaCatalog, StructuralChange,
    TableSchema,
};
use futures::stream::{self, StreamExt};

use crate::error::{StorageError, StorageResult};
use crate::rows::{check_forward, validate_row};
use crate::traits::{DocumentStore, DocumentStream, IndexStore, SchemaBackend, StorageBackend, VersionLedger};

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Database(format!("Lock error: {}", e))
}

/// In-memory storage backend
///
/// Useful for testing and for dry runs against imported documents.
pub struct MemoryStorage {
    ledger: RwLock<BTreeMap<FeatureId, FeatureVersion>>,
    catalog: RwLock<SchemaCatalog>,
    documents: RwLock<BTreeMap<DocumentId, Document>>,
    index_rows: RwLock<HashMap<String, Vec<IndexRow>>>,
    next_id: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            ledger: RwLock::new(BTreeMap::new()),
            catalog: RwLock::new(SchemaCatalog::new()),
            documents: RwLock::new(BTreeMap::new()),
            index_rows: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn table(&self, table: &str) -> StorageResult<TableSchema> {
        let catalog = self.catalog.read().map_err(lock_error)?;
        catalog
            .table(table)
            .cloned()
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionLedger for MemoryStorage {
    async fn get_applied_version(&self, feature: &FeatureId) -> StorageResult<u32> {
        let ledger = self.ledger.read().map_err(lock_error)?;
        Ok(ledger.get(feature).map(|v| v.applied_version).unwrap_or(0))
    }

    async fn set_applied_version(&self, feature: &FeatureId, version: u32) -> StorageResult<()> {
        let mut ledger = self.ledger.write().map_err(lock_error)?;
        let current = ledger.get(feature).map(|v| v.applied_version).unwrap_or(0);
        check_forward(feature, current, version)?;
        ledger.insert(feature.clone(), FeatureVersion::new(feature.clone(), version));
        Ok(())
    }

    async fn list_versions(&self) -> StorageResult<Vec<FeatureVersion>> {
        let ledger = self.ledger.read().map_err(lock_error)?;
        Ok(ledger.values().cloned().collect())
    }
}

#[async_trait]
impl SchemaBackend for MemoryStorage {
    async fn apply_change(&self, change: &StructuralChange) -> StorageResult<Vec<ChangeOutcome>> {
        let mut catalog = self.catalog.write().map_err(lock_error)?;
        Ok(catalog.apply(change)?)
    }

    async fn table_schema(&self, table: &str) -> StorageResult<Option<TableSchema>> {
        let catalog = self.catalog.read().map_err(lock_error)?;
        Ok(catalog.table(table).cloned())
    }
}

#[async_trait]
impl DocumentStore for MemoryStorage {
    fn load_documents_by_type<'a>(&'a self, type_id: &'a str) -> DocumentStream<'a> {
        let snapshot: StorageResult<Vec<Document>> = self
            .documents
            .read()
            .map_err(lock_error)
            .map(|docs| docs.values().filter(|d| d.type_id == type_id).cloned().collect());

        match snapshot {
            Ok(docs) => stream::iter(docs.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    async fn get_document(&self, id: DocumentId) -> StorageResult<Option<Document>> {
        let documents = self.documents.read().map_err(lock_error)?;
        Ok(documents.get(&id).cloned())
    }

    async fn insert_document(&self, document: &Document) -> StorageResult<DocumentId> {
        let mut documents = self.documents.write().map_err(lock_error)?;
        let id = DocumentId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut stored = document.clone();
        stored.id = id;
        stored.version = 1;
        documents.insert(id, stored);
        Ok(id)
    }

    async fn save_document(&self, document: &Document) -> StorageResult<()> {
        let mut documents = self.documents.write().map_err(lock_error)?;
        let stored = documents
            .get_mut(&document.id)
            .ok_or(StorageError::DocumentNotFound(document.id))?;
        if stored.version != document.version {
            return Err(StorageError::ConcurrentModification {
                id: document.id,
                expected: document.version,
                found: stored.version,
            });
        }
        stored.content = document.content.clone();
        stored.version += 1;
        Ok(())
    }

    async fn count_documents(&self, type_id: &str) -> StorageResult<usize> {
        let documents = self.documents.read().map_err(lock_error)?;
        Ok(documents.values().filter(|d| d.type_id == type_id).count())
    }
}

#[async_trait]
impl IndexStore for MemoryStorage {
    async fn replace_index_rows(&self, table: &str, rows: &[IndexRow]) -> StorageResult<()> {
        let schema = self.table(table)?;
        for row in rows {
            validate_row(&schema, row)?;
        }
        let mut index_rows = self.index_rows.write().map_err(lock_error)?;
        index_rows.insert(table.to_string(), rows.to_vec());
        Ok(())
    }

    async fn index_rows(&self, table: &str) -> StorageResult<Vec<IndexRow>> {
        self.table(table)?;
        let index_rows = self.index_rows.read().map_err(lock_error)?;
        Ok(index_rows.get(table).cloned().unwrap_or_default())
    }

    async fn index_rows_for_document(&self, table: &str, document_id: DocumentId) -> StorageResult<Vec<IndexRow>> {
        Ok(self
            .index_rows(table)
            .await?
            .into_iter()
            .filter(|r| r.document_id == document_id)
            .collect())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{doc_types, ColumnSpec};
    use futures::TryStreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_ledger() {
        let storage = MemoryStorage::new();
        let feature = FeatureId::new("Contents").unwrap();

        assert_eq!(storage.get_applied_version(&feature).await.unwrap(), 0);
        storage.set_applied_version(&feature, 6).await.unwrap();
        assert_eq!(storage.get_applied_version(&feature).await.unwrap(), 6);

        assert!(storage.set_applied_version(&feature, 5).await.is_err());
        assert_eq!(storage.get_applied_version(&feature).await.unwrap(), 6);

        let versions = storage.list_versions().await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].applied_version, 6);
    }

    #[tokio::test]
    async fn test_memory_documents() {
        let storage = MemoryStorage::new();
        let id = storage
            .insert_document(&Document::new(doc_types::CONTENT_ITEM, json!({"a": 1})))
            .await
            .unwrap();
        storage
            .insert_document(&Document::new(doc_types::CONTENT_PART_DEFINITION, json!({})))
            .await
            .unwrap();

        let items: Vec<Document> = storage
            .load_documents_by_type(doc_types::CONTENT_ITEM)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);

        let mut doc = items[0].clone();
        doc.content = json!({"a": 2});
        storage.save_document(&doc).await.unwrap();

        // Stale version is rejected
        assert!(matches!(
            storage.save_document(&doc).await,
            Err(StorageError::ConcurrentModification { .. })
        ));

        let stored = storage.get_document(id).await.unwrap().unwrap();
        assert_eq!(stored.content, json!({"a": 2}));
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_memory_index_rows() {
        let storage = MemoryStorage::new();
        let rows = vec![IndexRow {
            document_id: DocumentId(3),
            values: json!({"Name": "x"}).as_object().cloned().unwrap(),
        }];
        assert!(matches!(
            storage.replace_index_rows("T", &rows).await,
            Err(StorageError::UnknownTable(_))
        ));

        storage
            .apply_change(&StructuralChange::create_map_index_table("T", vec![ColumnSpec::string("Name")]))
            .await
            .unwrap();
        storage.replace_index_rows("T", &rows).await.unwrap();

        assert_eq!(storage.index_rows("T").await.unwrap().len(), 1);
        assert_eq!(storage.index_rows_for_document("T", DocumentId(3)).await.unwrap().len(), 1);
        assert!(storage.index_rows_for_document("T", DocumentId(4)).await.unwrap().is_empty());
    }
}
