//! ReDB storage backend

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use cairn_core::{
    ChangeOutcome, Document, DocumentId, FeatureId, FeatureVersion, IndexRow, SchemaCatalog, StructuralChange,
    TableSchema,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{StorageError, StorageResult};
use crate::rows::{check_forward, validate_row};
use crate::traits::{DocumentStore, DocumentStream, IndexStore, SchemaBackend, StorageBackend, VersionLedger};

// Table definitions
const FEATURE_VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("feature_versions");
const SCHEMA_CATALOG: TableDefinition<&str, &[u8]> = TableDefinition::new("schema_catalog");
const DOCUMENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("documents");
const INDEX_ROWS: TableDefinition<&str, &[u8]> = TableDefinition::new("index_rows");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_DOCUMENT_ID: &str = "next_document_id";

/// Documents read per page when streaming
const PAGE_SIZE: usize = 128;

/// ReDB storage backend
pub struct RedbStorage {
    db: Mutex<Database>,
}

impl RedbStorage {
    /// Open or create a ReDB database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path).map_err(|e| StorageError::Database(e.to_string()))?;

        // Initialize tables
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| StorageError::Database(e.to_string()))?;
            {
                write_txn.open_table(FEATURE_VERSIONS)?;
                write_txn.open_table(SCHEMA_CATALOG)?;
                write_txn.open_table(DOCUMENTS)?;
                write_txn.open_table(INDEX_ROWS)?;
                write_txn.open_table(META)?;
            }
            write_txn
                .commit()
                .map_err(|e| StorageError::Database(e.to_string()))?;
        }

        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Database>> {
        self.db.lock().map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Row keys sort by table, then by insertion sequence
    fn make_row_key(table: &str, seq: usize) -> String {
        format!("{}\u{0}{:020}", table, seq)
    }

    fn row_key_range(table: &str) -> (String, String) {
        (format!("{}\u{0}", table), format!("{}\u{1}", table))
    }

    fn load_catalog(table: &impl ReadableTable<&'static str, &'static [u8]>) -> StorageResult<SchemaCatalog> {
        let mut catalog = SchemaCatalog::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let schema: TableSchema = serde_json::from_slice(value.value())?;
            catalog.insert_table(schema);
        }
        Ok(catalog)
    }

    fn table(&self, name: &str) -> StorageResult<TableSchema> {
        let db = self.lock()?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SCHEMA_CATALOG)?;
        let schema = match table.get(name)? {
            Some(value) => serde_json::from_slice(value.value())?,
            None => return Err(StorageError::UnknownTable(name.to_string())),
        };
        Ok(schema)
    }

    /// Next page of documents of `type_id` with an id above `after`
    fn load_page(&self, type_id: &str, after: u64) -> StorageResult<(Vec<Document>, Option<u64>)> {
        let db = self.lock()?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS)?;

        let mut page = Vec::new();
        let mut last_seen = after;
        let mut exhausted = true;
        for entry in table.range((after + 1)..)? {
            let (key, value) = entry?;
            last_seen = key.value();
            let document: Document = serde_json::from_slice(value.value())?;
            if document.type_id == type_id {
                page.push(document);
                if page.len() == PAGE_SIZE {
                    exhausted = false;
                    break;
                }
            }
        }

        let next = if exhausted { None } else { Some(last_seen) };
        Ok((page, next))
    }
}

#[async_trait]
impl VersionLedger for RedbStorage {
    async fn get_applied_version(&self, feature: &FeatureId) -> StorageResult<u32> {
        let db = self.lock()?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(FEATURE_VERSIONS)?;

        let version = match table.get(feature.as_str())? {
            Some(value) => serde_json::from_slice::<FeatureVersion>(value.value())?.applied_version,
            None => 0,
        };
        Ok(version)
    }

    async fn set_applied_version(&self, feature: &FeatureId, version: u32) -> StorageResult<()> {
        let value = serde_json::to_vec(&FeatureVersion::new(feature.clone(), version))?;

        let db = self.lock()?;
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(FEATURE_VERSIONS)?;
            let current = match table.get(feature.as_str())? {
                Some(existing) => serde_json::from_slice::<FeatureVersion>(existing.value())?.applied_version,
                None => 0,
            };
            check_forward(feature, current, version)?;
            table.insert(feature.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;

        Ok(())
    }

    async fn list_versions(&self) -> StorageResult<Vec<FeatureVersion>> {
        let db = self.lock()?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(FEATURE_VERSIONS)?;

        let mut versions = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            versions.push(serde_json::from_slice(value.value())?);
        }
        Ok(versions)
    }
}

#[async_trait]
impl SchemaBackend for RedbStorage {
    async fn apply_change(&self, change: &StructuralChange) -> StorageResult<Vec<ChangeOutcome>> {
        let db = self.lock()?;
        let write_txn = db.begin_write()?;
        let outcomes = {
            let mut table = write_txn.open_table(SCHEMA_CATALOG)?;
            let mut catalog = Self::load_catalog(&table)?;
            let outcomes = catalog.apply(change)?;

            if outcomes.iter().any(ChangeOutcome::is_applied) {
                if let Some(schema) = catalog.table(change.table()) {
                    let value = serde_json::to_vec(schema)?;
                    table.insert(schema.name.as_str(), value.as_slice())?;
                }
            }
            outcomes
        };
        write_txn.commit()?;

        Ok(outcomes)
    }

    async fn table_schema(&self, table: &str) -> StorageResult<Option<TableSchema>> {
        match self.table(table) {
            Ok(schema) => Ok(Some(schema)),
            Err(StorageError::UnknownTable(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DocumentStore for RedbStorage {
    fn load_documents_by_type<'a>(&'a self, type_id: &'a str) -> DocumentStream<'a> {
        stream::try_unfold(Some(0u64), move |cursor| async move {
            let Some(after) = cursor else {
                return Ok(None);
            };
            let (page, next) = self.load_page(type_id, after)?;
            if page.is_empty() {
                return Ok(None);
            }
            Ok::<_, StorageError>(Some((
                stream::iter(page.into_iter().map(Ok::<Document, StorageError>)),
                next,
            )))
        })
        .try_flatten()
        .boxed()
    }

    async fn get_document(&self, id: DocumentId) -> StorageResult<Option<Document>> {
        let db = self.lock()?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS)?;

        let document = match table.get(id.0)? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(document)
    }

    async fn insert_document(&self, document: &Document) -> StorageResult<DocumentId> {
        let db = self.lock()?;
        let write_txn = db.begin_write()?;
        let id = {
            let mut meta = write_txn.open_table(META)?;
            let next = meta.get(NEXT_DOCUMENT_ID)?.map(|v| v.value()).unwrap_or(1);
            meta.insert(NEXT_DOCUMENT_ID, next + 1)?;

            let mut stored = document.clone();
            stored.id = DocumentId(next);
            stored.version = 1;
            let value = serde_json::to_vec(&stored)?;

            let mut table = write_txn.open_table(DOCUMENTS)?;
            table.insert(next, value.as_slice())?;
            stored.id
        };
        write_txn.commit()?;

        Ok(id)
    }

    async fn save_document(&self, document: &Document) -> StorageResult<()> {
        let db = self.lock()?;
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(DOCUMENTS)?;
            let stored: Document = match table.get(document.id.0)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StorageError::DocumentNotFound(document.id)),
            };
            if stored.version != document.version {
                return Err(StorageError::ConcurrentModification {
                    id: document.id,
                    expected: document.version,
                    found: stored.version,
                });
            }

            let mut updated = stored;
            updated.content = document.content.clone();
            updated.version += 1;
            let value = serde_json::to_vec(&updated)?;
            table.insert(document.id.0, value.as_slice())?;
        }
        write_txn.commit()?;

        Ok(())
    }

    async fn count_documents(&self, type_id: &str) -> StorageResult<usize> {
        let mut count = 0;
        let mut stream = self.load_documents_by_type(type_id);
        while stream.try_next().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl IndexStore for RedbStorage {
    async fn replace_index_rows(&self, table: &str, rows: &[IndexRow]) -> StorageResult<()> {
        let schema = self.table(table)?;
        for row in rows {
            validate_row(&schema, row)?;
        }

        let (start, end) = Self::row_key_range(table);
        let db = self.lock()?;
        let write_txn = db.begin_write()?;
        {
            let mut index_rows = write_txn.open_table(INDEX_ROWS)?;
            let stale: Vec<String> = {
                let mut keys = Vec::new();
                for entry in index_rows.range(start.as_str()..end.as_str())? {
                    let (key, _) = entry?;
                    keys.push(key.value().to_string());
                }
                keys
            };
            for key in stale {
                index_rows.remove(key.as_str())?;
            }

            for (seq, row) in rows.iter().enumerate() {
                let key = Self::make_row_key(table, seq);
                let value = serde_json::to_vec(row)?;
                index_rows.insert(key.as_str(), value.as_slice())?;
            }
        }
        write_txn.commit()?;

        Ok(())
    }

    async fn index_rows(&self, table: &str) -> StorageResult<Vec<IndexRow>> {
        self.table(table)?;

        let (start, end) = Self::row_key_range(table);
        let db = self.lock()?;
        let read_txn = db.begin_read()?;
        let index_rows = read_txn.open_table(INDEX_ROWS)?;

        let mut rows = Vec::new();
        for entry in index_rows.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            rows.push(serde_json::from_slice(value.value())?);
        }
        Ok(rows)
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
impl StorageBackend for RedbStorage {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        let db = self.lock()?;
        db.begin_read()?;
        Ok(true)
    }
}
