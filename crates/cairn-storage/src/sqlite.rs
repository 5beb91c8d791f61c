//! SQLite storage backend
//!
//! Structural changes become real DDL. The current shape of every user table
//! is read back from `pragma_table_info` / `pragma_index_list` before each
//! change, so the compatibility decision always reflects the live database.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use cairn_core::limits::is_valid_identifier;
use cairn_core::schema::{DOCUMENT_ID_COLUMN, ID_COLUMN};
use cairn_core::{
    ChangeOutcome, ColumnSpec, ColumnType, Document, DocumentId, FeatureId, FeatureVersion, IndexRow, IndexSpec,
    SchemaCatalog, SchemaOp, StructuralChange, TableKind, TableSchema,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{StorageError, StorageResult};
use crate::rows::{check_forward, validate_row};
use crate::traits::{DocumentStore, DocumentStream, IndexStore, SchemaBackend, StorageBackend, VersionLedger};

/// Prefix of the backend's own bookkeeping tables
const INTERNAL_PREFIX: &str = "Cairn_";

/// Documents read per page when streaming
const PAGE_SIZE: i64 = 128;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create a SQLite database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path).map_err(|e| StorageError::Database(e.to_string()))?;

        let storage = Self { conn: Mutex::new(conn) };
        storage.init_tables()?;

        Ok(storage)
    }

    /// Create an in-memory SQLite database (for testing)
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::Database(e.to_string()))?;

        let storage = Self { conn: Mutex::new(conn) };
        storage.init_tables()?;

        Ok(storage)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| StorageError::Database(e.to_string()))
    }

    fn init_tables(&self) -> StorageResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS Cairn_FeatureVersions (
                FeatureId TEXT PRIMARY KEY,
                AppliedVersion INTEGER NOT NULL,
                UpdatedUtc TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS Cairn_Documents (
                Id INTEGER PRIMARY KEY AUTOINCREMENT,
                Type TEXT NOT NULL,
                Content TEXT NOT NULL,
                Version INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS IDX_Cairn_Documents_Type ON Cairn_Documents(Type, Id);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn load_page(&self, type_id: &str, after: u64) -> StorageResult<(Vec<Document>, Option<u64>)> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT Id, Type, Content, Version FROM Cairn_Documents WHERE Type = ?1 AND Id > ?2 ORDER BY Id LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![type_id, after as i64, PAGE_SIZE], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut page = Vec::new();
        for row in rows {
            let (id, type_id, content, version) = row?;
            page.push(Document {
                id: DocumentId(id as u64),
                type_id,
                content: serde_json::from_str(&content)?,
                version: version as u64,
            });
        }

        let next = if page.len() as i64 == PAGE_SIZE {
            page.last().map(|d| d.id.0)
        } else {
            None
        };
        Ok((page, next))
    }
}

/// Declared SQL type carrying the column's length
fn sql_type(column: &ColumnSpec) -> String {
    let base = match column.column_type {
        ColumnType::String => "VARCHAR",
        ColumnType::Text => "TEXT",
        ColumnType::Bool => "BOOLEAN",
        ColumnType::Int => "INTEGER",
        ColumnType::BigInt => "BIGINT",
        ColumnType::DateTime => "DATETIME",
    };
    match column.max_length {
        Some(len) => format!("{}({})", base, len),
        None => base.to_string(),
    }
}

fn parse_sql_type(declared: &str) -> Option<(ColumnType, Option<u32>)> {
    let declared = declared.trim().to_ascii_uppercase();
    let (base, length) = match declared.split_once('(') {
        Some((base, rest)) => {
            let len = rest.strip_suffix(')')?.trim().parse().ok()?;
            (base.trim().to_string(), Some(len))
        }
        None => (declared, None),
    };
    let column_type = match base.as_str() {
        "VARCHAR" => ColumnType::String,
        "TEXT" => ColumnType::Text,
        "BOOLEAN" => ColumnType::Bool,
        "INTEGER" => ColumnType::Int,
        "BIGINT" => ColumnType::BigInt,
        "DATETIME" => ColumnType::DateTime,
        _ => return None,
    };
    Some((column_type, length))
}

fn column_definition(column: &ColumnSpec) -> String {
    let mut def = format!("\"{}\" {}", column.name, sql_type(column));
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    def
}

/// SQLite cannot add a NOT NULL column without a default
fn zero_value(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::String | ColumnType::Text | ColumnType::DateTime => "''",
        ColumnType::Bool | ColumnType::Int | ColumnType::BigInt => "0",
    }
}

fn ddl(op: &SchemaOp) -> String {
    match op {
        SchemaOp::CreateTable(schema) => {
            let columns: Vec<String> = schema
                .columns
                .iter()
                .map(|c| {
                    if schema.kind == TableKind::MapIndex && c.name == ID_COLUMN {
                        format!("\"{}\" INTEGER PRIMARY KEY AUTOINCREMENT", ID_COLUMN)
                    } else {
                        column_definition(c)
                    }
                })
                .collect();
            format!("CREATE TABLE \"{}\" ({})", schema.name, columns.join(", "))
        }
        SchemaOp::AddColumn { table, column } => {
            let mut sql = format!("ALTER TABLE \"{}\" ADD COLUMN {}", table, column_definition(column));
            if !column.nullable {
                sql.push_str(&format!(" DEFAULT {}", zero_value(column.column_type)));
            }
            sql
        }
        SchemaOp::CreateIndex { table, index } => {
            let columns: Vec<String> = index.columns.iter().map(|c| format!("\"{}\"", c)).collect();
            format!("CREATE INDEX \"{}\" ON \"{}\" ({})", index.name, table, columns.join(", "))
        }
    }
}

fn introspect_table(conn: &Connection, table: &str) -> StorageResult<Option<TableSchema>> {
    let mut stmt = conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")?;
    let raw: Vec<(String, String, i64, i64)> = stmt
        .query_map([table], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
        .collect::<Result<_, _>>()?;
    if raw.is_empty() {
        return Ok(None);
    }

    let is_map_index = raw.first().is_some_and(|(name, _, _, pk)| name == ID_COLUMN && *pk == 1)
        && raw.iter().any(|(name, ..)| name == DOCUMENT_ID_COLUMN);

    let mut columns = Vec::with_capacity(raw.len());
    for (name, declared, not_null, pk) in raw {
        if is_map_index && name == ID_COLUMN && pk == 1 {
            columns.push(ColumnSpec::big_int(ID_COLUMN));
            continue;
        }
        let (column_type, max_length) = parse_sql_type(&declared).ok_or_else(|| {
            StorageError::Database(format!("column {}.{} has unsupported type '{}'", table, name, declared))
        })?;
        columns.push(ColumnSpec {
            name,
            column_type,
            nullable: not_null == 0,
            max_length,
        });
    }

    let mut index_stmt = conn.prepare("SELECT name FROM pragma_index_list(?1) WHERE origin = 'c' ORDER BY name")?;
    let index_names: Vec<String> = index_stmt
        .query_map([table], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    let mut info_stmt = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    let mut indexes = Vec::with_capacity(index_names.len());
    for name in index_names {
        let index_columns: Vec<String> = info_stmt
            .query_map([name.as_str()], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        indexes.push(IndexSpec {
            name,
            columns: index_columns,
        });
    }

    Ok(Some(TableSchema {
        name: table.to_string(),
        kind: if is_map_index { TableKind::MapIndex } else { TableKind::Plain },
        columns,
        indexes,
    }))
}

fn introspect_catalog(conn: &Connection) -> StorageResult<SchemaCatalog> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let names: Vec<String> = stmt.query_map([], |row| row.get(0))?.collect::<Result<_, _>>()?;

    let mut catalog = SchemaCatalog::new();
    for name in names {
        if name.starts_with("sqlite_") || name.starts_with(INTERNAL_PREFIX) {
            continue;
        }
        if let Some(schema) = introspect_table(conn, &name)? {
            catalog.insert_table(schema);
        }
    }
    Ok(catalog)
}

fn user_table(conn: &Connection, table: &str) -> StorageResult<TableSchema> {
    if !is_valid_identifier(table) || table.starts_with(INTERNAL_PREFIX) {
        return Err(StorageError::UnknownTable(table.to_string()));
    }
    introspect_table(conn, table)?.ok_or_else(|| StorageError::UnknownTable(table.to_string()))
}

fn value_columns(schema: &TableSchema) -> Vec<&ColumnSpec> {
    schema
        .columns
        .iter()
        .filter(|c| c.name != ID_COLUMN && c.name != DOCUMENT_ID_COLUMN)
        .collect()
}

fn to_sql_value(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(column_type: ColumnType, value: SqlValue) -> Value {
    match (column_type, value) {
        (_, SqlValue::Null) => Value::Null,
        (ColumnType::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (_, SqlValue::Integer(i)) => Value::from(i),
        (_, SqlValue::Real(f)) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        (_, SqlValue::Text(s)) => Value::String(s),
        (_, SqlValue::Blob(b)) => Value::String(String::from_utf8_lossy(&b).into_owned()),
    }
}

fn query_rows(conn: &Connection, schema: &TableSchema, document_id: Option<DocumentId>) -> StorageResult<Vec<IndexRow>> {
    let columns = value_columns(schema);
    let mut select: Vec<String> = vec![format!("\"{}\"", DOCUMENT_ID_COLUMN)];
    select.extend(columns.iter().map(|c| format!("\"{}\"", c.name)));

    let mut sql = format!("SELECT {} FROM \"{}\"", select.join(", "), schema.name);
    if document_id.is_some() {
        sql.push_str(&format!(" WHERE \"{}\" = ?1", DOCUMENT_ID_COLUMN));
    }
    sql.push_str(&format!(" ORDER BY \"{}\"", ID_COLUMN));

    let params: Vec<SqlValue> = document_id.map(|id| SqlValue::Integer(id.0 as i64)).into_iter().collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        let document_id = DocumentId(row.get::<_, i64>(0)? as u64);
        let mut values = serde_json::Map::new();
        for (idx, column) in columns.iter().enumerate() {
            let raw: SqlValue = row.get(idx + 1)?;
            values.insert(column.name.clone(), from_sql_value(column.column_type, raw));
        }
        Ok(IndexRow { document_id, values })
    })?;

    Ok(rows.collect::<Result<_, _>>()?)
}

#[async_trait]
impl VersionLedger for SqliteStorage {
    async fn get_applied_version(&self, feature: &FeatureId) -> StorageResult<u32> {
        let conn = self.lock()?;
        let version: Option<i64> = conn
            .query_row(
                "SELECT AppliedVersion FROM Cairn_FeatureVersions WHERE FeatureId = ?1",
                params![feature.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.unwrap_or(0) as u32)
    }

    async fn set_applied_version(&self, feature: &FeatureId, version: u32) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT AppliedVersion FROM Cairn_FeatureVersions WHERE FeatureId = ?1",
                params![feature.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        check_forward(feature, current.unwrap_or(0) as u32, version)?;

        tx.execute(
            "INSERT OR REPLACE INTO Cairn_FeatureVersions (FeatureId, AppliedVersion, UpdatedUtc) VALUES (?1, ?2, ?3)",
            params![feature.as_str(), version as i64, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        Ok(())
    }

    async fn list_versions(&self) -> StorageResult<Vec<FeatureVersion>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT FeatureId, AppliedVersion, UpdatedUtc FROM Cairn_FeatureVersions ORDER BY FeatureId")?;
        let rows: Vec<(String, i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<_, _>>()?;

        let mut versions = Vec::with_capacity(rows.len());
        for (feature_id, applied_version, updated) in rows {
            let updated_at = DateTime::parse_from_rfc3339(&updated)
                .map_err(|e| StorageError::Database(format!("invalid UpdatedUtc '{}': {}", updated, e)))?
                .with_timezone(&Utc);
            versions.push(FeatureVersion {
                feature_id: FeatureId::new(feature_id)?,
                applied_version: applied_version as u32,
                updated_at,
            });
        }
        Ok(versions)
    }
}

#[async_trait]
impl SchemaBackend for SqliteStorage {
    async fn apply_change(&self, change: &StructuralChange) -> StorageResult<Vec<ChangeOutcome>> {
        let mut conn = self.lock()?;
        let mut catalog = introspect_catalog(&conn)?;
        let outcomes = catalog.apply(change)?;

        let tx = conn.transaction()?;
        for outcome in outcomes.iter().filter(|o| o.is_applied()) {
            let sql = ddl(outcome.op());
            tracing::debug!("Executing DDL: {}", sql);
            tx.execute_batch(&sql)?;
        }
        tx.commit()?;

        Ok(outcomes)
    }

    async fn table_schema(&self, table: &str) -> StorageResult<Option<TableSchema>> {
        let conn = self.lock()?;
        match user_table(&conn, table) {
            Ok(schema) => Ok(Some(schema)),
            Err(StorageError::UnknownTable(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteStorage {
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
        let conn = self.lock()?;
        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT Type, Content, Version FROM Cairn_Documents WHERE Id = ?1",
                params![id.0 as i64],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((type_id, content, version)) => Ok(Some(Document {
                id,
                type_id,
                content: serde_json::from_str(&content)?,
                version: version as u64,
            })),
            None => Ok(None),
        }
    }

    async fn insert_document(&self, document: &Document) -> StorageResult<DocumentId> {
        let conn = self.lock()?;
        let content = serde_json::to_string(&document.content)?;

        conn.execute(
            "INSERT INTO Cairn_Documents (Type, Content, Version) VALUES (?1, ?2, 1)",
            params![document.type_id, content],
        )?;

        Ok(DocumentId(conn.last_insert_rowid() as u64))
    }

    async fn save_document(&self, document: &Document) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let content = serde_json::to_string(&document.content)?;
        let tx = conn.transaction()?;

        let stored: Option<i64> = tx
            .query_row(
                "SELECT Version FROM Cairn_Documents WHERE Id = ?1",
                params![document.id.0 as i64],
                |row| row.get(0),
            )
            .optional()?;
        let stored = stored.ok_or(StorageError::DocumentNotFound(document.id))? as u64;
        if stored != document.version {
            return Err(StorageError::ConcurrentModification {
                id: document.id,
                expected: document.version,
                found: stored,
            });
        }

        tx.execute(
            "UPDATE Cairn_Documents SET Content = ?1, Version = Version + 1 WHERE Id = ?2",
            params![content, document.id.0 as i64],
        )?;
        tx.commit()?;

        Ok(())
    }

    async fn count_documents(&self, type_id: &str) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM Cairn_Documents WHERE Type = ?1",
            params![type_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl IndexStore for SqliteStorage {
    async fn replace_index_rows(&self, table: &str, rows: &[IndexRow]) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let schema = user_table(&conn, table)?;
        for row in rows {
            validate_row(&schema, row)?;
        }

        let columns = value_columns(&schema);
        let mut names: Vec<String> = vec![format!("\"{}\"", DOCUMENT_ID_COLUMN)];
        names.extend(columns.iter().map(|c| format!("\"{}\"", c.name)));
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        let insert = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            table,
            names.join(", "),
            placeholders.join(", ")
        );

        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM \"{}\"", table), [])?;
        {
            let mut stmt = tx.prepare(&insert)?;
            for row in rows {
                let mut values = Vec::with_capacity(columns.len() + 1);
                values.push(SqlValue::Integer(row.document_id.0 as i64));
                values.extend(columns.iter().map(|c| to_sql_value(row.values.get(&c.name))));
                stmt.execute(params_from_iter(values.iter()))?;
            }
        }
        tx.commit()?;

        Ok(())
    }

    async fn index_rows(&self, table: &str) -> StorageResult<Vec<IndexRow>> {
        let conn = self.lock()?;
        let schema = user_table(&conn, table)?;
        query_rows(&conn, &schema, None)
    }

    async fn index_rows_for_document(&self, table: &str, document_id: DocumentId) -> StorageResult<Vec<IndexRow>> {
        let conn = self.lock()?;
        let schema = user_table(&conn, table)?;
        query_rows(&conn, &schema, Some(document_id))
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(true)
    }
}
