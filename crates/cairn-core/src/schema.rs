//! Structural change intents and the schema catalog they are checked against
//!
//! Every backend resolves a [`StructuralChange`] through [`SchemaCatalog::apply`]
//! so that "create if absent, no-op if equivalent, conflict if incompatible"
//! means the same thing whether the catalog lives in memory, in redb or is
//! recovered from SQLite pragmas.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::is_valid_identifier;

/// Name of the implicit primary key of map index tables
pub const ID_COLUMN: &str = "Id";

/// Name of the implicit document back-reference of map index tables
pub const DOCUMENT_ID_COLUMN: &str = "DocumentId";

/// Logical column types understood by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    String,
    Text,
    Bool,
    Int,
    BigInt,
    DateTime,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Text => "text",
            ColumnType::Bool => "bool",
            ColumnType::Int => "int",
            ColumnType::BigInt => "bigint",
            ColumnType::DateTime => "datetime",
        };
        f.write_str(name)
    }
}

/// A typed column declaration
///
/// Name, type, nullability and length together form the identity used for
/// compatibility checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            max_length: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::String)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Bool)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::DateTime)
    }

    pub fn big_int(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::BigInt)
    }

    pub fn with_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    fn describe(&self) -> String {
        let mut out = self.column_type.to_string();
        if let Some(len) = self.max_length {
            out.push_str(&format!("({})", len));
        }
        if self.nullable {
            out.push_str(" null");
        } else {
            out.push_str(" not null");
        }
        out
    }
}

/// A named index over an ordered list of columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Shape family of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    /// Index table projected from documents: implicit `Id` and `DocumentId`
    MapIndex,
    /// Table holding exactly the declared columns
    Plain,
}

/// One alteration inside [`StructuralChange::AlterTable`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableAlteration {
    AddColumn(ColumnSpec),
    CreateIndex(IndexSpec),
}

/// A declarative DDL intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructuralChange {
    CreateTable {
        table: String,
        kind: TableKind,
        columns: Vec<ColumnSpec>,
    },
    AlterTable {
        table: String,
        changes: Vec<TableAlteration>,
    },
}

impl StructuralChange {
    pub fn create_map_index_table(table: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        StructuralChange::CreateTable {
            table: table.into(),
            kind: TableKind::MapIndex,
            columns,
        }
    }

    pub fn add_column(table: impl Into<String>, column: ColumnSpec) -> Self {
        StructuralChange::AlterTable {
            table: table.into(),
            changes: vec![TableAlteration::AddColumn(column)],
        }
    }

    pub fn create_index(table: impl Into<String>, name: impl Into<String>, columns: &[&str]) -> Self {
        let name = name.into();
        StructuralChange::AlterTable {
            table: table.into(),
            changes: vec![TableAlteration::CreateIndex(IndexSpec::new(name, columns))],
        }
    }

    pub fn table(&self) -> &str {
        match self {
            StructuralChange::CreateTable { table, .. } | StructuralChange::AlterTable { table, .. } => table,
        }
    }
}

/// Full shape of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl TableSchema {
    /// Build the shape a `CreateTable` intent produces, implicit columns included
    pub fn from_declaration(name: impl Into<String>, kind: TableKind, declared: &[ColumnSpec]) -> Self {
        let mut columns = Vec::with_capacity(declared.len() + 2);
        if kind == TableKind::MapIndex {
            columns.push(ColumnSpec::big_int(ID_COLUMN));
            columns.push(ColumnSpec::big_int(DOCUMENT_ID_COLUMN));
        }
        columns.extend(declared.iter().cloned());
        Self {
            name: name.into(),
            kind,
            columns,
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Same kind and same column set, irrespective of column order
    fn same_columns(&self, other: &TableSchema) -> bool {
        self.kind == other.kind
            && self.columns.len() == other.columns.len()
            && other.columns.iter().all(|c| self.column(&c.name) == Some(c))
    }
}

/// A structural change target exists with an incompatible shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{object} on table '{table}': {reason}")]
pub struct SchemaConflict {
    pub table: String,
    pub object: String,
    pub reason: String,
}

impl SchemaConflict {
    pub fn new(table: &str, object: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            object: object.into(),
            reason: reason.into(),
        }
    }
}

/// A single resolved schema operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOp {
    CreateTable(TableSchema),
    AddColumn { table: String, column: ColumnSpec },
    CreateIndex { table: String, index: IndexSpec },
}

impl std::fmt::Display for SchemaOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaOp::CreateTable(schema) => write!(f, "table {}", schema.name),
            SchemaOp::AddColumn { table, column } => write!(f, "column {}.{}", table, column.name),
            SchemaOp::CreateIndex { table, index } => write!(f, "index {} on {}", index.name, table),
        }
    }
}

/// Result of resolving one operation against the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The object did not exist and must be (or was) created
    Applied(SchemaOp),
    /// An equivalent object already exists
    Unchanged(SchemaOp),
}

impl ChangeOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ChangeOutcome::Applied(_))
    }

    pub fn op(&self) -> &SchemaOp {
        match self {
            ChangeOutcome::Applied(op) | ChangeOutcome::Unchanged(op) => op,
        }
    }
}

/// Catalog of every table and index known to a backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Register a table shape recovered from a live backend
    pub fn insert_table(&mut self, schema: TableSchema) {
        self.tables.insert(schema.name.clone(), schema);
    }

    /// Resolve a change; the catalog is only modified when every part succeeds
    pub fn apply(&mut self, change: &StructuralChange) -> Result<Vec<ChangeOutcome>, SchemaConflict> {
        let mut working = self.clone();
        let outcomes = match change {
            StructuralChange::CreateTable { table, kind, columns } => {
                vec![working.create_table(table, *kind, columns)?]
            }
            StructuralChange::AlterTable { table, changes } => {
                let mut outcomes = Vec::with_capacity(changes.len());
                for alteration in changes {
                    let outcome = match alteration {
                        TableAlteration::AddColumn(column) => working.add_column(table, column)?,
                        TableAlteration::CreateIndex(index) => working.create_index(table, index)?,
                    };
                    outcomes.push(outcome);
                }
                outcomes
            }
        };
        *self = working;
        Ok(outcomes)
    }

    fn create_table(
        &mut self,
        table: &str,
        kind: TableKind,
        columns: &[ColumnSpec],
    ) -> Result<ChangeOutcome, SchemaConflict> {
        check_identifier(table, table)?;
        let mut seen = std::collections::HashSet::new();
        for column in columns {
            check_identifier(table, &column.name)?;
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaConflict::new(
                    table,
                    format!("column '{}'", column.name),
                    "declared more than once",
                ));
            }
            if kind == TableKind::MapIndex && (column.name == ID_COLUMN || column.name == DOCUMENT_ID_COLUMN) {
                return Err(SchemaConflict::new(
                    table,
                    format!("column '{}'", column.name),
                    "reserved by map index tables",
                ));
            }
        }

        let declared = TableSchema::from_declaration(table, kind, columns);
        match self.tables.get(table) {
            Some(existing) if existing.same_columns(&declared) => {
                Ok(ChangeOutcome::Unchanged(SchemaOp::CreateTable(declared)))
            }
            Some(existing) => Err(SchemaConflict::new(
                table,
                "table",
                format!(
                    "exists with {} columns that differ from the {} declared",
                    existing.columns.len(),
                    declared.columns.len()
                ),
            )),
            None => {
                self.tables.insert(table.to_string(), declared.clone());
                Ok(ChangeOutcome::Applied(SchemaOp::CreateTable(declared)))
            }
        }
    }

    fn add_column(&mut self, table: &str, column: &ColumnSpec) -> Result<ChangeOutcome, SchemaConflict> {
        check_identifier(table, &column.name)?;
        let schema = self.tables.get_mut(table).ok_or_else(|| {
            SchemaConflict::new(table, format!("column '{}'", column.name), "table does not exist")
        })?;

        let op = SchemaOp::AddColumn {
            table: table.to_string(),
            column: column.clone(),
        };
        match schema.column(&column.name) {
            Some(existing) if existing == column => Ok(ChangeOutcome::Unchanged(op)),
            Some(existing) => Err(SchemaConflict::new(
                table,
                format!("column '{}'", column.name),
                format!("exists as {}, declared as {}", existing.describe(), column.describe()),
            )),
            None => {
                schema.columns.push(column.clone());
                Ok(ChangeOutcome::Applied(op))
            }
        }
    }

    fn create_index(&mut self, table: &str, index: &IndexSpec) -> Result<ChangeOutcome, SchemaConflict> {
        let object = format!("index '{}'", index.name);
        check_identifier(table, &index.name)?;
        if index.columns.is_empty() {
            return Err(SchemaConflict::new(table, object, "index has no columns"));
        }

        // Index names are global, as in most SQL engines
        if let Some(owner) = self
            .tables
            .values()
            .find(|t| t.name != table && t.index(&index.name).is_some())
        {
            return Err(SchemaConflict::new(
                table,
                object,
                format!("name already used on table '{}'", owner.name),
            ));
        }

        let schema = self
            .tables
            .get_mut(table)
            .ok_or_else(|| SchemaConflict::new(table, object.clone(), "table does not exist"))?;

        if let Some(missing) = index.columns.iter().find(|c| schema.column(c).is_none()) {
            return Err(SchemaConflict::new(
                table,
                object,
                format!("references unknown column '{}'", missing),
            ));
        }

        let op = SchemaOp::CreateIndex {
            table: table.to_string(),
            index: index.clone(),
        };
        match schema.index(&index.name) {
            Some(existing) if existing.columns == index.columns => Ok(ChangeOutcome::Unchanged(op)),
            Some(existing) => Err(SchemaConflict::new(
                table,
                object,
                format!(
                    "exists over ({}), declared over ({})",
                    existing.columns.join(", "),
                    index.columns.join(", ")
                ),
            )),
            None => {
                schema.indexes.push(index.clone());
                Ok(ChangeOutcome::Applied(op))
            }
        }
    }
}

fn check_identifier(table: &str, name: &str) -> Result<(), SchemaConflict> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(SchemaConflict::new(table, format!("'{}'", name), "invalid identifier"))
    }
}
