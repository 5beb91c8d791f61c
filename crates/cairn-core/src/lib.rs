//! Cairn Core - Data model for the migration engine
//!
//! This crate provides the types shared by the storage backends and the
//! migration engine: feature ledger entries, structural change intents and
//! the schema catalog, settings mappings, content definitions and content
//! items.

pub mod content;
pub mod definition;
pub mod document;
pub mod error;
pub mod feature;
pub mod limits;
pub mod schema;
pub mod settings;

pub use content::{ContentItem, ContentItemIndex};
pub use definition::{
    ContentPartDefinition, ContentPartDefinitionBuilder, ContentPartFieldBuilder, ContentPartFieldDefinition,
    ContentPartFieldSettings, ContentPartSettings, ContentTypeDefinition, ContentTypeDefinitionBuilder,
    ContentTypePartBuilder, ContentTypePartDefinition, ContentTypePartSettings, ContentTypeSettings,
};
pub use document::{doc_types, Document, DocumentId, IndexRow};
pub use error::{Error, Result};
pub use feature::{FeatureId, FeatureVersion};
pub use schema::{
    ChangeOutcome, ColumnSpec, ColumnType, IndexSpec, SchemaCatalog, SchemaConflict, SchemaOp, StructuralChange,
    TableAlteration, TableKind, TableSchema,
};
pub use settings::{SettingsMap, SettingsRecord};
