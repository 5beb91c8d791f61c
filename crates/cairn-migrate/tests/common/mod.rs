//! Fixtures shared by the integration tests

#![allow(dead_code)]

use cairn_core::limits::{CONTENT_ITEM_ID_LENGTH, MAX_AUTHOR_SIZE, MAX_CONTENT_TYPE_SIZE, MAX_OWNER_SIZE};
use cairn_core::{doc_types, ColumnSpec, ContentItem, Document, DocumentId, StructuralChange};
use cairn_migrate::content_management::{self, CONTENT_ITEM_INDEX_TABLE};
use cairn_migrate::{MigrationContext, MigrationRegistry, MigrationRunner};
use cairn_storage::DocumentStore;
use serde_json::{json, Value};

/// `ContentItemIndex` as the first released version created it
pub fn legacy_v1_table() -> StructuralChange {
    StructuralChange::create_map_index_table(
        CONTENT_ITEM_INDEX_TABLE,
        vec![
            ColumnSpec::string("ContentItemId").with_length(CONTENT_ITEM_ID_LENGTH),
            ColumnSpec::bool("Latest"),
            ColumnSpec::bool("Published"),
            ColumnSpec::string("ContentType").with_length(MAX_CONTENT_TYPE_SIZE),
            ColumnSpec::datetime("ModifiedUtc").nullable(),
            ColumnSpec::datetime("PublishedUtc").nullable(),
            ColumnSpec::datetime("CreatedUtc").nullable(),
            ColumnSpec::string("Owner").nullable().with_length(MAX_OWNER_SIZE),
            ColumnSpec::string("Author").nullable().with_length(MAX_AUTHOR_SIZE),
        ],
    )
}

pub fn legacy_type_definition(name: &str) -> Value {
    json!({
        "Name": name,
        "DisplayName": name,
        "Settings": { "Creatable": true, "Draftable": true, "Theme": "dark" },
        "Parts": [
            { "Name": "TitlePart", "PartName": "TitlePart", "Settings": { "Position": "0", "Custom": 1 } }
        ]
    })
}

pub fn legacy_part_definition(name: &str) -> Value {
    json!({
        "Name": name,
        "Settings": { "Attachable": true, "Reusable": false, "Icon": "pen" },
        "Fields": [
            { "Name": "Body", "FieldName": "TextField", "Settings": { "Editor": "Wysiwyg" } }
        ]
    })
}

pub async fn seed_legacy_definitions(store: &dyn DocumentStore) -> Vec<DocumentId> {
    let mut ids = Vec::new();
    for name in ["Article", "BlogPost"] {
        let doc = Document::new(doc_types::CONTENT_TYPE_DEFINITION, legacy_type_definition(name));
        ids.push(store.insert_document(&doc).await.unwrap());
    }
    let doc = Document::new(doc_types::CONTENT_PART_DEFINITION, legacy_part_definition("BodyPart"));
    ids.push(store.insert_document(&doc).await.unwrap());
    ids
}

pub async fn insert_item(store: &dyn DocumentStore, item: &ContentItem) -> DocumentId {
    let doc = Document::from_model(doc_types::CONTENT_ITEM, item).unwrap();
    store.insert_document(&doc).await.unwrap()
}

pub fn runner(context: MigrationContext) -> MigrationRunner {
    let mut registry = MigrationRegistry::new();
    content_management::register(&mut registry).unwrap();
    MigrationRunner::new(context, registry)
}
