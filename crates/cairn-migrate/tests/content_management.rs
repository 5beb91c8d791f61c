//! Content-management feature against the in-memory backend

mod common;

use std::sync::Arc;

use cairn_core::{
    doc_types, ColumnSpec, ContentItem, ContentTypeSettings, Document, DocumentId, FeatureId, StructuralChange,
    TableKind,
};
use cairn_migrate::content_management::{feature_id, CONTENT_ITEM_INDEX_TABLE};
use cairn_migrate::{
    ContentItemIndexer, DefinitionManager, DocumentRewriter, FailurePolicy, FeatureMigrations, GapReason,
    MigrationContext, MigrationError, MigrationRegistry, MigrationRunner, MigrationStep, StepPlan,
    TypeSettingsTransform,
};
use cairn_storage::{DisplayCache, DocumentStore, IndexStore, MemoryStorage, SchemaBackend, Signal, VersionLedger};
use futures::TryStreamExt;
use serde_json::json;

use common::*;

#[tokio::test]
async fn fresh_install_takes_the_baseline() {
    let storage = Arc::new(MemoryStorage::new());
    let runner = runner(MigrationContext::from_backend(storage.clone()));
    let feature = feature_id().unwrap();

    let report = runner.run_pending_migrations(&feature).await.unwrap();
    assert_eq!(report.from_version, 0);
    assert_eq!(report.to_version, 6);
    assert_eq!(report.applied_steps.len(), 1);
    assert_eq!(report.applied_steps[0].version, 6);

    let table = storage.table_schema(CONTENT_ITEM_INDEX_TABLE).await.unwrap().unwrap();
    assert_eq!(table.kind, TableKind::MapIndex);
    assert_eq!(table.columns.len(), 13);
    assert_eq!(table.indexes.len(), 6);
    assert_eq!(storage.get_applied_version(&feature).await.unwrap(), 6);
}

#[tokio::test]
async fn rerun_is_a_no_op() {
    let storage = Arc::new(MemoryStorage::new());
    let runner = runner(MigrationContext::from_backend(storage.clone()));
    let feature = feature_id().unwrap();

    runner.run_pending_migrations(&feature).await.unwrap();
    let before = storage.table_schema(CONTENT_ITEM_INDEX_TABLE).await.unwrap();

    let report = runner.run_pending_migrations(&feature).await.unwrap();
    assert!(report.applied_steps.is_empty());
    assert_eq!(report.from_version, 6);
    assert_eq!(report.to_version, 6);
    assert_eq!(storage.table_schema(CONTENT_ITEM_INDEX_TABLE).await.unwrap(), before);
}

#[tokio::test]
async fn legacy_install_walks_every_upgrade() {
    let storage = Arc::new(MemoryStorage::new());
    let feature = feature_id().unwrap();
    storage.apply_change(&legacy_v1_table()).await.unwrap();
    storage.set_applied_version(&feature, 1).await.unwrap();
    seed_legacy_definitions(storage.as_ref()).await;

    let context = MigrationContext::from_backend(storage.clone());
    let report = runner(context.clone()).run_pending_migrations(&feature).await.unwrap();
    let versions: Vec<u32> = report.applied_steps.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![2, 3, 4, 5, 6]);

    let table = storage.table_schema(CONTENT_ITEM_INDEX_TABLE).await.unwrap().unwrap();
    assert!(table.column("ContentItemVersionId").is_some());
    assert!(table.column("DisplayText").unwrap().nullable);
    assert_eq!(table.indexes.len(), 6);

    let definitions = DefinitionManager::new(context.documents.clone());
    let article = definitions.get_type_definition("Article").await.unwrap().unwrap();
    assert_eq!(article.settings.get("Theme"), Some(&json!("dark")));
    assert!(article.settings.get("Creatable").is_none());
    let typed: ContentTypeSettings = article.settings_record().unwrap();
    assert!(typed.creatable && typed.draftable);
    assert_eq!(
        article.parts[0].settings["ContentTypePartSettings"]["Position"],
        json!("0")
    );

    let parts = definitions.load_part_definitions().await.unwrap();
    assert_eq!(parts[0].settings["Icon"], json!("pen"));
    assert_eq!(parts[0].settings["ContentPartSettings"]["Attachable"], json!(true));
    assert_eq!(
        parts[0].fields[0].settings["ContentPartFieldSettings"]["Editor"],
        json!("Wysiwyg")
    );
}

#[tokio::test]
async fn rewritten_documents_are_not_saved_twice() {
    let storage = Arc::new(MemoryStorage::new());
    let feature = feature_id().unwrap();
    storage.apply_change(&legacy_v1_table()).await.unwrap();
    for column in [
        ColumnSpec::string("ContentItemVersionId").with_length(26),
        ColumnSpec::string("DisplayText").nullable().with_length(255),
    ] {
        storage
            .apply_change(&StructuralChange::add_column(CONTENT_ITEM_INDEX_TABLE, column))
            .await
            .unwrap();
    }
    storage.set_applied_version(&feature, 3).await.unwrap();
    let ids = seed_legacy_definitions(storage.as_ref()).await;

    let context = MigrationContext::from_backend(storage.clone());
    let report = runner(context.clone()).run_pending_migrations(&feature).await.unwrap();
    let versions: Vec<u32> = report.applied_steps.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![4, 5, 6]);

    let versions: Vec<u64> = storage
        .load_documents_by_type(doc_types::CONTENT_TYPE_DEFINITION)
        .map_ok(|d| d.version)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(versions, vec![2, 2]);

    // Running the settings transform again leaves the documents alone
    let rewriter = DocumentRewriter::new(context.documents.clone());
    let stats = rewriter
        .rewrite(doc_types::CONTENT_TYPE_DEFINITION, &TypeSettingsTransform)
        .await
        .unwrap();
    assert_eq!(stats.rewritten, 0);
    assert_eq!(stats.unchanged, 2);
    assert_eq!(storage.get_document(ids[0]).await.unwrap().unwrap().version, 2);
}

#[tokio::test]
async fn schema_conflict_stops_before_the_ledger_write() {
    let storage = Arc::new(MemoryStorage::new());
    let feature = feature_id().unwrap();
    storage.apply_change(&legacy_v1_table()).await.unwrap();
    storage
        .apply_change(&StructuralChange::add_column(
            CONTENT_ITEM_INDEX_TABLE,
            ColumnSpec::string("ContentItemVersionId").with_length(26),
        ))
        .await
        .unwrap();
    // A DisplayText column someone created by hand with another length
    storage
        .apply_change(&StructuralChange::add_column(
            CONTENT_ITEM_INDEX_TABLE,
            ColumnSpec::string("DisplayText").nullable().with_length(1024),
        ))
        .await
        .unwrap();
    storage.set_applied_version(&feature, 2).await.unwrap();

    let err = runner(MigrationContext::from_backend(storage.clone()))
        .run_pending_migrations(&feature)
        .await
        .unwrap_err();
    match err {
        MigrationError::SchemaConflict { table, object, .. } => {
            assert_eq!(table, CONTENT_ITEM_INDEX_TABLE);
            assert!(object.contains("DisplayText"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(storage.get_applied_version(&feature).await.unwrap(), 2);
}

#[tokio::test]
async fn ledger_ahead_of_registry_is_a_gap() {
    let storage = Arc::new(MemoryStorage::new());
    let feature = feature_id().unwrap();
    storage.set_applied_version(&feature, 9).await.unwrap();

    let err = runner(MigrationContext::from_backend(storage.clone()))
        .run_pending_migrations(&feature)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrationError::MigrationSequenceGap {
            current: 9,
            reason: GapReason::Ahead { latest: 6 },
            ..
        }
    ));
    assert_eq!(storage.get_applied_version(&feature).await.unwrap(), 9);
}

#[tokio::test]
async fn ledger_never_moves_backwards() {
    let storage = Arc::new(MemoryStorage::new());
    let feature = feature_id().unwrap();
    let runner = runner(MigrationContext::from_backend(storage.clone()));
    runner.run_pending_migrations(&feature).await.unwrap();

    assert!(storage.set_applied_version(&feature, 2).await.is_err());
    let versions = storage.list_versions().await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].applied_version, 6);
}

#[tokio::test]
async fn run_all_honors_the_failure_policy() {
    let storage = Arc::new(MemoryStorage::new());
    let broken = FeatureId::new("Broken").unwrap();
    storage.set_applied_version(&broken, 1).await.unwrap();

    let registry = || {
        let mut registry = MigrationRegistry::new();
        registry
            .register(
                FeatureMigrations::new(broken.clone())
                    .with_upgrade(MigrationStep::new(1, "first", StepPlan::new()))
                    .with_upgrade(MigrationStep::new(3, "third", StepPlan::new())),
            )
            .unwrap();
        cairn_migrate::content_management::register(&mut registry).unwrap();
        registry
    };

    let context = MigrationContext::from_backend(storage.clone());
    let fail_fast = MigrationRunner::new(context.clone(), registry())
        .run_all(FailurePolicy::FailFast)
        .await;
    assert_eq!(fail_fast.len(), 1);
    assert!(fail_fast[0].result.is_err());

    let outcomes = MigrationRunner::new(context, registry())
        .run_all(FailurePolicy::Continue)
        .await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].result.is_err());
    assert_eq!(outcomes[1].result.as_ref().unwrap().to_version, 6);
}

#[tokio::test]
async fn rebuild_keeps_one_latest_and_one_published_row_per_item() {
    let storage = Arc::new(MemoryStorage::new());
    let context = MigrationContext::from_backend(storage.clone());
    runner(context.clone())
        .run_pending_migrations(&feature_id().unwrap())
        .await
        .unwrap();

    let mut first = ContentItem::new("Article").with_display_text("Hello").with_owner("admin");
    first.publish();
    let mut second = first.new_version();
    second.display_text = Some("Hello again".into());
    second.modified_utc = first.modified_utc.map(|t| t + chrono::Duration::minutes(1));
    // Both versions claim to be latest, as after an interrupted save
    let first_id = insert_item(storage.as_ref(), &first).await;
    let second_id = insert_item(storage.as_ref(), &second).await;

    let mut other = ContentItem::new("Page").with_display_text("x".repeat(300));
    other.publish();
    insert_item(storage.as_ref(), &other).await;

    let indexer = ContentItemIndexer::new(&context);
    let stats = indexer.rebuild().await.unwrap();
    assert_eq!(stats.documents, 3);
    assert_eq!(stats.rows, 3);
    assert_eq!(stats.demoted_latest, 1);
    assert_eq!(stats.demoted_published, 0);

    let older = indexer.rows_for_document(first_id).await.unwrap();
    assert_eq!(older.len(), 1);
    assert!(!older[0].latest);
    assert!(older[0].published);

    let newer = indexer.rows_for_document(second_id).await.unwrap();
    assert!(newer[0].latest);
    assert!(!newer[0].published);
    assert_eq!(newer[0].display_text.as_deref(), Some("Hello again"));

    // Rebuilding twice yields the same rows
    indexer.rebuild().await.unwrap();
    assert_eq!(indexer.rows_for_document(second_id).await.unwrap(), newer);

    let rows = storage
        .index_rows_for_document(CONTENT_ITEM_INDEX_TABLE, DocumentId(3))
        .await
        .unwrap();
    assert_eq!(rows[0].values["DisplayText"].as_str().map(|s| s.chars().count()), Some(255));

    let ignored = Document::new("Other", json!({}));
    storage.insert_document(&ignored).await.unwrap();
    assert_eq!(indexer.rebuild().await.unwrap().documents, 3);
}

#[tokio::test]
async fn rebuild_invalidates_cached_displays() {
    let storage = Arc::new(MemoryStorage::new());
    let context = MigrationContext::from_backend(storage.clone());
    runner(context.clone())
        .run_pending_migrations(&feature_id().unwrap())
        .await
        .unwrap();

    let item = ContentItem::new("Article").with_display_text("Hello");
    insert_item(storage.as_ref(), &item).await;

    let signal = Arc::new(Signal::new());
    let displays: DisplayCache<String> = DisplayCache::new(signal.clone());
    displays.insert(&item.content_item_id, "stale".to_string());
    displays.insert("untouched", "kept".to_string());

    ContentItemIndexer::new(&context).with_signal(signal).rebuild().await.unwrap();
    assert_eq!(displays.get(&item.content_item_id), None);
    assert_eq!(displays.get("untouched").as_deref(), Some("kept"));
}

#[tokio::test]
async fn rebuild_rejects_ids_longer_than_the_column() {
    let storage = Arc::new(MemoryStorage::new());
    let context = MigrationContext::from_backend(storage.clone());
    runner(context.clone())
        .run_pending_migrations(&feature_id().unwrap())
        .await
        .unwrap();

    let valid = ContentItem::new("Article").with_display_text("Fine");
    let valid_id = insert_item(storage.as_ref(), &valid).await;
    let indexer = ContentItemIndexer::new(&context);
    indexer.rebuild().await.unwrap();

    let mut guid = ContentItem::new("Article");
    guid.content_item_id = "3f2504e0-4f89-11d3-9a0c-0305e82c3301".to_string();
    let guid_id = insert_item(storage.as_ref(), &guid).await;

    match indexer.rebuild().await.unwrap_err() {
        MigrationError::DocumentRewriteFailed { type_id, document_key, cause } => {
            assert_eq!(type_id, doc_types::CONTENT_ITEM);
            assert_eq!(document_key, format!("{}/{}", doc_types::CONTENT_ITEM, guid_id));
            assert!(cause.contains("ContentItemId"));
        }
        other => panic!("unexpected error: {}", other),
    }

    // Rows from the last good rebuild are left in place
    let rows = indexer.rows_for_document(valid_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content_item_id, valid.content_item_id);
    assert!(indexer.rows_for_document(guid_id).await.unwrap().is_empty());
}
