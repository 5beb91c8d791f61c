//! The content-management feature
//!
//! Owns the `ContentItemIndex` map index table and the settings layout of
//! content definitions. Fresh installs take the baseline straight to version
//! 6; older installs walk the historical upgrades one by one.

use std::collections::HashMap;
use std::sync::Arc;

use cairn_core::limits::{
    CONTENT_ITEM_ID_LENGTH, MAX_AUTHOR_SIZE, MAX_CONTENT_TYPE_SIZE, MAX_DISPLAY_TEXT_SIZE, MAX_OWNER_SIZE,
};
use cairn_core::{doc_types, ColumnSpec, ContentItem, ContentItemIndex, DocumentId, FeatureId, IndexRow, StructuralChange};
use cairn_storage::{cache, DocumentStore, IndexStore, SchemaBackend, Signal, StorageError};
use futures::StreamExt;
use serde::Serialize;

use crate::error::{MigrationError, MigrationResult};
use crate::projection::{PartSettingsTransform, TypeSettingsTransform};
use crate::registry::{FeatureMigrations, MigrationRegistry, MigrationStep, StepPlan};
use crate::runner::MigrationContext;

pub const FEATURE_ID: &str = "ContentManagement";

pub const CONTENT_ITEM_INDEX_TABLE: &str = "ContentItemIndex";

pub fn feature_id() -> MigrationResult<FeatureId> {
    Ok(FeatureId::new(FEATURE_ID)?)
}

/// Columns of `ContentItemIndex` besides the implicit `Id` and `DocumentId`
pub fn content_item_index_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::string("ContentItemId").with_length(CONTENT_ITEM_ID_LENGTH),
        ColumnSpec::string("ContentItemVersionId").with_length(CONTENT_ITEM_ID_LENGTH),
        ColumnSpec::bool("Latest"),
        ColumnSpec::bool("Published"),
        ColumnSpec::string("ContentType").with_length(MAX_CONTENT_TYPE_SIZE),
        ColumnSpec::datetime("ModifiedUtc").nullable(),
        ColumnSpec::datetime("PublishedUtc").nullable(),
        ColumnSpec::datetime("CreatedUtc").nullable(),
        ColumnSpec::string("Owner").nullable().with_length(MAX_OWNER_SIZE),
        ColumnSpec::string("Author").nullable().with_length(MAX_AUTHOR_SIZE),
        ColumnSpec::string("DisplayText").nullable().with_length(MAX_DISPLAY_TEXT_SIZE),
    ]
}

/// The six lookup indexes over `ContentItemIndex`
pub fn content_item_indexes() -> Vec<StructuralChange> {
    let index = |name: &str, columns: &[&str]| StructuralChange::create_index(CONTENT_ITEM_INDEX_TABLE, name, columns);
    vec![
        index(
            "IDX_ContentItemIndex_DocumentId",
            &["DocumentId", "ContentItemId", "ContentItemVersionId", "Published", "Latest"],
        ),
        index(
            "IDX_ContentItemIndex_DocumentId_ContentType",
            &[
                "DocumentId",
                "ContentType",
                "CreatedUtc",
                "ModifiedUtc",
                "PublishedUtc",
                "Published",
                "Latest",
            ],
        ),
        index(
            "IDX_ContentItemIndex_DocumentId_Owner",
            &["DocumentId", "Owner", "Published", "Latest"],
        ),
        index(
            "IDX_ContentItemIndex_DocumentId_Author",
            &["DocumentId", "Author", "Published", "Latest"],
        ),
        index(
            "IDX_ContentItemIndex_DocumentId_DisplayText",
            &["DocumentId", "DisplayText", "Published", "Latest"],
        ),
        index(
            "IDX_ContentItemIndex_DocumentId_Published",
            &["DocumentId", "ContentItemId", "Published", "Latest"],
        ),
    ]
}

/// Every step of the feature
pub fn migrations() -> MigrationResult<FeatureMigrations> {
    let mut baseline = StepPlan::new().with_change(StructuralChange::create_map_index_table(
        CONTENT_ITEM_INDEX_TABLE,
        content_item_index_columns(),
    ));
    for change in content_item_indexes() {
        baseline = baseline.with_change(change);
    }

    let mut indexes = StepPlan::new();
    for change in content_item_indexes() {
        indexes = indexes.with_change(change);
    }

    Ok(FeatureMigrations::new(feature_id()?)
        .with_baseline(MigrationStep::new(6, "create content item index", baseline))
        .with_upgrade(MigrationStep::new(
            2,
            "add ContentItemVersionId",
            StepPlan::new().with_change(StructuralChange::add_column(
                CONTENT_ITEM_INDEX_TABLE,
                ColumnSpec::string("ContentItemVersionId").with_length(CONTENT_ITEM_ID_LENGTH),
            )),
        ))
        .with_upgrade(MigrationStep::new(
            3,
            "add DisplayText",
            StepPlan::new().with_change(StructuralChange::add_column(
                CONTENT_ITEM_INDEX_TABLE,
                ColumnSpec::string("DisplayText")
                    .nullable()
                    .with_length(MAX_DISPLAY_TEXT_SIZE),
            )),
        ))
        .with_upgrade(MigrationStep::new(
            4,
            "move content type settings into sections",
            StepPlan::new().with_transform(Arc::new(TypeSettingsTransform)),
        ))
        .with_upgrade(MigrationStep::new(
            5,
            "move content part settings into sections",
            StepPlan::new().with_transform(Arc::new(PartSettingsTransform)),
        ))
        .with_upgrade(MigrationStep::new(6, "create content item indexes", indexes)))
}

pub fn register(registry: &mut MigrationRegistry) -> MigrationResult<()> {
    registry.register(migrations()?)
}

/// Counts from one index rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexRebuildStats {
    pub documents: usize,
    pub rows: usize,
    /// Versions stored as latest that lost to a newer one
    pub demoted_latest: usize,
    /// Versions stored as published that lost to a newer one
    pub demoted_published: usize,
}

/// Derives `ContentItemIndex` rows from `ContentItem` documents
#[derive(Clone)]
pub struct ContentItemIndexer {
    schema: Arc<dyn SchemaBackend>,
    documents: Arc<dyn DocumentStore>,
    indexes: Arc<dyn IndexStore>,
    signal: Option<Arc<Signal>>,
}

impl ContentItemIndexer {
    pub fn new(context: &MigrationContext) -> Self {
        Self {
            schema: context.schema.clone(),
            documents: context.documents.clone(),
            indexes: context.indexes.clone(),
            signal: None,
        }
    }

    /// Raise each rebuilt item's display signal on `signal`
    pub fn with_signal(mut self, signal: Arc<Signal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Replace every row of the table with rows projected from the documents
    ///
    /// Each item keeps at most one latest and one published row; ties go to the
    /// newest `ModifiedUtc`, then to the greatest version id.
    pub async fn rebuild(&self) -> MigrationResult<IndexRebuildStats> {
        let table = self
            .schema
            .table_schema(CONTENT_ITEM_INDEX_TABLE)
            .await?
            .ok_or_else(|| StorageError::UnknownTable(CONTENT_ITEM_INDEX_TABLE.to_string()))?;

        let mut stats = IndexRebuildStats::default();
        let mut by_item: HashMap<String, Vec<ContentItemIndex>> = HashMap::new();

        let mut documents = self.documents.load_documents_by_type(doc_types::CONTENT_ITEM);
        while let Some(next) = documents.next().await {
            let document = next?;
            let item: ContentItem = document.to_model().map_err(|e| MigrationError::DocumentRewriteFailed {
                type_id: document.type_id.clone(),
                document_key: document.key(),
                cause: e.to_string(),
            })?;
            if let Some(cause) = oversized_id(&item) {
                return Err(MigrationError::DocumentRewriteFailed {
                    type_id: document.type_id.clone(),
                    document_key: document.key(),
                    cause,
                });
            }
            stats.documents += 1;
            by_item
                .entry(item.content_item_id.clone())
                .or_default()
                .push(ContentItemIndex::from_item(document.id, &item));
        }

        let mut entries: Vec<ContentItemIndex> = Vec::with_capacity(stats.documents);
        let mut item_ids = Vec::with_capacity(by_item.len());
        for (item_id, mut versions) in by_item {
            item_ids.push(item_id);
            stats.demoted_latest += keep_newest(&mut versions, |v| v.latest, |v| v.latest = false);
            stats.demoted_published += keep_newest(&mut versions, |v| v.published, |v| v.published = false);
            entries.extend(versions);
        }
        entries.sort_by_key(|e| e.document_id);

        let mut rows = Vec::with_capacity(entries.len());
        for entry in &entries {
            let mut row = IndexRow::from_model(entry.document_id, entry)?;
            // Older table layouts lack some columns
            row.values.retain(|column, _| table.column(column).is_some());
            rows.push(row);
        }
        stats.rows = rows.len();

        self.indexes.replace_index_rows(CONTENT_ITEM_INDEX_TABLE, &rows).await?;
        if let Some(signal) = &self.signal {
            for item_id in &item_ids {
                signal.signal(&cache::signal_key(item_id));
            }
        }
        tracing::info!(
            "Rebuilt {} from {} documents ({} rows)",
            CONTENT_ITEM_INDEX_TABLE,
            stats.documents,
            stats.rows
        );
        Ok(stats)
    }

    /// Rows recorded for one stored document
    pub async fn rows_for_document(&self, document_id: DocumentId) -> MigrationResult<Vec<ContentItemIndex>> {
        let rows = self
            .indexes
            .index_rows_for_document(CONTENT_ITEM_INDEX_TABLE, document_id)
            .await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(row.to_model()?);
        }
        Ok(entries)
    }
}

/// Ids are never truncated; distinct items would collide
fn oversized_id(item: &ContentItem) -> Option<String> {
    [
        ("ContentItemId", &item.content_item_id),
        ("ContentItemVersionId", &item.content_item_version_id),
    ]
    .into_iter()
    .find(|(_, id)| id.chars().count() > CONTENT_ITEM_ID_LENGTH as usize)
    .map(|(column, id)| format!("{} '{}' exceeds {} characters", column, id, CONTENT_ITEM_ID_LENGTH))
}

/// Clear `flag` on every flagged version but the newest; returns how many were cleared
fn keep_newest(
    versions: &mut [ContentItemIndex],
    flagged: impl Fn(&ContentItemIndex) -> bool,
    clear: impl Fn(&mut ContentItemIndex),
) -> usize {
    let winner = versions
        .iter()
        .enumerate()
        .filter(|(_, v)| flagged(*v))
        .max_by(|(_, a), (_, b)| {
            a.modified_utc
                .cmp(&b.modified_utc)
                .then_with(|| a.content_item_version_id.cmp(&b.content_item_version_id))
        })
        .map(|(idx, _)| idx);

    let mut cleared = 0;
    for (idx, version) in versions.iter_mut().enumerate() {
        if Some(idx) != winner && flagged(&*version) {
            clear(version);
            cleared += 1;
        }
    }
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn version(id: &str, version_id: &str, minutes: i64, latest: bool, published: bool) -> ContentItemIndex {
        let mut item = ContentItem::new("Article");
        item.content_item_id = id.to_string();
        item.content_item_version_id = version_id.to_string();
        item.modified_utc = Some(Utc::now() + Duration::minutes(minutes));
        item.latest = latest;
        item.published = published;
        ContentItemIndex::from_item(DocumentId(minutes as u64), &item)
    }

    #[test]
    fn test_keep_newest_latest() {
        let mut versions = vec![
            version("item", "v1", 1, true, true),
            version("item", "v2", 2, true, false),
            version("item", "v3", 3, false, false),
        ];
        let cleared = keep_newest(&mut versions, |v| v.latest, |v| v.latest = false);
        assert_eq!(cleared, 1);
        assert!(!versions[0].latest);
        assert!(versions[1].latest);
        assert!(versions[0].published);
    }

    #[test]
    fn test_keep_newest_breaks_ties_by_version_id() {
        let mut a = version("item", "v1", 1, true, false);
        let mut b = version("item", "v2", 1, true, false);
        b.modified_utc = a.modified_utc;
        a.document_id = DocumentId(10);
        b.document_id = DocumentId(11);
        let mut versions = vec![b, a];
        keep_newest(&mut versions, |v| v.latest, |v| v.latest = false);
        assert!(versions[0].latest);
        assert_eq!(versions[0].content_item_version_id, "v2");
        assert!(!versions[1].latest);
    }

    #[test]
    fn test_oversized_ids() {
        let mut item = ContentItem::new("Article");
        assert_eq!(oversized_id(&item), None);
        item.content_item_version_id = "3f2504e0-4f89-11d3-9a0c-0305e82c3301".into();
        assert!(oversized_id(&item).unwrap().starts_with("ContentItemVersionId"));
    }

    #[test]
    fn test_feature_declaration() {
        let migrations = migrations().unwrap();
        assert_eq!(migrations.baseline.as_ref().map(|s| s.produces_version), Some(6));
        let versions: Vec<u32> = migrations.upgrades.iter().map(|s| s.produces_version).collect();
        assert_eq!(versions, vec![2, 3, 4, 5, 6]);
        assert_eq!(migrations.latest_version(), 6);
        assert_eq!(content_item_indexes().len(), 6);
    }
}
