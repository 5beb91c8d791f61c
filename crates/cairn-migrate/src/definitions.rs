//! Content definitions on top of the document store
//!
//! Host-facing accessor for typed definitions. Migration steps do not go
//! through it: the settings transforms rewrite the raw documents so members
//! unknown to the typed model survive.

use std::sync::Arc;

use cairn_core::{
    doc_types, ContentPartDefinition, ContentPartDefinitionBuilder, ContentTypeDefinition,
    ContentTypeDefinitionBuilder, Document,
};
use cairn_storage::DocumentStore;
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::MigrationResult;

/// Loads and alters type and part definitions stored as documents
#[derive(Clone)]
pub struct DefinitionManager {
    store: Arc<dyn DocumentStore>,
}

impl DefinitionManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn load_type_definitions(&self) -> MigrationResult<Vec<ContentTypeDefinition>> {
        Ok(self
            .load::<ContentTypeDefinition>(doc_types::CONTENT_TYPE_DEFINITION)
            .await?
            .into_iter()
            .map(|(_, definition)| definition)
            .collect())
    }

    pub async fn load_part_definitions(&self) -> MigrationResult<Vec<ContentPartDefinition>> {
        Ok(self
            .load::<ContentPartDefinition>(doc_types::CONTENT_PART_DEFINITION)
            .await?
            .into_iter()
            .map(|(_, definition)| definition)
            .collect())
    }

    pub async fn get_type_definition(&self, name: &str) -> MigrationResult<Option<ContentTypeDefinition>> {
        Ok(self
            .find::<ContentTypeDefinition>(doc_types::CONTENT_TYPE_DEFINITION, |d| d.name == name)
            .await?
            .map(|(_, definition)| definition))
    }

    pub async fn get_part_definition(&self, name: &str) -> MigrationResult<Option<ContentPartDefinition>> {
        Ok(self
            .find::<ContentPartDefinition>(doc_types::CONTENT_PART_DEFINITION, |d| d.name == name)
            .await?
            .map(|(_, definition)| definition))
    }

    /// Alter a type definition through its builder, creating it when absent
    pub async fn alter_type_definition<F>(&self, name: &str, alter: F) -> MigrationResult<ContentTypeDefinition>
    where
        F: FnOnce(ContentTypeDefinitionBuilder) -> cairn_core::Result<ContentTypeDefinitionBuilder>,
    {
        let existing = self
            .find::<ContentTypeDefinition>(doc_types::CONTENT_TYPE_DEFINITION, |d| d.name == name)
            .await?;
        let builder = match &existing {
            Some((_, definition)) => ContentTypeDefinitionBuilder::from_definition(definition.clone()),
            None => ContentTypeDefinitionBuilder::new(name),
        };
        let altered = alter(builder)?.build();

        self.store_definition(
            doc_types::CONTENT_TYPE_DEFINITION,
            existing.map(|(doc, definition)| (doc, definition == altered)),
            &altered,
        )
        .await?;
        Ok(altered)
    }

    /// Alter a part definition through its builder, creating it when absent
    pub async fn alter_part_definition<F>(&self, name: &str, alter: F) -> MigrationResult<ContentPartDefinition>
    where
        F: FnOnce(ContentPartDefinitionBuilder) -> cairn_core::Result<ContentPartDefinitionBuilder>,
    {
        let existing = self
            .find::<ContentPartDefinition>(doc_types::CONTENT_PART_DEFINITION, |d| d.name == name)
            .await?;
        let builder = match &existing {
            Some((_, definition)) => ContentPartDefinitionBuilder::from_definition(definition.clone()),
            None => ContentPartDefinitionBuilder::new(name),
        };
        let altered = alter(builder)?.build();

        self.store_definition(
            doc_types::CONTENT_PART_DEFINITION,
            existing.map(|(doc, definition)| (doc, definition == altered)),
            &altered,
        )
        .await?;
        Ok(altered)
    }

    async fn load<T: DeserializeOwned>(&self, type_id: &str) -> MigrationResult<Vec<(Document, T)>> {
        let documents: Vec<Document> = self.store.load_documents_by_type(type_id).try_collect().await?;
        let mut definitions = Vec::with_capacity(documents.len());
        for document in documents {
            let definition = document.to_model()?;
            definitions.push((document, definition));
        }
        Ok(definitions)
    }

    async fn find<T: DeserializeOwned>(
        &self,
        type_id: &str,
        matches: impl Fn(&T) -> bool,
    ) -> MigrationResult<Option<(Document, T)>> {
        Ok(self.load::<T>(type_id).await?.into_iter().find(|(_, d)| matches(d)))
    }

    /// `existing` carries the stored document and whether the snapshot is unchanged
    async fn store_definition<T: Serialize>(
        &self,
        type_id: &str,
        existing: Option<(Document, bool)>,
        definition: &T,
    ) -> MigrationResult<()> {
        match existing {
            Some((_, true)) => {}
            Some((mut document, false)) => {
                document.content = serde_json::to_value(definition).map_err(cairn_core::Error::from)?;
                self.store.save_document(&document).await?;
                tracing::debug!("Saved {}", document.key());
            }
            None => {
                let id = self.store.insert_document(&Document::from_model(type_id, definition)?).await?;
                tracing::debug!("Created {}/{}", type_id, id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{ContentPartSettings, ContentTypePartSettings, ContentTypeSettings};
    use cairn_storage::MemoryStorage;

    #[tokio::test]
    async fn test_alter_type_definition() {
        let store = Arc::new(MemoryStorage::new());
        let manager = DefinitionManager::new(store.clone());

        manager
            .alter_type_definition("Article", |builder| {
                builder
                    .display_name("News Article")
                    .with_settings(&ContentTypeSettings {
                        creatable: true,
                        ..Default::default()
                    })?
                    .with_part("TitlePart", "TitlePart", |part| {
                        part.with_settings(&ContentTypePartSettings {
                            position: Some("0".into()),
                            ..Default::default()
                        })
                    })
            })
            .await
            .unwrap();

        let loaded = manager.get_type_definition("Article").await.unwrap().unwrap();
        assert_eq!(loaded.display_name, "News Article");
        assert!(loaded.settings_record::<ContentTypeSettings>().unwrap().creatable);
        assert_eq!(loaded.parts.len(), 1);

        // Altering again updates in place
        manager
            .alter_type_definition("Article", |builder| Ok(builder.remove_part("TitlePart")))
            .await
            .unwrap();
        let all = manager.load_type_definitions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].parts.is_empty());
        assert_eq!(store.count_documents(doc_types::CONTENT_TYPE_DEFINITION).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_alteration_is_not_saved() {
        let store = Arc::new(MemoryStorage::new());
        let manager = DefinitionManager::new(store.clone());

        manager
            .alter_part_definition("BodyPart", |builder| {
                builder.with_settings(&ContentPartSettings {
                    attachable: true,
                    ..Default::default()
                })
            })
            .await
            .unwrap();
        manager.alter_part_definition("BodyPart", Ok).await.unwrap();

        let parts = manager.load_part_definitions().await.unwrap();
        assert_eq!(parts.len(), 1);

        let stored = store.get_document(cairn_core::DocumentId(1)).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(manager.get_part_definition("Missing").await.unwrap().is_none());
    }
}
