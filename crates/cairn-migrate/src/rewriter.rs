//! Streaming document rewrites

use std::sync::Arc;

use cairn_storage::DocumentStore;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;

use crate::error::{MigrationError, MigrationResult};

/// A pure function over the content of one document type
pub trait DocumentTransform: Send + Sync {
    /// Logical type of the documents this transform rewrites
    fn type_id(&self) -> &str;

    /// Produce the new content; returning it unchanged skips the save
    fn transform(&self, content: &Value) -> cairn_core::Result<Value>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Counts from one rewrite pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RewriteStats {
    pub scanned: usize,
    pub rewritten: usize,
    pub unchanged: usize,
}

/// Applies transforms to every document of a type, one commit per document
#[derive(Clone)]
pub struct DocumentRewriter {
    store: Arc<dyn DocumentStore>,
}

impl DocumentRewriter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Rewrite every `type_id` document; documents committed before a failure stay
    pub async fn rewrite(&self, type_id: &str, transform: &dyn DocumentTransform) -> MigrationResult<RewriteStats> {
        let mut stats = RewriteStats::default();
        let mut documents = self.store.load_documents_by_type(type_id);

        while let Some(next) = documents.next().await {
            let mut document = next?;
            stats.scanned += 1;

            let failed = |cause: String| MigrationError::DocumentRewriteFailed {
                type_id: type_id.to_string(),
                document_key: document.key(),
                cause,
            };

            let content = transform.transform(&document.content).map_err(|e| failed(e.to_string()))?;
            if content == document.content {
                stats.unchanged += 1;
                continue;
            }

            let key = document.key();
            document.content = content;
            self.store
                .save_document(&document)
                .await
                .map_err(|e| MigrationError::DocumentRewriteFailed {
                    type_id: type_id.to_string(),
                    document_key: key.clone(),
                    cause: e.to_string(),
                })?;
            tracing::debug!("Rewrote {} with {}", key, transform.name());
            stats.rewritten += 1;
        }

        tracing::info!(
            "Rewrote {} documents: {} scanned, {} rewritten, {} unchanged",
            type_id,
            stats.scanned,
            stats.rewritten,
            stats.unchanged
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::Document;
    use cairn_storage::MemoryStorage;
    use futures::TryStreamExt;
    use serde_json::json;

    struct Uppercase;

    impl DocumentTransform for Uppercase {
        fn type_id(&self) -> &str {
            "Note"
        }

        fn transform(&self, content: &Value) -> cairn_core::Result<Value> {
            match content.get("text").and_then(Value::as_str) {
                Some("boom") => Err(cairn_core::Error::Validation("cannot rewrite".into())),
                Some(text) => Ok(json!({ "text": text.to_uppercase() })),
                None => Ok(content.clone()),
            }
        }
    }

    async fn seed(store: &MemoryStorage, texts: &[&str]) {
        for text in texts {
            store
                .insert_document(&Document::new("Note", json!({ "text": text })))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_rewrite_skips_unchanged() {
        let store = Arc::new(MemoryStorage::new());
        seed(&store, &["a", "B"]).await;
        let rewriter = DocumentRewriter::new(store.clone());

        let stats = rewriter.rewrite("Note", &Uppercase).await.unwrap();
        assert_eq!(
            stats,
            RewriteStats {
                scanned: 2,
                rewritten: 1,
                unchanged: 1
            }
        );

        // Second pass is a no-op
        let stats = rewriter.rewrite("Note", &Uppercase).await.unwrap();
        assert_eq!(stats.rewritten, 0);
        assert_eq!(stats.unchanged, 2);
    }

    #[tokio::test]
    async fn test_first_failure_stops_the_pass() {
        let store = Arc::new(MemoryStorage::new());
        seed(&store, &["a", "boom", "c"]).await;
        let rewriter = DocumentRewriter::new(store.clone());

        let err = rewriter.rewrite("Note", &Uppercase).await.unwrap_err();
        match err {
            MigrationError::DocumentRewriteFailed { type_id, document_key, .. } => {
                assert_eq!(type_id, "Note");
                assert_eq!(document_key, "Note/2");
            }
            other => panic!("unexpected error: {}", other),
        }

        // The document before the failure was committed, the one after was not
        let texts: Vec<String> = store
            .load_documents_by_type("Note")
            .map_ok(|d| d.content["text"].as_str().unwrap_or_default().to_string())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(texts, vec!["A", "boom", "c"]);
    }
}
