//! Stored documents and index rows

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::schema::DOCUMENT_ID_COLUMN;

/// Logical document types used by the content-management feature
pub mod doc_types {
    pub const CONTENT_TYPE_DEFINITION: &str = "ContentTypeDefinition";
    pub const CONTENT_PART_DEFINITION: &str = "ContentPartDefinition";
    pub const CONTENT_ITEM: &str = "ContentItem";
}

/// Store-assigned document identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A semi-structured document of one logical type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub type_id: String,
    pub content: Value,
    /// Incremented by the store on every save
    #[serde(default)]
    pub version: u64,
}

impl Document {
    /// A document not yet inserted; the store assigns its id
    pub fn new(type_id: impl Into<String>, content: Value) -> Self {
        Self {
            id: DocumentId(0),
            type_id: type_id.into(),
            content,
            version: 0,
        }
    }

    pub fn from_model<T: Serialize>(type_id: impl Into<String>, model: &T) -> Result<Self> {
        Ok(Self::new(type_id, serde_json::to_value(model)?))
    }

    pub fn to_model<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.content.clone())?)
    }

    /// Key used when reporting failures on this document
    pub fn key(&self) -> String {
        format!("{}/{}", self.type_id, self.id)
    }
}

/// One row of a map index table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub document_id: DocumentId,
    /// Column name to value; excludes the implicit `Id` and `DocumentId`
    pub values: serde_json::Map<String, Value>,
}

impl IndexRow {
    /// Serialize a typed row, lifting its `DocumentId` field out of the values
    pub fn from_model<T: Serialize>(document_id: DocumentId, model: &T) -> Result<Self> {
        let mut values = match serde_json::to_value(model)? {
            Value::Object(map) => map,
            other => {
                return Err(crate::Error::Validation(format!(
                    "index row must serialize to an object, got {}",
                    other
                )))
            }
        };
        values.remove(DOCUMENT_ID_COLUMN);
        Ok(Self { document_id, values })
    }

    /// Deserialize into a typed row, re-inserting `DocumentId`
    pub fn to_model<T: DeserializeOwned>(&self) -> Result<T> {
        let mut values = self.values.clone();
        values.insert(DOCUMENT_ID_COLUMN.to_string(), Value::from(self.document_id.0));
        Ok(serde_json::from_value(Value::Object(values))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Row {
        document_id: DocumentId,
        name: String,
    }

    #[test]
    fn test_index_row_lifts_document_id() {
        let row = IndexRow::from_model(DocumentId(9), &Row { document_id: DocumentId(9), name: "a".into() }).unwrap();
        assert!(!row.values.contains_key("DocumentId"));
        assert_eq!(row.values["Name"], json!("a"));

        let back: Row = row.to_model().unwrap();
        assert_eq!(back.document_id, DocumentId(9));
    }

    #[test]
    fn test_document_key() {
        let mut doc = Document::new(doc_types::CONTENT_ITEM, json!({}));
        doc.id = DocumentId(42);
        assert_eq!(doc.key(), "ContentItem/42");
    }
}
