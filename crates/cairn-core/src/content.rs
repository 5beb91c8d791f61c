//! Content items and their index projection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::document::DocumentId;
use crate::limits::{
    truncate_chars, MAX_AUTHOR_SIZE, MAX_CONTENT_TYPE_SIZE, MAX_DISPLAY_TEXT_SIZE, MAX_OWNER_SIZE,
};

/// One version of a content item, stored as its own document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentItem {
    pub content_item_id: String,
    pub content_item_version_id: String,
    pub content_type: String,
    #[serde(default)]
    pub latest: bool,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub display_text: Option<String>,
    #[serde(default)]
    pub modified_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_utc: Option<DateTime<Utc>>,
    /// Part and field data, opaque to the index
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl ContentItem {
    /// A new draft that is the latest version of a new item
    pub fn new(content_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            content_item_id: Ulid::new().to_string(),
            content_item_version_id: Ulid::new().to_string(),
            content_type: content_type.into(),
            latest: true,
            published: false,
            owner: None,
            author: None,
            display_text: None,
            modified_utc: Some(now),
            published_utc: None,
            created_utc: Some(now),
            data: serde_json::Map::new(),
        }
    }

    pub fn with_display_text(mut self, text: impl Into<String>) -> Self {
        self.display_text = Some(text.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        self.author = Some(owner.clone());
        self.owner = Some(owner);
        self
    }

    /// The next version of this item; the caller clears `latest` on `self`
    pub fn new_version(&self) -> Self {
        let mut next = self.clone();
        next.content_item_version_id = Ulid::new().to_string();
        next.latest = true;
        next.published = false;
        next.modified_utc = Some(Utc::now());
        next
    }

    pub fn publish(&mut self) {
        let now = Utc::now();
        self.published = true;
        self.published_utc = Some(now);
        self.modified_utc = Some(now);
    }
}

/// Row of the `ContentItemIndex` map index table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentItemIndex {
    pub document_id: DocumentId,
    pub content_item_id: String,
    pub content_item_version_id: String,
    pub latest: bool,
    pub published: bool,
    pub content_type: String,
    pub modified_utc: Option<DateTime<Utc>>,
    pub published_utc: Option<DateTime<Utc>>,
    pub created_utc: Option<DateTime<Utc>>,
    pub owner: Option<String>,
    pub author: Option<String>,
    pub display_text: Option<String>,
}

impl ContentItemIndex {
    /// Project an item, truncating bounded columns
    pub fn from_item(document_id: DocumentId, item: &ContentItem) -> Self {
        Self {
            document_id,
            content_item_id: item.content_item_id.clone(),
            content_item_version_id: item.content_item_version_id.clone(),
            latest: item.latest,
            published: item.published,
            content_type: truncate_chars(&item.content_type, MAX_CONTENT_TYPE_SIZE),
            modified_utc: item.modified_utc,
            published_utc: item.published_utc,
            created_utc: item.created_utc,
            owner: item.owner.as_deref().map(|s| truncate_chars(s, MAX_OWNER_SIZE)),
            author: item.author.as_deref().map(|s| truncate_chars(s, MAX_AUTHOR_SIZE)),
            display_text: item
                .display_text
                .as_deref()
                .map(|s| truncate_chars(s, MAX_DISPLAY_TEXT_SIZE)),
        }
    }
}
