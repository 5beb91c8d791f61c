//! Length bounds for identifiers and index columns

/// Maximum length for feature ids (128 chars)
pub const MAX_FEATURE_ID_LEN: usize = 128;

/// Maximum length for table, column and index names (128 chars)
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Length of a content item id or version id (ULID text form)
pub const CONTENT_ITEM_ID_LENGTH: u32 = 26;

/// Maximum stored length of `ContentItemIndex.ContentType`
pub const MAX_CONTENT_TYPE_SIZE: u32 = 255;

/// Maximum stored length of `ContentItemIndex.Owner`
pub const MAX_OWNER_SIZE: u32 = 255;

/// Maximum stored length of `ContentItemIndex.Author`
pub const MAX_AUTHOR_SIZE: u32 = 255;

/// Maximum stored length of `ContentItemIndex.DisplayText`
pub const MAX_DISPLAY_TEXT_SIZE: u32 = 255;

/// Truncate to at most `max` characters without splitting a code point
pub fn truncate_chars(value: &str, max: u32) -> String {
    match value.char_indices().nth(max as usize) {
        Some((byte_idx, _)) => value[..byte_idx].to_string(),
        None => value.to_string(),
    }
}

/// Check that a schema identifier is safe to embed in DDL
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("ContentItemIndex"));
        assert!(is_valid_identifier("IDX_ContentItemIndex_DocumentId"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("drop table;"));
        assert!(!is_valid_identifier(""));
    }
}
