//! Checks shared by every backend

use cairn_core::schema::{DOCUMENT_ID_COLUMN, ID_COLUMN};
use cairn_core::{ColumnType, FeatureId, IndexRow, TableKind, TableSchema};
use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// Reject rows that do not fit the table's declared shape
pub fn validate_row(schema: &TableSchema, row: &IndexRow) -> StorageResult<()> {
    let invalid = |reason: String| StorageError::InvalidRow {
        table: schema.name.clone(),
        reason,
    };

    if schema.kind != TableKind::MapIndex {
        return Err(invalid("rows can only be written to map index tables".to_string()));
    }

    for key in row.values.keys() {
        if key == ID_COLUMN || key == DOCUMENT_ID_COLUMN || schema.column(key).is_none() {
            return Err(invalid(format!("unknown column '{}'", key)));
        }
    }

    for column in schema
        .columns
        .iter()
        .filter(|c| c.name != ID_COLUMN && c.name != DOCUMENT_ID_COLUMN)
    {
        let value = row.values.get(&column.name).unwrap_or(&Value::Null);
        if value.is_null() {
            if !column.nullable {
                return Err(invalid(format!("column '{}' is not nullable", column.name)));
            }
            continue;
        }

        let type_ok = match column.column_type {
            ColumnType::Bool => value.is_boolean(),
            ColumnType::Int | ColumnType::BigInt => value.is_i64() || value.is_u64(),
            ColumnType::String | ColumnType::Text | ColumnType::DateTime => value.is_string(),
        };
        if !type_ok {
            return Err(invalid(format!(
                "column '{}' expects {}, got {}",
                column.name, column.column_type, value
            )));
        }

        if let (Some(max), Some(text)) = (column.max_length, value.as_str()) {
            if text.chars().count() > max as usize {
                return Err(invalid(format!("column '{}' exceeds length {}", column.name, max)));
            }
        }
    }

    Ok(())
}

/// Ledger writes may only move forward
pub fn check_forward(feature: &FeatureId, current: u32, requested: u32) -> StorageResult<()> {
    if requested < current {
        return Err(StorageError::LedgerRegression {
            feature: feature.to_string(),
            current,
            requested,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{ColumnSpec, DocumentId};
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::from_declaration(
            "ItemIndex",
            TableKind::MapIndex,
            &[
                ColumnSpec::string("ItemId").with_length(4),
                ColumnSpec::bool("Latest"),
                ColumnSpec::string("Owner").nullable(),
            ],
        )
    }

    fn row(values: Value) -> IndexRow {
        IndexRow {
            document_id: DocumentId(1),
            values: values.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_valid_row() {
        assert!(validate_row(&schema(), &row(json!({"ItemId": "abcd", "Latest": true}))).is_ok());
    }

    #[test]
    fn test_invalid_rows() {
        let s = schema();
        assert!(validate_row(&s, &row(json!({"ItemId": "abcde", "Latest": true}))).is_err());
        assert!(validate_row(&s, &row(json!({"ItemId": "abcd"}))).is_err());
        assert!(validate_row(&s, &row(json!({"ItemId": "abcd", "Latest": 1}))).is_err());
        assert!(validate_row(&s, &row(json!({"ItemId": "abcd", "Latest": true, "Nope": 1}))).is_err());
        assert!(validate_row(&s, &row(json!({"ItemId": "abcd", "Latest": true, "DocumentId": 3}))).is_err());
    }

    #[test]
    fn test_check_forward() {
        let feature = FeatureId::new("F").unwrap();
        assert!(check_forward(&feature, 3, 3).is_ok());
        assert!(check_forward(&feature, 3, 4).is_ok());
        assert!(matches!(
            check_forward(&feature, 3, 2),
            Err(StorageError::LedgerRegression { current: 3, requested: 2, .. })
        ));
    }
}
