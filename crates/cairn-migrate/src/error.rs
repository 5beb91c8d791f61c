//! Migration error types

use cairn_core::SchemaConflict;
use cairn_storage::StorageError;
use thiserror::Error;

/// Result type alias for migration operations
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;

/// Why the registry cannot continue from the ledger's version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapReason {
    /// The next declared step does not start where the ledger stands
    Skipped { next: u32 },
    /// The ledger is ahead of every declared step
    Ahead { latest: u32 },
}

impl std::fmt::Display for GapReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GapReason::Skipped { next } => write!(f, "next declared step produces version {}", next),
            GapReason::Ahead { latest } => write!(f, "latest declared step produces version {}", latest),
        }
    }
}

/// Migration-specific error types
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Schema conflict on {object} of table '{table}': {reason}")]
    SchemaConflict { table: String, object: String, reason: String },

    #[error("Rewriting {document_key} ({type_id}) failed: {cause}")]
    DocumentRewriteFailed {
        type_id: String,
        document_key: String,
        cause: String,
    },

    #[error("No step continues '{feature}' from version {current}: {reason}")]
    MigrationSequenceGap {
        feature: String,
        current: u32,
        reason: GapReason,
    },

    #[error("Recording version {version} for '{feature}' failed: {cause}")]
    LedgerWriteFailed { feature: String, version: u32, cause: String },

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Model error: {0}")]
    Model(#[from] cairn_core::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<SchemaConflict> for MigrationError {
    fn from(conflict: SchemaConflict) -> Self {
        MigrationError::SchemaConflict {
            table: conflict.table,
            object: conflict.object,
            reason: conflict.reason,
        }
    }
}

impl MigrationError {
    /// Lift a storage failure, keeping schema conflicts distinct
    pub fn from_storage(error: StorageError) -> Self {
        match error {
            StorageError::SchemaConflict(conflict) => conflict.into(),
            other => MigrationError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_conflict_is_lifted() {
        let err = MigrationError::from_storage(StorageError::SchemaConflict(SchemaConflict::new(
            "ItemIndex",
            "column 'Owner'",
            "length differs",
        )));
        assert!(matches!(err, MigrationError::SchemaConflict { ref table, .. } if table == "ItemIndex"));

        let err = MigrationError::from_storage(StorageError::UnknownTable("T".into()));
        assert!(matches!(err, MigrationError::Storage(_)));
    }

    #[test]
    fn test_gap_message() {
        let err = MigrationError::MigrationSequenceGap {
            feature: "F".into(),
            current: 2,
            reason: GapReason::Skipped { next: 4 },
        };
        assert_eq!(
            err.to_string(),
            "No step continues 'F' from version 2: next declared step produces version 4"
        );
    }
}
