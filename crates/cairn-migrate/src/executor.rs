//! Structural changes against a schema backend

use std::sync::Arc;

use cairn_core::{ChangeOutcome, StructuralChange};
use cairn_storage::SchemaBackend;
use serde::Serialize;

use crate::error::{MigrationError, MigrationResult};

/// Counts of schema objects created versus already present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchemaStats {
    pub applied: usize,
    pub unchanged: usize,
}

/// Applies structural changes in declaration order
#[derive(Clone)]
pub struct SchemaChangeExecutor {
    backend: Arc<dyn SchemaBackend>,
}

impl SchemaChangeExecutor {
    pub fn new(backend: Arc<dyn SchemaBackend>) -> Self {
        Self { backend }
    }

    pub async fn execute(&self, changes: &[StructuralChange]) -> MigrationResult<SchemaStats> {
        let mut stats = SchemaStats::default();

        for change in changes {
            let outcomes = self
                .backend
                .apply_change(change)
                .await
                .map_err(MigrationError::from_storage)?;

            for outcome in outcomes {
                match outcome {
                    ChangeOutcome::Applied(op) => {
                        tracing::debug!("Applied {}", op);
                        stats.applied += 1;
                    }
                    ChangeOutcome::Unchanged(op) => {
                        tracing::debug!("Unchanged {}", op);
                        stats.unchanged += 1;
                    }
                }
            }
        }

        Ok(stats)
    }
}
