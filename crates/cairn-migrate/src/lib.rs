//! Cairn Migrate - Incremental schema and document migration engine
//!
//! Features declare ordered steps; the runner applies the pending ones
//! exactly once per installation, recording each produced version in the
//! ledger before resolving the next.

#![allow(clippy::result_large_err)]

pub mod content_management;
pub mod definitions;
pub mod error;
pub mod executor;
pub mod projection;
pub mod registry;
pub mod rewriter;
pub mod runner;

pub use content_management::{ContentItemIndexer, IndexRebuildStats};
pub use definitions::DefinitionManager;
pub use error::{GapReason, MigrationError, MigrationResult};
pub use executor::{SchemaChangeExecutor, SchemaStats};
pub use projection::{PartSettingsTransform, TypeSettingsTransform};
pub use registry::{FeatureMigrations, MigrationRegistry, MigrationStep, StepPlan};
pub use rewriter::{DocumentRewriter, DocumentTransform, RewriteStats};
pub use runner::{AppliedStep, FailurePolicy, FeatureOutcome, MigrationContext, MigrationRunner, RunReport};

/// Registry with every built-in feature
pub fn default_registry() -> MigrationResult<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    content_management::register(&mut registry)?;
    Ok(registry)
}
