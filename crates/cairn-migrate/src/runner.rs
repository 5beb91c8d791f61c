//! Migration runner
//!
//! Drives one feature from its recorded version to the latest declared one:
//! read the ledger, resolve the next step, run its structural changes and
//! then its transforms, record the produced version, repeat.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cairn_core::FeatureId;
use cairn_storage::{DocumentStore, IndexStore, SchemaBackend, StorageBackend, VersionLedger};
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, MigrationResult};
use crate::executor::SchemaChangeExecutor;
use crate::registry::{MigrationRegistry, MigrationStep};
use crate::rewriter::DocumentRewriter;

/// Collaborators a runner works against
#[derive(Clone)]
pub struct MigrationContext {
    pub ledger: Arc<dyn VersionLedger>,
    pub schema: Arc<dyn SchemaBackend>,
    pub documents: Arc<dyn DocumentStore>,
    pub indexes: Arc<dyn IndexStore>,
}

impl MigrationContext {
    /// Use one backend for every collaborator
    pub fn from_backend<B: StorageBackend + 'static>(backend: Arc<B>) -> Self {
        Self {
            ledger: backend.clone(),
            schema: backend.clone(),
            documents: backend.clone(),
            indexes: backend,
        }
    }
}

/// What to do with the remaining features after one fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    FailFast,
    Continue,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::FailFast => write!(f, "fail-fast"),
            FailurePolicy::Continue => write!(f, "continue"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail-fast" => Ok(FailurePolicy::FailFast),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(format!("unknown failure policy '{}' (expected fail-fast or continue)", other)),
        }
    }
}

/// A committed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedStep {
    pub version: u32,
    pub description: String,
}

/// Result of draining one feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub feature: FeatureId,
    pub from_version: u32,
    pub to_version: u32,
    pub applied_steps: Vec<AppliedStep>,
    /// Stopped by the cancel flag before reaching the latest version
    pub interrupted: bool,
}

/// Outcome of one feature in [`MigrationRunner::run_all`]
#[derive(Debug)]
pub struct FeatureOutcome {
    pub feature: FeatureId,
    pub result: MigrationResult<RunReport>,
}

enum RunState<'a> {
    Resolving,
    Executing(&'a MigrationStep),
    Committing(&'a MigrationStep),
    Idle,
    Failed(MigrationError),
}

/// Applies pending steps in order, exactly once per installation
pub struct MigrationRunner {
    context: MigrationContext,
    registry: MigrationRegistry,
    executor: SchemaChangeExecutor,
    rewriter: DocumentRewriter,
    cancel: Option<Arc<AtomicBool>>,
}

impl MigrationRunner {
    pub fn new(context: MigrationContext, registry: MigrationRegistry) -> Self {
        Self {
            executor: SchemaChangeExecutor::new(context.schema.clone()),
            rewriter: DocumentRewriter::new(context.documents.clone()),
            context,
            registry,
            cancel: None,
        }
    }

    /// Stop between steps once `flag` is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn context(&self) -> &MigrationContext {
        &self.context
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Run every pending step of `feature`
    pub async fn run_pending_migrations(&self, feature: &FeatureId) -> MigrationResult<RunReport> {
        let from_version = self.context.ledger.get_applied_version(feature).await?;
        let mut report = RunReport {
            feature: feature.clone(),
            from_version,
            to_version: from_version,
            applied_steps: Vec::new(),
            interrupted: false,
        };

        let mut state = RunState::Resolving;
        loop {
            state = match state {
                RunState::Resolving => {
                    if self.cancelled() {
                        tracing::info!("Migration of {} interrupted at version {}", feature, report.to_version);
                        report.interrupted = true;
                        RunState::Idle
                    } else {
                        match self.resolve(feature).await {
                            Ok((current, next)) => {
                                report.to_version = current;
                                match next {
                                    Some(step) => RunState::Executing(step),
                                    None => RunState::Idle,
                                }
                            }
                            Err(e) => RunState::Failed(e),
                        }
                    }
                }
                RunState::Executing(step) => {
                    tracing::info!(
                        "Migrating {} from {} to {}: {}",
                        feature,
                        report.to_version,
                        step.produces_version,
                        step.description
                    );
                    match self.execute_step(step).await {
                        Ok(()) => RunState::Committing(step),
                        Err(e) => RunState::Failed(e),
                    }
                }
                RunState::Committing(step) => {
                    match self
                        .context
                        .ledger
                        .set_applied_version(feature, step.produces_version)
                        .await
                    {
                        Ok(()) => {
                            report.applied_steps.push(AppliedStep {
                                version: step.produces_version,
                                description: step.description.clone(),
                            });
                            RunState::Resolving
                        }
                        Err(e) => RunState::Failed(MigrationError::LedgerWriteFailed {
                            feature: feature.to_string(),
                            version: step.produces_version,
                            cause: e.to_string(),
                        }),
                    }
                }
                RunState::Idle => break,
                RunState::Failed(e) => {
                    tracing::warn!("Migration of {} failed at version {}: {}", feature, report.to_version, e);
                    return Err(e);
                }
            };
        }

        if !report.applied_steps.is_empty() {
            tracing::info!(
                "Migrated {} from {} to {}",
                feature,
                report.from_version,
                report.to_version
            );
        }
        Ok(report)
    }

    /// Run every registered feature in registration order
    pub async fn run_all(&self, policy: FailurePolicy) -> Vec<FeatureOutcome> {
        let mut outcomes = Vec::new();

        for feature in self.registry.features() {
            let result = self.run_pending_migrations(feature).await;
            let failed = result.is_err();
            outcomes.push(FeatureOutcome {
                feature: feature.clone(),
                result,
            });
            if failed && policy == FailurePolicy::FailFast {
                break;
            }
        }

        outcomes
    }

    /// Read the ledger and pick the step that continues from it
    async fn resolve(&self, feature: &FeatureId) -> MigrationResult<(u32, Option<&MigrationStep>)> {
        let current = self.context.ledger.get_applied_version(feature).await?;
        let next = self.registry.next_step(feature, current)?;
        Ok((current, next))
    }

    async fn execute_step(&self, step: &MigrationStep) -> MigrationResult<()> {
        let schema = self.executor.execute(&step.plan.structural).await?;
        if schema.applied + schema.unchanged > 0 {
            tracing::debug!(
                "Step {}: {} schema objects applied, {} unchanged",
                step.produces_version,
                schema.applied,
                schema.unchanged
            );
        }

        for transform in &step.plan.transforms {
            self.rewriter.rewrite(transform.type_id(), transform.as_ref()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FeatureMigrations, StepPlan};
    use cairn_core::{ColumnSpec, StructuralChange};
    use cairn_storage::MemoryStorage;

    fn feature() -> FeatureId {
        FeatureId::new("Tags").unwrap()
    }

    fn registry() -> MigrationRegistry {
        let table = StructuralChange::create_map_index_table("TagIndex", vec![ColumnSpec::string("Tag")]);
        let mut registry = MigrationRegistry::new();
        registry
            .register(
                FeatureMigrations::new(feature())
                    .with_upgrade(MigrationStep::new(1, "create table", StepPlan::new().with_change(table)))
                    .with_upgrade(MigrationStep::new(
                        2,
                        "add weight",
                        StepPlan::new().with_change(StructuralChange::add_column(
                            "TagIndex",
                            ColumnSpec::big_int("Weight").nullable(),
                        )),
                    )),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_runner_drains_pending_steps() {
        let storage = Arc::new(MemoryStorage::new());
        let runner = MigrationRunner::new(MigrationContext::from_backend(storage.clone()), registry());

        let report = runner.run_pending_migrations(&feature()).await.unwrap();
        assert_eq!(report.from_version, 0);
        assert_eq!(report.to_version, 2);
        assert_eq!(report.applied_steps.len(), 2);
        assert!(!report.interrupted);

        let again = runner.run_pending_migrations(&feature()).await.unwrap();
        assert!(again.applied_steps.is_empty());
        assert_eq!(again.to_version, 2);
    }

    #[tokio::test]
    async fn test_cancel_flag_stops_between_steps() {
        let storage = Arc::new(MemoryStorage::new());
        let flag = Arc::new(AtomicBool::new(true));
        let runner = MigrationRunner::new(MigrationContext::from_backend(storage.clone()), registry())
            .with_cancel_flag(flag.clone());

        let report = runner.run_pending_migrations(&feature()).await.unwrap();
        assert!(report.interrupted);
        assert!(report.applied_steps.is_empty());
        assert_eq!(storage.get_applied_version(&feature()).await.unwrap(), 0);

        flag.store(false, Ordering::SeqCst);
        let report = runner.run_pending_migrations(&feature()).await.unwrap();
        assert_eq!(report.to_version, 2);
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("continue".parse::<FailurePolicy>().unwrap(), FailurePolicy::Continue);
        assert_eq!(FailurePolicy::default().to_string(), "fail-fast");
        assert!("later".parse::<FailurePolicy>().is_err());
    }
}
