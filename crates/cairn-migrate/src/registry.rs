//! Declared migration steps per feature

use std::fmt;
use std::sync::Arc;

use cairn_core::{FeatureId, StructuralChange};

use crate::error::{GapReason, MigrationError, MigrationResult};
use crate::rewriter::DocumentTransform;

/// Work performed by one step: structural changes first, then transforms
#[derive(Clone, Default)]
pub struct StepPlan {
    pub structural: Vec<StructuralChange>,
    pub transforms: Vec<Arc<dyn DocumentTransform>>,
}

impl StepPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_change(mut self, change: StructuralChange) -> Self {
        self.structural.push(change);
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn DocumentTransform>) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.structural.is_empty() && self.transforms.is_empty()
    }
}

impl fmt::Debug for StepPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepPlan")
            .field("structural", &self.structural)
            .field(
                "transforms",
                &self.transforms.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// One unit of upgrade that yields a new version number
#[derive(Debug, Clone)]
pub struct MigrationStep {
    pub produces_version: u32,
    pub description: String,
    pub plan: StepPlan,
}

impl MigrationStep {
    pub fn new(produces_version: u32, description: impl Into<String>, plan: StepPlan) -> Self {
        Self {
            produces_version,
            description: description.into(),
            plan,
        }
    }
}

/// Every step declared by one feature
#[derive(Debug, Clone)]
pub struct FeatureMigrations {
    pub feature: FeatureId,
    /// Runs only on a fresh install and may jump straight to a late version
    pub baseline: Option<MigrationStep>,
    /// Ordered by `produces_version`; each runs from `produces_version - 1`
    pub upgrades: Vec<MigrationStep>,
}

impl FeatureMigrations {
    pub fn new(feature: FeatureId) -> Self {
        Self {
            feature,
            baseline: None,
            upgrades: Vec::new(),
        }
    }

    pub fn with_baseline(mut self, step: MigrationStep) -> Self {
        self.baseline = Some(step);
        self
    }

    pub fn with_upgrade(mut self, step: MigrationStep) -> Self {
        self.upgrades.push(step);
        self
    }

    /// Highest version any declared step produces
    pub fn latest_version(&self) -> u32 {
        self.upgrades
            .iter()
            .map(|s| s.produces_version)
            .chain(self.baseline.iter().map(|s| s.produces_version))
            .max()
            .unwrap_or(0)
    }

    fn validate(&self) -> MigrationResult<()> {
        let invalid = |reason: String| MigrationError::InvalidRegistration(format!("{}: {}", self.feature, reason));

        if let Some(baseline) = &self.baseline {
            if baseline.produces_version == 0 {
                return Err(invalid("baseline must produce a version of at least 1".to_string()));
            }
        }

        let mut previous = 0;
        for step in &self.upgrades {
            if step.produces_version <= previous {
                return Err(invalid(format!(
                    "upgrade producing {} does not follow {}",
                    step.produces_version, previous
                )));
            }
            previous = step.produces_version;
        }

        Ok(())
    }
}

/// Registered features in registration order
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    features: Vec<FeatureMigrations>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, migrations: FeatureMigrations) -> MigrationResult<()> {
        if self.get(&migrations.feature).is_some() {
            return Err(MigrationError::InvalidRegistration(format!(
                "{} is already registered",
                migrations.feature
            )));
        }
        migrations.validate()?;

        tracing::debug!(
            "Registered {} ({} upgrades, baseline: {})",
            migrations.feature,
            migrations.upgrades.len(),
            migrations.baseline.is_some()
        );
        self.features.push(migrations);
        Ok(())
    }

    pub fn get(&self, feature: &FeatureId) -> Option<&FeatureMigrations> {
        self.features.iter().find(|f| &f.feature == feature)
    }

    pub fn features(&self) -> impl Iterator<Item = &FeatureId> {
        self.features.iter().map(|f| &f.feature)
    }

    /// The step to run when the ledger reads `current`, or `None` when done
    pub fn next_step(&self, feature: &FeatureId, current: u32) -> MigrationResult<Option<&MigrationStep>> {
        let migrations = self
            .get(feature)
            .ok_or_else(|| MigrationError::UnknownFeature(feature.to_string()))?;

        if current == 0 {
            if let Some(baseline) = &migrations.baseline {
                return Ok(Some(baseline));
            }
        }

        let gap = |reason| MigrationError::MigrationSequenceGap {
            feature: feature.to_string(),
            current,
            reason,
        };

        match migrations.upgrades.iter().find(|s| s.produces_version > current) {
            Some(step) if step.produces_version == current + 1 => Ok(Some(step)),
            Some(step) => Err(gap(GapReason::Skipped {
                next: step.produces_version,
            })),
            None => {
                let latest = migrations.latest_version();
                if current > latest {
                    Err(gap(GapReason::Ahead { latest }))
                } else {
                    Ok(None)
                }
            }
        }
    }
}
