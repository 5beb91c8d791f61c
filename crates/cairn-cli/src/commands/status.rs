//! Status command

use std::collections::BTreeMap;

use cairn_migrate::default_registry;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::output::{to_json, OutputFormat, Table};
use crate::{AppContext, Cli};

#[derive(Debug, Serialize)]
struct FeatureStatus {
    feature: String,
    applied: u32,
    /// None when the feature is in the ledger but no longer registered
    latest: Option<u32>,
    updated_at: Option<DateTime<Utc>>,
}

impl FeatureStatus {
    fn state(&self) -> &'static str {
        match self.latest {
            None => "unregistered",
            Some(latest) if self.applied > latest => "ahead",
            Some(latest) if self.applied == latest => "up to date",
            Some(_) if self.applied == 0 => "not installed",
            Some(_) => "pending",
        }
    }
}

pub async fn run(cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    let registry = default_registry()?;
    let mut statuses: BTreeMap<String, FeatureStatus> = BTreeMap::new();

    for feature in registry.features() {
        let latest = registry.get(feature).map(|m| m.latest_version());
        statuses.insert(
            feature.to_string(),
            FeatureStatus {
                feature: feature.to_string(),
                applied: 0,
                latest,
                updated_at: None,
            },
        );
    }

    for entry in ctx.migration.ledger.list_versions().await? {
        let status = statuses
            .entry(entry.feature_id.to_string())
            .or_insert_with(|| FeatureStatus {
                feature: entry.feature_id.to_string(),
                applied: 0,
                latest: None,
                updated_at: None,
            });
        status.applied = entry.applied_version;
        status.updated_at = Some(entry.updated_at);
    }

    let statuses: Vec<FeatureStatus> = statuses.into_values().collect();
    tracing::debug!("{} features known to the {} backend", statuses.len(), ctx.backend.as_str());

    if cli.format == OutputFormat::Json {
        println!("{}", to_json(&statuses)?);
        return Ok(());
    }

    let mut table = Table::new(&["FEATURE", "APPLIED", "LATEST", "STATE", "UPDATED"]);
    for status in &statuses {
        table.row(vec![
            status.feature.clone(),
            status.applied.to_string(),
            status.latest.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            status.state().to_string(),
            status
                .updated_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".into()),
        ]);
    }
    println!("{}", table.render());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(applied: u32, latest: Option<u32>) -> FeatureStatus {
        FeatureStatus {
            feature: "ContentManagement".into(),
            applied,
            latest,
            updated_at: None,
        }
    }

    #[test]
    fn test_state() {
        assert_eq!(status(0, Some(6)).state(), "not installed");
        assert_eq!(status(3, Some(6)).state(), "pending");
        assert_eq!(status(6, Some(6)).state(), "up to date");
        assert_eq!(status(9, Some(6)).state(), "ahead");
        assert_eq!(status(2, None).state(), "unregistered");
    }
}
