//! Migrate command

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cairn_core::FeatureId;
use cairn_migrate::{default_registry, FailurePolicy, FeatureOutcome, MigrationRunner, RunReport};
use clap::Args;
use serde::Serialize;

use crate::output::{to_json, OutputFormat, Table};
use crate::{AppContext, Cli};

#[derive(Args)]
pub struct MigrateArgs {
    /// Only migrate this feature
    #[arg(long)]
    pub feature: Option<String>,

    /// What to do with the remaining features after one fails
    #[arg(long)]
    pub policy: Option<FailurePolicy>,
}

#[derive(Serialize)]
struct OutcomeView<'a> {
    feature: &'a FeatureId,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> From<&'a FeatureOutcome> for OutcomeView<'a> {
    fn from(outcome: &'a FeatureOutcome) -> Self {
        Self {
            feature: &outcome.feature,
            report: outcome.result.as_ref().ok(),
            error: outcome.result.as_ref().err().map(|e| e.to_string()),
        }
    }
}

pub async fn run(args: &MigrateArgs, cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    let runner = MigrationRunner::new(ctx.migration.clone(), default_registry()?).with_cancel_flag(cancel.clone());

    // Ctrl-C lets the step in flight finish, then stops before the next one
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current step");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let outcomes = match &args.feature {
        Some(name) => {
            let feature = FeatureId::new(name.as_str())?;
            let result = runner.run_pending_migrations(&feature).await;
            vec![FeatureOutcome { feature, result }]
        }
        None => {
            let policy = args.policy.unwrap_or(ctx.config.failure_policy);
            tracing::info!("Migrating every feature ({})", policy);
            runner.run_all(policy).await
        }
    };

    print_outcomes(&outcomes, cli)?;

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        anyhow::bail!("{} feature(s) failed to migrate", failed);
    }
    Ok(())
}

fn print_outcomes(outcomes: &[FeatureOutcome], cli: &Cli) -> anyhow::Result<()> {
    if cli.format == OutputFormat::Json {
        let views: Vec<OutcomeView> = outcomes.iter().map(OutcomeView::from).collect();
        println!("{}", to_json(&views)?);
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    let mut table = Table::new(&["FEATURE", "FROM", "TO", "STEPS", "RESULT"]);
    for outcome in outcomes {
        match &outcome.result {
            Ok(report) => {
                let steps: Vec<String> = report.applied_steps.iter().map(|s| s.version.to_string()).collect();
                let result = if report.interrupted {
                    "interrupted"
                } else if steps.is_empty() {
                    "up to date"
                } else {
                    "migrated"
                };
                table.row(vec![
                    outcome.feature.to_string(),
                    report.from_version.to_string(),
                    report.to_version.to_string(),
                    if steps.is_empty() { "-".to_string() } else { steps.join(",") },
                    result.to_string(),
                ]);
            }
            Err(e) => table.row(vec![
                outcome.feature.to_string(),
                "-".into(),
                "-".into(),
                "-".into(),
                format!("failed: {}", e),
            ]),
        }
    }
    println!("{}", table.render());
    Ok(())
}
