//! Reindex command

use cairn_migrate::ContentItemIndexer;

use crate::output::{to_json, OutputFormat};
use crate::{AppContext, Cli};

pub async fn run(cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    let stats = ContentItemIndexer::new(&ctx.migration).rebuild().await?;

    if cli.format == OutputFormat::Json {
        println!("{}", to_json(&stats)?);
    } else if !cli.quiet {
        println!(
            "Indexed {} rows from {} content items ({} stale latest, {} stale published flags cleared)",
            stats.rows, stats.documents, stats.demoted_latest, stats.demoted_published
        );
    }
    Ok(())
}
