//! Items command
//!
//! Lists content items from the `ContentItemIndex` table. Display labels go
//! through the display cache so every version of an item shares one entry.

use std::sync::Arc;

use cairn_core::ContentItemIndex;
use cairn_migrate::content_management::CONTENT_ITEM_INDEX_TABLE;
use cairn_storage::{DisplayCache, Signal};
use clap::Args;
use serde::Serialize;

use crate::output::{to_json, OutputFormat, Table};
use crate::{AppContext, Cli};

#[derive(Args)]
pub struct ItemsArgs {
    /// Only items of this content type
    #[arg(long)]
    pub content_type: Option<String>,

    /// Include superseded versions
    #[arg(long)]
    pub all_versions: bool,
}

#[derive(Serialize)]
struct ItemView<'a> {
    #[serde(flatten)]
    row: &'a ContentItemIndex,
    label: String,
}

/// Display text, falling back to the content type and a short id
fn display_label(row: &ContentItemIndex) -> String {
    match row.display_text.as_deref() {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => {
            let short: String = row.content_item_id.chars().take(8).collect();
            format!("{} {}", row.content_type, short)
        }
    }
}

pub async fn run(args: &ItemsArgs, cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    let mut rows: Vec<ContentItemIndex> = Vec::new();
    for row in ctx.migration.indexes.index_rows(CONTENT_ITEM_INDEX_TABLE).await? {
        let entry: ContentItemIndex = row.to_model()?;
        if !args.all_versions && !entry.latest {
            continue;
        }
        if args.content_type.as_deref().is_some_and(|t| t != entry.content_type) {
            continue;
        }
        rows.push(entry);
    }

    let cache: DisplayCache<String> = DisplayCache::with_sliding_expiration(
        Arc::new(Signal::new()),
        chrono::Duration::minutes(ctx.config.cache_minutes),
    );
    let views: Vec<ItemView> = rows
        .iter()
        .map(|row| {
            let label = match cache.get(&row.content_item_id) {
                Some(label) => label,
                None => {
                    let label = display_label(row);
                    cache.insert(&row.content_item_id, label.clone());
                    label
                }
            };
            ItemView { row, label }
        })
        .collect();
    tracing::debug!(
        "Listed {} rows ({} display lookups cached)",
        views.len(),
        cache.stats().hits()
    );

    if cli.format == OutputFormat::Json {
        println!("{}", to_json(&views)?);
        return Ok(());
    }

    let mut table = Table::new(&["ITEM", "TYPE", "LATEST", "PUBLISHED", "DISPLAY"]);
    for view in &views {
        table.row(vec![
            view.row.content_item_id.clone(),
            view.row.content_type.clone(),
            view.row.latest.to_string(),
            view.row.published.to_string(),
            view.label.clone(),
        ]);
    }
    if table.is_empty() && !cli.quiet {
        println!("No content items indexed. Run 'cairn reindex' first.");
    } else {
        println!("{}", table.render());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{ContentItem, DocumentId};

    #[test]
    fn test_label_falls_back_to_type() {
        let item = ContentItem::new("Article");
        let row = ContentItemIndex::from_item(DocumentId(1), &item);
        assert!(display_label(&row).starts_with("Article "));

        let row = ContentItemIndex::from_item(DocumentId(1), &item.clone().with_display_text("Hello"));
        assert_eq!(display_label(&row), "Hello");
    }
}
