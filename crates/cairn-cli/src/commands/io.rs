//! Import/Export commands

use std::io::Write;
use std::path::PathBuf;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use cairn_core::{doc_types, Document};
use clap::Args;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppContext, Cli};

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Args)]
pub struct ImportArgs {
    /// Input file (JSON format)
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Output file (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Document types to export (default: definitions and content items)
    #[arg(short = 't', long = "type")]
    pub types: Vec<String>,
}

/// Export file layout
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportData {
    pub version: String,
    pub documents: Vec<DocumentExport>,
}

/// One document, without its store-assigned id and version
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentExport {
    #[serde(rename = "type")]
    pub type_id: String,
    pub content: Value,
}

pub async fn run_import(args: &ImportArgs, cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    tracing::info!("Importing from {:?}", args.file);

    let content = std::fs::read_to_string(&args.file)?;
    let data: ExportData = serde_json::from_str(&content)?;
    if data.version != EXPORT_VERSION {
        anyhow::bail!(
            "Unsupported export version '{}' (expected {})",
            data.version,
            EXPORT_VERSION
        );
    }

    let mut imported = 0usize;
    for document in data.documents {
        if document.type_id.trim().is_empty() {
            anyhow::bail!("Document #{} has no type", imported + 1);
        }
        let id = ctx
            .migration
            .documents
            .insert_document(&Document::new(document.type_id, document.content))
            .await?;
        tracing::debug!("Imported document {}", id);
        imported += 1;
    }

    if !cli.quiet {
        println!("Imported {} documents", imported);
    }
    Ok(())
}

pub async fn run_export(args: &ExportArgs, cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    let types: Vec<String> = if args.types.is_empty() {
        [
            doc_types::CONTENT_TYPE_DEFINITION,
            doc_types::CONTENT_PART_DEFINITION,
            doc_types::CONTENT_ITEM,
        ]
        .iter()
        .map(|t| t.to_string())
        .collect()
    } else {
        args.types.clone()
    };

    let mut documents = Vec::new();
    for type_id in &types {
        let loaded: Vec<Document> = ctx
            .migration
            .documents
            .load_documents_by_type(type_id)
            .try_collect()
            .await?;
        tracing::debug!("Exporting {} documents of type {}", loaded.len(), type_id);
        documents.extend(loaded.into_iter().map(|d| DocumentExport {
            type_id: d.type_id,
            content: d.content,
        }));
    }

    let export_data = ExportData {
        version: EXPORT_VERSION.to_string(),
        documents,
    };
    let content = serde_json::to_string_pretty(&export_data)?;

    if let Some(ref path) = args.output {
        // Write with secure permissions (0o600 = owner read/write only)
        #[cfg(unix)]
        {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)?;
            file.write_all(content.as_bytes())?;
        }
        #[cfg(not(unix))]
        {
            std::fs::write(path, &content)?;
        }
        if !cli.quiet {
            println!("Exported {} documents to {:?}", export_data.documents.len(), path);
        }
    } else {
        println!("{}", content);
    }

    Ok(())
}
