//! Cairn CLI - Run and inspect content migrations

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use cairn_migrate::MigrationContext;
use cairn_storage::MemoryStorage;
use commands::{completions, io, items, migrate, reindex, status};
use config::{BackendKind, Config};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about = "Incremental schema and document migrations for content stores")]
pub struct Cli {
    /// Data directory
    #[arg(short, long, env = "CAIRN_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Storage backend
    #[arg(short, long, env = "CAIRN_BACKEND", global = true)]
    pub backend: Option<BackendKind>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub format: OutputFormat,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending migrations
    Migrate(migrate::MigrateArgs),
    /// Show applied and latest versions per feature
    Status,
    /// Import documents from a JSON file
    Import(io::ImportArgs),
    /// Export documents as JSON
    Export(io::ExportArgs),
    /// Rebuild the content item index from stored items
    Reindex,
    /// List indexed content items
    Items(items::ItemsArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// Application context with the selected storage backend
pub struct AppContext {
    pub config: Config,
    pub backend: BackendKind,
    pub migration: MigrationContext,
}

impl AppContext {
    pub fn new(cli: &Cli, config: Config) -> anyhow::Result<Self> {
        let backend = cli.backend.unwrap_or(config.backend);
        let data_dir = cli.data_dir.clone().unwrap_or_else(|| config.data_dir());

        let migration = match backend {
            BackendKind::Memory => MigrationContext::from_backend(Arc::new(MemoryStorage::new())),
            BackendKind::Redb => open_redb(&data_dir)?,
            BackendKind::Sqlite => open_sqlite(&data_dir)?,
        };
        tracing::debug!("Using {} backend", backend.as_str());

        Ok(Self {
            config,
            backend,
            migration,
        })
    }
}

#[cfg(feature = "redb")]
fn open_redb(data_dir: &std::path::Path) -> anyhow::Result<MigrationContext> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("cairn.redb");
    tracing::debug!("Using database at: {:?}", db_path);
    let storage = cairn_storage::RedbStorage::open(&db_path)?;
    Ok(MigrationContext::from_backend(Arc::new(storage)))
}

#[cfg(not(feature = "redb"))]
fn open_redb(_data_dir: &std::path::Path) -> anyhow::Result<MigrationContext> {
    anyhow::bail!("this build has no redb support")
}

#[cfg(feature = "sqlite")]
fn open_sqlite(data_dir: &std::path::Path) -> anyhow::Result<MigrationContext> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("cairn.db");
    tracing::debug!("Using database at: {:?}", db_path);
    let storage = cairn_storage::SqliteStorage::open(&db_path)?;
    Ok(MigrationContext::from_backend(Arc::new(storage)))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_data_dir: &std::path::Path) -> anyhow::Result<MigrationContext> {
    anyhow::bail!("this build has no sqlite support")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    tracing::debug!("Starting cairn CLI");

    // These never touch storage
    match &cli.command {
        Commands::Config(args) => return commands::config::run(args),
        Commands::Completions(args) => return completions::run(args),
        _ => {}
    }

    let ctx = AppContext::new(&cli, Config::load()?)?;

    match &cli.command {
        Commands::Migrate(args) => migrate::run(args, &cli, &ctx).await?,
        Commands::Status => status::run(&cli, &ctx).await?,
        Commands::Import(args) => io::run_import(args, &cli, &ctx).await?,
        Commands::Export(args) => io::run_export(args, &cli, &ctx).await?,
        Commands::Reindex => reindex::run(&cli, &ctx).await?,
        Commands::Items(args) => items::run(args, &cli, &ctx).await?,
        Commands::Config(_) | Commands::Completions(_) => {}
    }

    Ok(())
}
