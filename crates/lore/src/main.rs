//! Lore - maintenance tool for persona memory and session state
//!
//! Main entry point for the Lore CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod commands;
mod offline;

use commands::{import, inspect, sweep};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Lore - maintenance tool for persona memory and session state
#[derive(Parser)]
#[command(name = "lore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding config.toml
    #[arg(long, global = true, env = "LORE_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Root of persisted persona state
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Segment a JSON-lines chat log into archived sessions
    Import(import::ImportArgs),

    /// Remove stale memories
    Sweep(sweep::SweepArgs),

    /// Show memory, session and agent state for a persona
    Inspect(inspect::InspectArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = lore_config::load_config_with_options(None, cli.config_dir.as_deref())
        .context("failed to load configuration")?;
    let paths = loaded.config.paths_or_default();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => paths.effective_data_dir()?,
    };
    let log_dir = match &paths.log_dir {
        Some(dir) => dir.clone(),
        None => data_dir.join("logs"),
    };

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "lore=debug,lore_agent=debug,lore_memory=debug,lore_session=debug,lore_config=debug,info"
    } else {
        "lore=info,lore_agent=info,lore_memory=info,lore_session=info,warn"
    };

    let file_appender = tracing_appender::rolling::daily(&log_dir, "lore.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "lore=trace,lore_agent=trace,lore_memory=trace,lore_session=trace,lore_config=trace,info",
                )),
        )
        .init();

    // Layers skipped during discovery were reported before the subscriber existed.
    for warning in &loaded.warnings {
        tracing::warn!(%warning, "Config layer skipped");
    }
    tracing::debug!(sources = ?loaded.loaded_from(), data_dir = %data_dir.display(), "Configuration loaded");

    let ctx = commands::Context::new(&loaded.config, data_dir, cli.json, cli.verbose)?;

    match cli.command {
        Commands::Import(args) => import::run(args, &ctx).await,
        Commands::Sweep(args) => sweep::run(args, &ctx).await,
        Commands::Inspect(args) => inspect::run(args, &ctx).await,
    }
}
