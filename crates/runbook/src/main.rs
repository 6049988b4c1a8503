//! Runbook - queued, supervised playbook runs.
//!
//! Main entry point for the Runbook CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod manifest;

use commands::{config, run, sweep, tasks};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Runbook - queued, supervised playbook runs
#[derive(Parser)]
#[command(name = "runbook")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding the user config.toml
    #[arg(long, global = true, env = "RUNBOOK_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Directory for task records and output (overrides [store] data_dir)
    #[arg(long, global = true, env = "RUNBOOK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory for per-task key and inventory files (overrides [engine] tmp_path)
    #[arg(long, global = true, env = "RUNBOOK_TMP_PATH")]
    pub tmp_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the tasks described in a manifest
    Run(run::RunArgs),

    /// Inspect and manage recorded tasks
    Tasks(tasks::TasksArgs),

    /// Remove stale key and inventory files
    Sweep(sweep::SweepArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli.config_dir.or_else(runbook_config::config_dir);
    let mut loaded = runbook_config::load_config_with_options(None, config_dir.as_deref())?;
    commands::apply_overrides(&mut loaded.config, cli.data_dir, cli.tmp_path);
    loaded.config.validate()?;

    // Console (human-readable) + rotating JSON file
    use tracing_subscriber::prelude::*;
    let filter = if cli.verbose {
        "runbook=debug,runbook_engine=debug,runbook_config=debug,info"
    } else {
        "runbook=info,runbook_engine=info,warn"
    };

    let logging = loaded.config.logging();
    let (file_layer, _guard) = if logging.json {
        let log_dir = logging
            .dir
            .clone()
            .or_else(|| config_dir.as_ref().map(|d| d.join("logs")))
            .unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "runbook.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(tracing_subscriber::EnvFilter::new(
                "runbook=trace,runbook_engine=trace,runbook_config=trace,info",
            ));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(file_layer)
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{warning}");
    }

    let ctx = commands::Context {
        loaded,
        config_dir,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Tasks(args) => tasks::run(args, &ctx).await,
        Commands::Sweep(args) => sweep::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
