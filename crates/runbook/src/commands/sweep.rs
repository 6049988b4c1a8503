//! Sweep command - remove stale key and inventory files.

use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;
use console::style;

use runbook_engine::sweep_stale;

use super::Context;

/// Arguments for the sweep command.
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Report what would be removed without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Age in hours after which a file counts as stale
    /// (defaults to [engine] stale_artifact_hours)
    #[arg(long)]
    pub older_than_hours: Option<u64>,
}

/// Run the sweep command.
pub async fn run(args: SweepArgs, ctx: &Context) -> Result<()> {
    let dir = ctx.tmp_path();
    let hours = args
        .older_than_hours
        .unwrap_or(ctx.config().engine().stale_artifact_hours);

    let result = sweep_stale(&dir, Duration::from_secs(hours * 3600), args.dry_run)
        .with_context(|| format!("sweeping {}", dir.display()))?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let verb = if result.dry_run { "Would remove" } else { "Removed" };
    for path in &result.removed {
        println!("  {} {}", style(verb).yellow(), path.display());
    }
    println!(
        "{} {} of {} artifact files in {}",
        style(verb).bold(),
        result.removed.len(),
        result.checked,
        dir.display()
    );
    Ok(())
}
