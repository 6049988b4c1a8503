//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use console::style;

use runbook_config::{RunbookConfig, save_config};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Show which config files are checked and loaded
    Which,

    /// Write a config file with defaults
    Init {
        /// Create project-local config (./runbook.toml) instead of user config
        #[arg(long)]
        local: bool,
    },

    /// Show the user config file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local } => cmd_init(ctx, local),
        ConfigCommand::Path => cmd_path(ctx),
    }
}

fn user_config_path(ctx: &Context) -> Result<PathBuf> {
    ctx.config_dir
        .as_ref()
        .map(|d| d.join("config.toml"))
        .ok_or_else(|| anyhow!("Could not determine config directory"))
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let config = ctx.config();

    if ctx.json_output {
        let value = serde_json::json!({
            "sources": ctx.loaded.loaded_from(),
            "engine": config.engine(),
            "store": config.store(),
            "logging": config.logging(),
            "warnings": ctx.loaded.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("# Runbook Configuration\n");

    let sources = ctx.loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    let engine = config.engine();
    println!("Engine:");
    println!("  command: {}", engine.command);
    println!("  tmp_path: {}", engine.resolved_tmp_path().display());
    println!("  stop_grace: {}s", engine.stop_grace_secs);
    println!("  buffers: {} listener / {} line", engine.listener_buffer, engine.line_buffer);
    println!(
        "  stale after: {}h (sweep on startup: {})",
        engine.stale_artifact_hours, engine.sweep_on_startup
    );
    for (key, value) in &engine.env {
        println!("  env {key}={value}");
    }
    println!();

    println!("Store:");
    println!("  data_dir: {}", ctx.data_dir().display());
    println!();

    let logging = config.logging();
    println!("Logging:");
    match (&logging.dir, logging.json) {
        (_, false) => println!("  json file: off"),
        (Some(dir), true) => println!("  json file: {}", dir.display()),
        (None, true) => println!("  json file: <config dir>/logs"),
    }
    println!();

    if !ctx.loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &ctx.loaded.warnings {
            println!("  ⚠ {w}");
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        if let Ok(toml_str) = config.to_toml() {
            println!("{toml_str}");
        }
    }

    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    println!("Config file search order (later overrides earlier):\n");
    for source in &ctx.loaded.sources {
        let status = if source.loaded {
            style("✓ loaded").green()
        } else {
            style("· not found").dim()
        };
        println!("  {} {}", status, source.path.display());
    }
    Ok(())
}

fn cmd_init(ctx: &Context, local: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("runbook.toml")
    } else {
        user_config_path(ctx)?
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    let config = RunbookConfig {
        engine: Some(Default::default()),
        store: Some(Default::default()),
        logging: Some(Default::default()),
    };
    save_config(&config, &path)?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    println!("{}", user_config_path(ctx)?.display());
    Ok(())
}
