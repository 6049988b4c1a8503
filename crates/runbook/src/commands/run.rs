//! Run command - execute the tasks of a manifest.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Args;
use console::style;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use runbook_engine::{Engine, EventBus, Subscription};
use runbook_types::{TaskEvent, TaskId, TaskStatus};

use super::{Context, status_style};
use crate::manifest::Manifest;

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Manifest describing keys, inventories, environments and tasks
    pub manifest: PathBuf,

    /// Do not print task output, only the summary
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Serialize)]
struct TaskSummary {
    id: TaskId,
    template_id: i64,
    playbook: String,
    status: TaskStatus,
    outcome: Option<String>,
    lines: usize,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;
    let store = Arc::new(ctx.open_store());
    manifest.seed(&store)?;

    let bus = Arc::new(EventBus::default());
    let engine = Engine::start(ctx.engine_config(), store, bus.clone())?;

    // Status changes go to the log; lines and the summary go to stdout.
    let mut events = bus.subscribe();
    let log_events = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TaskEvent::StatusChanged { task_id, status, .. }) => {
                    tracing::info!(task_id = %task_id, status = %status.as_str(), "Task status changed");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Each listener exists before its task can start, so what it receives
    // is a prefix of the stored output.
    let mut runs: Vec<(TaskId, Subscription)> = Vec::with_capacity(manifest.tasks.len());
    for spec in manifest.tasks.iter().cloned() {
        runs.push(engine.submit_with_output(spec)?);
    }

    let live = !ctx.json_output && !args.quiet;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut summaries = Vec::with_capacity(runs.len());

    for (id, mut subscription) in runs {
        let task = engine.get_task(id)?;
        if live {
            println!(
                "{} {} {}",
                style("▶").cyan().bold(),
                style(id.short()).bold(),
                style(display_playbook(&task.spec.playbook)).dim()
            );
        }

        let mut printed = 0usize;
        loop {
            tokio::select! {
                line = subscription.recv() => match line {
                    Some(line) => {
                        if live {
                            println!("  {}", line.text);
                        }
                        printed += 1;
                    }
                    None => break,
                },
                _ = &mut ctrl_c, if !interrupted => {
                    interrupted = true;
                    eprintln!("{}", style("Interrupted, stopping tasks...").yellow());
                    engine.shutdown().await;
                }
            }
        }

        let status = engine.wait_for_completion(id).await?;

        // A slow listener is dropped early; the store has the rest.
        let output = engine.get_output(id)?;
        if live {
            for line in output.iter().skip(printed) {
                println!("  {}", line.text);
            }
        }

        let task = engine.get_task(id)?;
        if live {
            let detail = task
                .outcome
                .map(|o| format!(" ({o})"))
                .unwrap_or_default();
            println!(
                "{} {}{}\n",
                status_style(status).apply_to(status.as_str()),
                style(id.short()).bold(),
                style(detail).dim()
            );
        }
        summaries.push(TaskSummary {
            id,
            template_id: task.template_id,
            playbook: task.spec.playbook.clone(),
            status,
            outcome: task.outcome.map(|o| o.to_string()),
            lines: output.len(),
        });
    }

    engine.shutdown().await;
    drop(engine);
    log_events.abort();

    let failed = summaries
        .iter()
        .filter(|s| s.status != TaskStatus::Success)
        .count();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        print_summary(&summaries);
    }

    if failed > 0 {
        bail!("{failed} of {} tasks did not succeed", summaries.len());
    }
    Ok(())
}

fn display_playbook(playbook: &str) -> &str {
    if playbook.is_empty() { "(no playbook)" } else { playbook }
}

fn print_summary(summaries: &[TaskSummary]) {
    println!("{}", style("Summary").bold());
    println!("{}", style("─".repeat(40)).dim());
    for s in summaries {
        println!(
            "  {:<8} {:<10} {}",
            s.id.short(),
            status_style(s.status).apply_to(s.status.as_str()),
            display_playbook(&s.playbook)
        );
    }
}
