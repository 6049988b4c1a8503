//! Tasks command - inspect and manage recorded tasks.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::style;

use runbook_engine::RecordStore;
use runbook_types::{Task, TaskStatus};

use super::{Context, resolve_task_id, status_style};

/// Arguments for the tasks command.
#[derive(Args, Debug)]
pub struct TasksArgs {
    #[command(subcommand)]
    pub command: Option<TasksCommand>,
}

#[derive(Subcommand, Debug)]
pub enum TasksCommand {
    /// List recorded tasks, newest first
    List {
        /// Only show tasks with this status
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of tasks to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show one task
    Show {
        /// Task id or unique prefix
        id: String,
    },

    /// Print a task's recorded output
    Output {
        /// Task id or unique prefix
        id: String,

        /// Prefix each line with its timestamp
        #[arg(short, long)]
        timestamps: bool,
    },

    /// Delete a finished task and its output
    Remove {
        /// Task id or unique prefix
        id: String,
    },
}

/// Run the tasks command.
pub async fn run(args: TasksArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store();
    match args.command {
        None => cmd_list(&store, ctx, None, 20),
        Some(TasksCommand::List { status, limit }) => cmd_list(&store, ctx, status, limit),
        Some(TasksCommand::Show { id }) => cmd_show(&store, ctx, &id),
        Some(TasksCommand::Output { id, timestamps }) => cmd_output(&store, ctx, &id, timestamps),
        Some(TasksCommand::Remove { id }) => cmd_remove(&store, ctx, &id),
    }
}

fn parse_status(s: &str) -> Result<TaskStatus> {
    let status = match s.to_ascii_lowercase().as_str() {
        "waiting" => TaskStatus::Waiting,
        "running" => TaskStatus::Running,
        "success" => TaskStatus::Success,
        "error" => TaskStatus::Error,
        "stopped" => TaskStatus::Stopped,
        other => anyhow::bail!(
            "unknown status '{other}' (expected waiting, running, success, error or stopped)"
        ),
    };
    Ok(status)
}

fn cmd_list(
    store: &dyn RecordStore,
    ctx: &Context,
    status: Option<String>,
    limit: usize,
) -> Result<()> {
    let status = status.as_deref().map(parse_status).transpose()?;
    let tasks: Vec<Task> = store
        .list_tasks()?
        .into_iter()
        .filter(|t| status.is_none_or(|s| t.status == s))
        .take(limit)
        .collect();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("{}", style("No tasks recorded.").dim());
        return Ok(());
    }

    println!(
        "{}",
        style(format!(
            "{:<8}  {:<8}  {:<8}  {:<19}  {}",
            "ID", "STATUS", "TEMPLATE", "CREATED", "PLAYBOOK"
        ))
        .bold()
    );
    for task in &tasks {
        println!(
            "{:<8}  {}  {:<8}  {:<19}  {}",
            task.id.short(),
            status_style(task.status).apply_to(format!("{:<8}", task.status.as_str())),
            task.template_id,
            task.created_at.format("%Y-%m-%d %H:%M:%S"),
            task.spec.playbook
        );
    }
    Ok(())
}

fn cmd_show(store: &dyn RecordStore, ctx: &Context, id: &str) -> Result<()> {
    let id = resolve_task_id(store, id)?;
    let task = store.get_task(id)?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&task)?);
        return Ok(());
    }

    let label = |s: &str| style(format!("{s:<12}")).dim();
    println!("{}", style(format!("Task {}", task.id)).bold());
    println!("{}", style("─".repeat(40)).dim());
    println!(
        "{}{}",
        label("Status"),
        status_style(task.status).apply_to(task.status.as_str())
    );
    if let Some(outcome) = task.outcome {
        println!("{}{outcome}", label("Outcome"));
    }
    println!("{}{}", label("Project"), task.project_id);
    println!("{}{}", label("Template"), task.template_id);
    if !task.spec.playbook.is_empty() {
        println!("{}{}", label("Playbook"), task.spec.playbook);
    }
    if let Some(inventory) = task.spec.inventory_id {
        println!("{}{inventory}", label("Inventory"));
    }
    if let Some(environment) = task.spec.environment_id {
        println!("{}{environment}", label("Environment"));
    }
    println!("{}{}", label("Created"), task.created_at.to_rfc3339());
    if let Some(at) = task.started_at {
        println!("{}{}", label("Started"), at.to_rfc3339());
    }
    if let Some(at) = task.ended_at {
        println!("{}{}", label("Ended"), at.to_rfc3339());
        if let Some(started) = task.started_at {
            let secs = (at - started).num_milliseconds() as f64 / 1000.0;
            println!("{}{secs:.1}s", label("Duration"));
        }
    }

    if ctx.verbose {
        println!("{}{}", label("Output"), store.get_output(id)?.len());
    }
    Ok(())
}

fn cmd_output(store: &dyn RecordStore, ctx: &Context, id: &str, timestamps: bool) -> Result<()> {
    let id = resolve_task_id(store, id)?;
    let lines = store.get_output(id)?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }

    for line in &lines {
        if timestamps {
            println!(
                "{} {}",
                style(line.timestamp.format("%H:%M:%S%.3f")).dim(),
                line.text
            );
        } else {
            println!("{}", line.text);
        }
    }
    Ok(())
}

fn cmd_remove(store: &dyn RecordStore, ctx: &Context, id: &str) -> Result<()> {
    let id = resolve_task_id(store, id)?;
    store.delete_task(id)?;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "removed": id }));
    } else {
        println!("{} Removed task {}", style("✓").green(), style(id.short()).bold());
    }
    Ok(())
}
