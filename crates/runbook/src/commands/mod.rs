//! CLI command handlers.

pub mod config;
pub mod run;
pub mod sweep;
pub mod tasks;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use console::Style;
use runbook_config::{EngineSection, LoadedConfig, RunbookConfig, StoreSection};
use runbook_engine::{EngineConfig, JsonlRecordStore, RecordStore};
use runbook_types::{TaskId, TaskStatus};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration and where it came from.
    pub loaded: LoadedConfig,
    /// User config directory (flag, env or platform default).
    pub config_dir: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    pub fn config(&self) -> &RunbookConfig {
        &self.loaded.config
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config().store().resolved_data_dir()
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.config().engine().resolved_tmp_path()
    }

    pub fn open_store(&self) -> JsonlRecordStore {
        JsonlRecordStore::new(&self.data_dir())
    }

    /// Engine settings from the `[engine]` section.
    pub fn engine_config(&self) -> EngineConfig {
        let section = self.config().engine();
        let mut config = EngineConfig::new()
            .with_tmp_dir(section.resolved_tmp_path())
            .with_command(section.command.clone())
            .with_stop_grace(Duration::from_secs(section.stop_grace_secs))
            .with_listener_buffer(section.listener_buffer)
            .with_line_buffer(section.line_buffer)
            .with_stale_after(Duration::from_secs(section.stale_artifact_hours * 3600))
            .with_sweep_on_startup(section.sweep_on_startup);
        for (key, value) in section.env {
            config = config.with_env(key, value);
        }
        config
    }
}

/// Fold CLI path flags into the loaded config (they win over files).
pub fn apply_overrides(
    config: &mut RunbookConfig,
    data_dir: Option<PathBuf>,
    tmp_path: Option<PathBuf>,
) {
    if let Some(dir) = data_dir {
        let mut store = config.store.take().unwrap_or_else(StoreSection::default);
        store.data_dir = Some(dir);
        config.store = Some(store);
    }
    if let Some(dir) = tmp_path {
        let mut engine = config.engine.take().unwrap_or_else(EngineSection::default);
        engine.tmp_path = Some(dir);
        config.engine = Some(engine);
    }
}

/// Resolve a full task id or a unique prefix of one.
pub fn resolve_task_id(store: &dyn RecordStore, input: &str) -> Result<TaskId> {
    if let Some(id) = TaskId::parse(input) {
        return Ok(id);
    }

    let needle = input.trim().to_ascii_lowercase();
    if needle.is_empty() {
        bail!("task id must not be empty");
    }
    let matches: Vec<TaskId> = store
        .list_tasks()?
        .into_iter()
        .map(|t| t.id)
        .filter(|id| id.to_string().starts_with(&needle))
        .collect();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("no task matches '{input}'"),
        _ => bail!("'{input}' matches {} tasks; use more characters", matches.len()),
    }
}

/// Console style for a status.
pub fn status_style(status: TaskStatus) -> Style {
    match status {
        TaskStatus::Waiting => Style::new().dim(),
        TaskStatus::Running => Style::new().cyan(),
        TaskStatus::Success => Style::new().green(),
        TaskStatus::Error => Style::new().red(),
        TaskStatus::Stopped => Style::new().yellow(),
    }
}
