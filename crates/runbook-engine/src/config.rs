//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory receiving per-task key and inventory files.
    pub tmp_dir: PathBuf,

    /// Automation program to launch.
    pub command: String,

    /// Environment variables added to every run (before per-task ones).
    pub env: Vec<(String, String)>,

    /// Time between the polite and the forced termination signal.
    pub stop_grace: Duration,

    /// Lines a live listener may lag behind before it is disconnected.
    pub listener_buffer: usize,

    /// Lines buffered between the output readers and the scheduler.
    pub line_buffer: usize,

    /// Age after which leftover artifact files are considered stale.
    pub stale_after: Duration,

    /// Sweep stale artifacts from `tmp_dir` when the engine starts.
    pub sweep_on_startup: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir().join("runbook"),
            command: "ansible-playbook".to_string(),
            env: Vec::new(),
            stop_grace: Duration::from_secs(10),
            listener_buffer: 256,
            line_buffer: 64,
            stale_after: Duration::from_secs(24 * 60 * 60),
            sweep_on_startup: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = dir.into();
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Add an environment variable for every run.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_listener_buffer(mut self, lines: usize) -> Self {
        self.listener_buffer = lines.max(1);
        self
    }

    pub fn with_line_buffer(mut self, lines: usize) -> Self {
        self.line_buffer = lines.max(1);
        self
    }

    pub fn with_stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    pub fn with_sweep_on_startup(mut self, enabled: bool) -> Self {
        self.sweep_on_startup = enabled;
        self
    }
}
