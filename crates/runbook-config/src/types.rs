//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [engine]
//! tmp_path = "/var/lib/runbook/tmp"
//! command = "ansible-playbook"
//! stop_grace_secs = 10
//!
//! [engine.env]
//! ANSIBLE_HOST_KEY_CHECKING = "False"
//!
//! [store]
//! data_dir = "/var/lib/runbook"
//!
//! [logging]
//! dir = "/var/log/runbook"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Application name used for directory resolution.
pub const APP_NAME: &str = "runbook";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunbookConfig {
    /// Task execution engine settings.
    pub engine: Option<EngineSection>,

    /// Record store settings.
    pub store: Option<StoreSection>,

    /// Log file settings.
    pub logging: Option<LoggingSection>,
}

impl RunbookConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: RunbookConfig) {
        if other.engine.is_some() {
            self.engine = other.engine;
        }
        if other.store.is_some() {
            self.store = other.store;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective engine settings (defaults when the section is absent).
    pub fn engine(&self) -> EngineSection {
        self.engine.clone().unwrap_or_default()
    }

    /// Effective store settings.
    pub fn store(&self) -> StoreSection {
        self.store.clone().unwrap_or_default()
    }

    /// Effective logging settings.
    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let engine = self.engine();
        if engine.command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "engine.command".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if engine.listener_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.listener_buffer".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if engine.line_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.line_buffer".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Engine configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Directory for per-task key and inventory files.
    /// Defaults to `<system temp>/runbook`.
    pub tmp_path: Option<PathBuf>,
    /// Automation command to run.
    pub command: String,
    /// Seconds between SIGTERM and SIGKILL when stopping a task.
    pub stop_grace_secs: u64,
    /// Lines buffered per live listener before it is disconnected.
    pub listener_buffer: usize,
    /// Lines buffered between the process readers and the scheduler.
    pub line_buffer: usize,
    /// Age after which leftover artifact files are swept.
    pub stale_artifact_hours: u64,
    /// Sweep stale artifacts when the engine starts.
    pub sweep_on_startup: bool,
    /// Extra environment variables for every run.
    pub env: BTreeMap<String, String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            tmp_path: None,
            command: "ansible-playbook".to_string(),
            stop_grace_secs: 10,
            listener_buffer: 256,
            line_buffer: 64,
            stale_artifact_hours: 24,
            sweep_on_startup: true,
            env: BTreeMap::new(),
        }
    }
}

impl EngineSection {
    /// Temp directory, falling back to `<system temp>/runbook`.
    pub fn resolved_tmp_path(&self) -> PathBuf {
        self.tmp_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Record store configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Directory holding task records and output logs.
    /// Defaults to the platform data dir (`~/.local/share/runbook`).
    pub data_dir: Option<PathBuf>,
}

impl StoreSection {
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join(APP_NAME))
                .unwrap_or_else(|| PathBuf::from(".runbook"))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Directory for rolling log files. Defaults to `<config dir>/logs`.
    pub dir: Option<PathBuf>,
    /// Write the JSON log file at all.
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            dir: None,
            json: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_defaults() {
        let config = RunbookConfig::from_toml("").unwrap();
        assert!(config.engine.is_none());
        let engine = config.engine();
        assert_eq!(engine.command, "ansible-playbook");
        assert_eq!(engine.stop_grace_secs, 10);
        assert!(engine.sweep_on_startup);
        assert!(config.logging().json);
    }

    #[test]
    fn test_parse_engine_section() {
        let config = RunbookConfig::from_toml(
            r#"
[engine]
tmp_path = "/srv/runbook/tmp"
command = "/usr/local/bin/ansible-playbook"
stop_grace_secs = 3

[engine.env]
ANSIBLE_HOST_KEY_CHECKING = "False"
"#,
        )
        .unwrap();

        let engine = config.engine();
        assert_eq!(engine.resolved_tmp_path(), PathBuf::from("/srv/runbook/tmp"));
        assert_eq!(engine.command, "/usr/local/bin/ansible-playbook");
        assert_eq!(engine.stop_grace_secs, 3);
        // unspecified fields keep their defaults
        assert_eq!(engine.listener_buffer, 256);
        assert_eq!(
            engine.env.get("ANSIBLE_HOST_KEY_CHECKING").map(String::as_str),
            Some("False")
        );
    }

    #[test]
    fn test_merge_overrides_sections() {
        let mut base = RunbookConfig::from_toml(
            r#"
[engine]
command = "base"

[store]
data_dir = "/base"
"#,
        )
        .unwrap();
        let over = RunbookConfig::from_toml(
            r#"
[engine]
command = "override"
"#,
        )
        .unwrap();

        base.merge(over);
        assert_eq!(base.engine().command, "override");
        assert_eq!(base.store().resolved_data_dir(), PathBuf::from("/base"));
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let config = RunbookConfig::from_toml("[engine]\ncommand = \"  \"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "engine.command"));
    }

    #[test]
    fn test_validate_rejects_zero_buffers() {
        let config = RunbookConfig::from_toml("[engine]\nlistener_buffer = 0\n").unwrap();
        assert!(config.validate().is_err());
        let config = RunbookConfig::from_toml("[engine]\nline_buffer = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_engine() {
        let mut config = RunbookConfig::new();
        config.engine = Some(EngineSection {
            command: "sh".to_string(),
            ..Default::default()
        });
        let text = config.to_toml().unwrap();
        let back = RunbookConfig::from_toml(&text).unwrap();
        assert_eq!(back.engine(), config.engine());
    }
}
