//! Configuration system for Runbook.
//!
//! Provides TOML-based configuration with:
//! - `[engine]` settings for the task execution engine (temp path, command,
//!   stop grace period, buffer sizes, stale artifact sweep)
//! - `[store]` settings for the on-disk record store
//! - `[logging]` settings for the rolling log files
//! - Config file layering (user config dir + project-local `runbook.toml`)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    config_dir, load_config, load_config_file, load_config_with_options, save_config,
    user_config_path, ConfigSource, LoadedConfig,
};
pub use error::{ConfigError, Result};
pub use types::*;
