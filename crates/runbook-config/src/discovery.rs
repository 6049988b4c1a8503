//! Locating config files and folding them into one `RunbookConfig`.
//!
//! Layers, lowest precedence first:
//! 1. `~/.config/runbook/config.toml` (or `$RUNBOOK_CONFIG_DIR/config.toml`)
//! 2. `./runbook.toml` (project-local)
//! 3. command-line flags, applied by the binary

use std::path::{Path, PathBuf};

use crate::types::APP_NAME;
use crate::{ConfigError, Result, RunbookConfig};

/// Project-local config file, looked up in the project directory.
const PROJECT_CONFIG_FILE: &str = "runbook.toml";

/// Default config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Overrides the user config directory when set and non-empty.
const CONFIG_DIR_ENV: &str = "RUNBOOK_CONFIG_DIR";

/// One config file that discovery looked at.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Where the layer was expected.
    pub path: PathBuf,
    /// False when missing or unreadable.
    pub loaded: bool,
}

/// Merged config plus the trail of files behind it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// All layers merged.
    pub config: RunbookConfig,
    /// Every layer checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Warnings generated during loading.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the layers that contributed.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Discover and merge the user and project layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], with the user config directory chosen by the caller.
///
/// `config_dir` overrides both `RUNBOOK_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = RunbookConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    if let Some(path) = user_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    check_tmp_path(&config, &mut warnings);

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Parse a single config file.
pub fn load_config_file(path: &Path) -> Result<RunbookConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    RunbookConfig::from_toml(&contents)
}

/// Save configuration to a file, creating parent directories.
pub fn save_config(config: &RunbookConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

/// User config file path (`<config dir>/config.toml`).
pub fn user_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// User config directory.
///
/// Checks `RUNBOOK_CONFIG_DIR` first, then the platform default.
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Load one layer; a broken file becomes a warning, not an error.
fn load_layer(config: &mut RunbookConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Skipping {}: {e}", path.display()));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}

/// Key files land in `tmp_path`; a relative path depends on the cwd of
/// whoever starts the engine.
fn check_tmp_path(config: &RunbookConfig, warnings: &mut Vec<String>) {
    if let Some(ref engine) = config.engine
        && let Some(ref tmp) = engine.tmp_path
        && tmp.is_relative()
    {
        warnings.push(format!(
            "[engine] tmp_path '{}' is relative; key files will be written relative \
             to the working directory",
            tmp.display()
        ));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
