//! Turning an inventory record into something the automation tool can read.
//!
//! | kind                 | artifact                                       |
//! |----------------------|------------------------------------------------|
//! | static text          | `inventory_<task>` in the temp dir, mode 0600  |
//! | dynamic script       | script in the working dir, marked executable   |
//! | external reference   | passed through unchanged                       |

use std::path::{Path, PathBuf};

use runbook_types::{InventoryKind, InventoryRecord, TaskId};
use tracing::debug;

use crate::artifacts::{INVENTORY_PREFIX, write_private_file};
use crate::error::{EngineError, Result};

/// Resolved inventory for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryArtifact {
    /// Inventory text written to a per-task file.
    StaticText { path: PathBuf },
    /// Executable inventory script.
    DynamicScript { path: PathBuf },
    /// Path or host list the tool resolves itself.
    ExternalReference { target: String },
}

impl InventoryArtifact {
    /// Value passed after `-i`.
    pub fn argument(&self) -> String {
        match self {
            Self::StaticText { path } | Self::DynamicScript { path } => {
                path.display().to_string()
            }
            Self::ExternalReference { target } => target.clone(),
        }
    }

    /// The file the engine created and must remove, if any.
    pub fn temp_file(&self) -> Option<&Path> {
        match self {
            Self::StaticText { path } => Some(path),
            Self::DynamicScript { .. } | Self::ExternalReference { .. } => None,
        }
    }
}

/// Path of the static inventory file for `task_id`.
pub fn static_inventory_path(tmp_dir: &Path, task_id: TaskId) -> PathBuf {
    tmp_dir.join(format!("{INVENTORY_PREFIX}{}", task_id.0.simple()))
}

/// Materialize `record` for the run of `task_id`.
///
/// `working_dir` anchors relative script paths.
pub fn resolve_inventory(
    record: &InventoryRecord,
    task_id: TaskId,
    tmp_dir: &Path,
    working_dir: Option<&Path>,
) -> Result<InventoryArtifact> {
    let kind = InventoryKind::parse(&record.kind).ok_or_else(|| EngineError::InvalidInventory {
        id: record.id,
        reason: format!("unknown inventory kind '{}'", record.kind),
    })?;

    let artifact = match kind {
        InventoryKind::StaticText => {
            let path = static_inventory_path(tmp_dir, task_id);
            write_private_file(&path, record.inventory.as_bytes())
                .map_err(|e| EngineError::io(&path, e))?;
            InventoryArtifact::StaticText { path }
        }
        InventoryKind::DynamicScript => {
            let path = anchor(non_empty(record)?, working_dir);
            mark_executable(&path)?;
            InventoryArtifact::DynamicScript { path }
        }
        InventoryKind::ExternalReference => InventoryArtifact::ExternalReference {
            target: non_empty(record)?.to_string(),
        },
    };

    debug!(task_id = %task_id, inventory_id = record.id, ?artifact, "Resolved inventory");
    Ok(artifact)
}

fn non_empty(record: &InventoryRecord) -> Result<&str> {
    let value = record.inventory.trim();
    if value.is_empty() {
        return Err(EngineError::InvalidInventory {
            id: record.id,
            reason: "inventory reference is empty".to_string(),
        });
    }
    Ok(value)
}

fn anchor(path: &str, working_dir: Option<&Path>) -> PathBuf {
    let path = Path::new(path);
    match working_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|e| EngineError::io(path, e))?;
    let mut perms = metadata.permissions();
    let mode = perms.mode();
    if mode & 0o100 == 0 {
        perms.set_mode(mode | 0o100);
        std::fs::set_permissions(path, perms).map_err(|e| EngineError::io(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(path: &Path) -> Result<()> {
    std::fs::metadata(path).map_err(|e| EngineError::io(path, e))?;
    Ok(())
}
