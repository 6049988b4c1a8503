//! Per-task temporary files and their cleanup.
//!
//! Every key or inventory file the engine writes for a task is registered in
//! that task's [`ArtifactSet`] and removed when the run ends, whatever the
//! outcome. Files left behind by a crashed engine are removed by
//! [`sweep_stale`].

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use runbook_types::TaskId;
use serde::Serialize;
use tracing::{debug, info, warn};

/// File name prefix of installed keys.
pub const KEY_PREFIX: &str = "key_";

/// File name prefix of static inventory files.
pub const INVENTORY_PREFIX: &str = "inventory_";

/// Create the temp directory if needed (owner-only on unix).
pub fn ensure_tmp_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Write `contents` to a new file readable only by the owner.
///
/// Fails if the file already exists. A partially written file is removed.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    if let Err(e) = file.write_all(contents).and_then(|()| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// ArtifactSet
// ─────────────────────────────────────────────────────────────────────────────

/// Temporary files created for one task execution.
#[derive(Debug)]
pub struct ArtifactSet {
    task_id: TaskId,
    paths: Vec<PathBuf>,
    cleaned: bool,
}

impl ArtifactSet {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            paths: Vec::new(),
            cleaned: false,
        }
    }

    /// Register a file for removal at cleanup.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every tracked file. Runs at most once; later calls return 0.
    ///
    /// Failures are logged and do not stop the remaining removals. Returns
    /// the number of files removed.
    pub fn cleanup(&mut self) -> usize {
        if self.cleaned {
            return 0;
        }
        self.cleaned = true;

        let mut removed = 0;
        for path in self.paths.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(task_id = %self.task_id, path = %path.display(), "Artifact already gone");
                }
                Err(e) => {
                    warn!(
                        task_id = %self.task_id,
                        path = %path.display(),
                        error = %e,
                        "Failed to remove task artifact"
                    );
                }
            }
        }
        removed
    }
}

impl Drop for ArtifactSet {
    fn drop(&mut self) {
        if !self.cleaned && !self.paths.is_empty() {
            self.cleanup();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stale sweep
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a stale artifact sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepResult {
    /// Artifact files examined.
    pub checked: usize,
    /// Files removed (or that would be, in dry-run mode).
    pub removed: Vec<PathBuf>,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

fn is_artifact_name(name: &str) -> bool {
    name.starts_with(KEY_PREFIX) || name.starts_with(INVENTORY_PREFIX)
}

/// Remove artifact files in `dir` older than `max_age`.
///
/// Only files named like engine artifacts are considered. A missing
/// directory is an empty sweep.
pub fn sweep_stale(dir: &Path, max_age: Duration, dry_run: bool) -> std::io::Result<SweepResult> {
    let mut result = SweepResult {
        dry_run,
        ..Default::default()
    };
    if !dir.is_dir() {
        return Ok(result);
    }

    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_artifact_name(name) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        result.checked += 1;

        let modified = metadata.modified()?;
        if modified > cutoff {
            continue;
        }

        let path = entry.path();
        if dry_run {
            info!(path = %path.display(), "Would remove stale artifact (dry run)");
            result.removed.push(path);
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "Removed stale artifact");
                result.removed.push(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale artifact"),
        }
    }

    Ok(result)
}
