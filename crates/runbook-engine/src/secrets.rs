//! Installing key material as owner-only files.

use std::fmt;
use std::path::{Path, PathBuf};

use runbook_types::{KeyRecord, TaskId};
use tracing::{debug, warn};

use crate::artifacts::{KEY_PREFIX, write_private_file};
use crate::error::{EngineError, Result};

/// What an installed key is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Private key for host connections (`--private-key`).
    Ssh,
    /// Vault password file (`--vault-password-file`).
    Vault,
}

impl KeyPurpose {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Vault => "vault",
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path a key for `task_id` is installed at.
pub fn key_path(tmp_dir: &Path, task_id: TaskId, purpose: KeyPurpose, key: &KeyRecord) -> PathBuf {
    tmp_dir.join(format!(
        "{KEY_PREFIX}{}_{}_{}",
        task_id.0.simple(),
        purpose,
        key.id
    ))
}

/// Write `key` into `tmp_dir` with mode 0600 and return its path.
///
/// The file name embeds the task id, so concurrent engines sharing a temp
/// directory never collide. An existing file is never overwritten.
pub fn install_key(
    tmp_dir: &Path,
    task_id: TaskId,
    purpose: KeyPurpose,
    key: &KeyRecord,
) -> Result<PathBuf> {
    if key.secret.is_empty() {
        warn!(task_id = %task_id, key_id = key.id, %purpose, "Installing empty key material");
    }

    let path = key_path(tmp_dir, task_id, purpose, key);
    let mut contents = key.secret.as_bytes().to_vec();
    // OpenSSH refuses private keys without a trailing newline.
    if purpose == KeyPurpose::Ssh && !contents.is_empty() && !contents.ends_with(b"\n") {
        contents.push(b'\n');
    }

    write_private_file(&path, &contents).map_err(|e| EngineError::io(&path, e))?;
    debug!(task_id = %task_id, key_id = key.id, %purpose, path = %path.display(), "Installed key");
    Ok(path)
}
