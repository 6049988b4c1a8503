use std::path::PathBuf;

use runbook_types::{ExitOutcome, RecordId, TaskId, TaskStatus};
use thiserror::Error;

/// Errors raised by a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {0} has not finished")]
    TaskActive(TaskId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised while preparing or running a task.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid inventory {id}: {reason}")]
    InvalidInventory { id: RecordId, reason: String },

    #[error("Failed to start '{command}': {source}")]
    ProcessStart {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process {outcome}")]
    ProcessExecution { outcome: ExitOutcome },

    #[error("Process was stopped")]
    Killed,

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid engine configuration: {0}")]
    Config(String),

    #[error("Engine has shut down")]
    ShutDown,
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
