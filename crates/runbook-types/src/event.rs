//! Events pushed to the broadcast transport.

use serde::{Deserialize, Serialize};

use crate::task::{OutputLine, TaskId, TaskStatus};
use crate::Timestamp;

/// A task lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A task moved to a new status.
    StatusChanged {
        task_id: TaskId,
        status: TaskStatus,
        at: Timestamp,
    },
    /// A line was appended to a task's output.
    OutputAppended { line: OutputLine },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::StatusChanged { task_id, .. } => *task_id,
            Self::OutputAppended { line } => line.task_id,
        }
    }
}
