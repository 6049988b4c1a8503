//! Shared types for the Runbook task execution engine.
//!
//! Records owned by the external record-store (keys, inventories,
//! environments) and the task model owned by the engine live here so the
//! engine, the stores and the CLI agree on one vocabulary.

pub mod environment;
pub mod event;
pub mod inventory;
pub mod key;
pub mod task;

pub use environment::EnvironmentRecord;
pub use event::TaskEvent;
pub use inventory::{InventoryKind, InventoryRecord};
pub use key::{KeyMaterial, KeyRecord};
pub use task::{ExitOutcome, OutputLine, Task, TaskId, TaskSpec, TaskStatus};

/// Timestamp type used across all records.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of a record owned by the external record-store
/// (projects, templates, keys, inventories, environments).
pub type RecordId = i64;

/// Current UTC time.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}
