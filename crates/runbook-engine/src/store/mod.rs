//! Record store abstraction.
//!
//! The engine reads keys, inventories and environments from the store and
//! writes task records and output lines back to it.
//!
//! ```text
//! RecordStore (trait)
//!     └── JsonlRecordStore   - task.json + output.jsonl per task directory
//!     └── MemoryRecordStore  - in-memory, for tests and embedding
//! ```

mod jsonl;
mod memory;

use std::collections::HashMap;

use runbook_types::{
    EnvironmentRecord, ExitOutcome, InventoryRecord, KeyRecord, OutputLine, RecordId, Task,
    TaskId, TaskSpec, TaskStatus, Timestamp, now,
};

use crate::error::{StoreError, StoreResult};

pub use jsonl::JsonlRecordStore;
pub use memory::MemoryRecordStore;

/// Persistence seam between the engine and whatever owns the records.
///
/// Implementations must reject illegal status transitions so that a task
/// never moves backwards, whichever component asks.
pub trait RecordStore: Send + Sync {
    // ── Tasks ───────────────────────────────────────────────────────────

    /// Persist a new task in `Waiting`.
    fn create_task(&self, spec: TaskSpec) -> StoreResult<Task>;

    fn get_task(&self, id: TaskId) -> StoreResult<Task>;

    /// All tasks, newest first.
    fn list_tasks(&self) -> StoreResult<Vec<Task>>;

    /// Apply a status change and return the updated task.
    fn set_status(&self, id: TaskId, change: StatusChange) -> StoreResult<Task>;

    /// Remove a finished task and its output.
    fn delete_task(&self, id: TaskId) -> StoreResult<()>;

    // ── Output ──────────────────────────────────────────────────────────

    fn append_output(&self, line: &OutputLine) -> StoreResult<()>;

    /// All output lines of a task in append order.
    fn get_output(&self, id: TaskId) -> StoreResult<Vec<OutputLine>>;

    // ── Referenced records ──────────────────────────────────────────────

    fn get_key(&self, id: RecordId) -> StoreResult<KeyRecord>;

    fn get_inventory(&self, id: RecordId) -> StoreResult<InventoryRecord>;

    fn get_environment(&self, id: RecordId) -> StoreResult<EnvironmentRecord>;
}

/// A requested status update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusChange {
    pub status: TaskStatus,
    pub at: Timestamp,
    pub outcome: Option<ExitOutcome>,
}

impl StatusChange {
    /// Change to `status`, stamped now.
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            at: now(),
            outcome: None,
        }
    }

    pub fn with_outcome(mut self, outcome: Option<ExitOutcome>) -> Self {
        self.outcome = outcome;
        self
    }
}

/// Validate and apply `change` to `task` in place.
pub(crate) fn apply_change(task: &mut Task, change: StatusChange) -> StoreResult<()> {
    if !task.status.can_transition_to(change.status) {
        return Err(StoreError::InvalidTransition {
            task_id: task.id,
            from: task.status,
            to: change.status,
        });
    }

    task.status = change.status;
    if change.status == TaskStatus::Running {
        task.started_at = Some(change.at);
    }
    if change.status.is_terminal() {
        task.ended_at = Some(change.at);
        task.outcome = change.outcome;
    }
    Ok(())
}

/// Keys, inventories and environments held by a store.
///
/// Both bundled stores keep these in memory; they are seeded by the caller
/// (e.g. from a manifest) rather than created by the engine.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    keys: HashMap<RecordId, KeyRecord>,
    inventories: HashMap<RecordId, InventoryRecord>,
    environments: HashMap<RecordId, EnvironmentRecord>,
}

impl Catalog {
    pub(crate) fn insert_key(&mut self, key: KeyRecord) {
        self.keys.insert(key.id, key);
    }

    pub(crate) fn insert_inventory(&mut self, inventory: InventoryRecord) {
        self.inventories.insert(inventory.id, inventory);
    }

    pub(crate) fn insert_environment(&mut self, environment: EnvironmentRecord) {
        self.environments.insert(environment.id, environment);
    }

    pub(crate) fn key(&self, id: RecordId) -> StoreResult<KeyRecord> {
        self.keys
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Key", id))
    }

    pub(crate) fn inventory(&self, id: RecordId) -> StoreResult<InventoryRecord> {
        self.inventories
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Inventory", id))
    }

    pub(crate) fn environment(&self, id: RecordId) -> StoreResult<EnvironmentRecord> {
        self.environments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Environment", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_change_sets_timestamps() {
        let mut task = Task::new(TaskId::new(), TaskSpec::default());

        apply_change(&mut task, StatusChange::new(TaskStatus::Running)).unwrap();
        assert!(task.started_at.is_some());
        assert!(task.ended_at.is_none());

        let done = StatusChange::new(TaskStatus::Error)
            .with_outcome(Some(ExitOutcome::Failed { code: 2 }));
        apply_change(&mut task, done).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.ended_at.is_some());
        assert_eq!(task.outcome, Some(ExitOutcome::Failed { code: 2 }));
    }

    #[test]
    fn test_apply_change_rejects_backwards() {
        let mut task = Task::new(TaskId::new(), TaskSpec::default());
        apply_change(&mut task, StatusChange::new(TaskStatus::Stopped)).unwrap();

        let err = apply_change(&mut task, StatusChange::new(TaskStatus::Running)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: TaskStatus::Stopped,
                to: TaskStatus::Running,
                ..
            }
        ));
        assert_eq!(task.status, TaskStatus::Stopped);
    }

    #[test]
    fn test_catalog_lookup_miss() {
        let catalog = Catalog::default();
        let err = catalog.key(42).unwrap_err();
        assert_eq!(err.to_string(), "Key not found: 42");
    }
}
