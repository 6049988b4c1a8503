use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use runbook_types::{
    EnvironmentRecord, InventoryRecord, KeyRecord, OutputLine, RecordId, Task, TaskId, TaskSpec,
};

use super::{Catalog, RecordStore, StatusChange, apply_change};
use crate::error::{StoreError, StoreResult};

/// In-memory record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tasks: Mutex<HashMap<TaskId, Task>>,
    output: Mutex<HashMap<TaskId, Vec<OutputLine>>>,
    catalog: RwLock<Catalog>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&self, key: KeyRecord) {
        self.catalog.write().insert_key(key);
    }

    pub fn insert_inventory(&self, inventory: InventoryRecord) {
        self.catalog.write().insert_inventory(inventory);
    }

    pub fn insert_environment(&self, environment: EnvironmentRecord) {
        self.catalog.write().insert_environment(environment);
    }
}

impl RecordStore for MemoryRecordStore {
    fn create_task(&self, spec: TaskSpec) -> StoreResult<Task> {
        let task = Task::new(TaskId::new(), spec);
        self.tasks.lock().insert(task.id, task.clone());
        Ok(task)
    }

    fn get_task(&self, id: TaskId) -> StoreResult<Task> {
        self.tasks
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Task", id))
    }

    fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<_> = self.tasks.lock().values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    fn set_status(&self, id: TaskId, change: StatusChange) -> StoreResult<Task> {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Task", id))?;
        apply_change(task, change)?;
        Ok(task.clone())
    }

    fn delete_task(&self, id: TaskId) -> StoreResult<()> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get(&id).ok_or_else(|| StoreError::not_found("Task", id))?;
        if !task.status.is_terminal() {
            return Err(StoreError::TaskActive(id));
        }
        tasks.remove(&id);
        self.output.lock().remove(&id);
        Ok(())
    }

    fn append_output(&self, line: &OutputLine) -> StoreResult<()> {
        if !self.tasks.lock().contains_key(&line.task_id) {
            return Err(StoreError::not_found("Task", line.task_id));
        }
        self.output
            .lock()
            .entry(line.task_id)
            .or_default()
            .push(line.clone());
        Ok(())
    }

    fn get_output(&self, id: TaskId) -> StoreResult<Vec<OutputLine>> {
        if !self.tasks.lock().contains_key(&id) {
            return Err(StoreError::not_found("Task", id));
        }
        Ok(self.output.lock().get(&id).cloned().unwrap_or_default())
    }

    fn get_key(&self, id: RecordId) -> StoreResult<KeyRecord> {
        self.catalog.read().key(id)
    }

    fn get_inventory(&self, id: RecordId) -> StoreResult<InventoryRecord> {
        self.catalog.read().inventory(id)
    }

    fn get_environment(&self, id: RecordId) -> StoreResult<EnvironmentRecord> {
        self.catalog.read().environment(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbook_types::TaskStatus;

    #[test]
    fn test_create_and_get() {
        let store = MemoryRecordStore::new();
        let task = store.create_task(TaskSpec::new(1, 2, "site.yml")).unwrap();
        assert_eq!(task.status, TaskStatus::Waiting);

        let fetched = store.get_task(task.id).unwrap();
        assert_eq!(fetched.spec.playbook, "site.yml");
        assert_eq!(fetched.project_id, 1);
    }

    #[test]
    fn test_output_in_append_order() {
        let store = MemoryRecordStore::new();
        let task = store.create_task(TaskSpec::default()).unwrap();
        for text in ["one", "two", "three"] {
            store.append_output(&OutputLine::new(task.id, text)).unwrap();
        }

        let lines: Vec<_> = store
            .get_output(task.id)
            .unwrap()
            .into_iter()
            .map(|l| l.text)
            .collect();
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_append_to_unknown_task_fails() {
        let store = MemoryRecordStore::new();
        let err = store
            .append_output(&OutputLine::new(TaskId::new(), "orphan"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "Task", .. }));
    }

    #[test]
    fn test_set_status_enforces_state_machine() {
        let store = MemoryRecordStore::new();
        let task = store.create_task(TaskSpec::default()).unwrap();

        assert!(store
            .set_status(task.id, StatusChange::new(TaskStatus::Success))
            .is_err());
        store
            .set_status(task.id, StatusChange::new(TaskStatus::Running))
            .unwrap();
        let done = store
            .set_status(task.id, StatusChange::new(TaskStatus::Success))
            .unwrap();
        assert_eq!(done.status, TaskStatus::Success);
    }

    #[test]
    fn test_delete_requires_terminal() {
        let store = MemoryRecordStore::new();
        let task = store.create_task(TaskSpec::default()).unwrap();
        store.append_output(&OutputLine::new(task.id, "x")).unwrap();

        assert!(matches!(
            store.delete_task(task.id),
            Err(StoreError::TaskActive(_))
        ));

        store
            .set_status(task.id, StatusChange::new(TaskStatus::Stopped))
            .unwrap();
        store.delete_task(task.id).unwrap();
        assert!(store.get_task(task.id).is_err());
        assert!(store.get_output(task.id).is_err());
    }

    #[test]
    fn test_catalog_records() {
        let store = MemoryRecordStore::new();
        store.insert_key(KeyRecord::new(7, "secret"));
        store.insert_inventory(InventoryRecord::static_text(3, "[all]\nhost1"));

        assert_eq!(store.get_key(7).unwrap().id, 7);
        assert_eq!(store.get_inventory(3).unwrap().kind, "static");
        assert!(store.get_environment(1).is_err());
    }
}
