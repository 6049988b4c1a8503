use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use runbook_types::{
    EnvironmentRecord, InventoryRecord, KeyRecord, OutputLine, RecordId, Task, TaskId, TaskSpec,
};

use super::{Catalog, RecordStore, StatusChange, apply_change};
use crate::error::{StoreError, StoreResult};

const TASK_FILE: &str = "task.json";
const OUTPUT_FILE: &str = "output.jsonl";

/// File-backed record store. One directory per task.
///
/// Layout:
/// ```text
/// {data_dir}/tasks/{task_id}/task.json     - task record, rewritten atomically
/// {data_dir}/tasks/{task_id}/output.jsonl  - append-only output lines
/// ```
///
/// Keys, inventories and environments are held in memory and seeded by the
/// caller.
pub struct JsonlRecordStore {
    data_dir: PathBuf,
    catalog: RwLock<Catalog>,
    write_lock: Mutex<()>,
}

impl JsonlRecordStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            catalog: RwLock::new(Catalog::default()),
            write_lock: Mutex::new(()),
        }
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

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join("tasks")
    }

    /// Path to a task's directory.
    pub fn task_dir(&self, id: TaskId) -> PathBuf {
        self.tasks_dir().join(id.to_string())
    }

    fn read_task(&self, id: TaskId) -> StoreResult<Task> {
        let path = self.task_dir(id).join(TASK_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::not_found("Task", id));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write via a sibling temp file and rename so readers never see a
    /// half-written record.
    fn write_task(&self, task: &Task) -> StoreResult<()> {
        let dir = self.task_dir(task.id);
        fs::create_dir_all(&dir)?;

        let tmp = dir.join(format!("{TASK_FILE}.tmp"));
        let contents = serde_json::to_vec_pretty(task)?;
        let mut file = open_private(
            &tmp,
            OpenOptions::new().write(true).create(true).truncate(true),
        )?;
        file.write_all(&contents)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, dir.join(TASK_FILE))?;
        Ok(())
    }
}

/// Open `path` readable only by the owner (on unix), including a file left
/// behind with wider permissions.
fn open_private(path: &Path, options: &mut OpenOptions) -> std::io::Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        let file = options.open(path)?;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        Ok(file)
    }
    #[cfg(not(unix))]
    {
        options.open(path)
    }
}

impl RecordStore for JsonlRecordStore {
    fn create_task(&self, spec: TaskSpec) -> StoreResult<Task> {
        let _guard = self.write_lock.lock();
        let task = Task::new(TaskId::new(), spec);
        self.write_task(&task)?;
        Ok(task)
    }

    fn get_task(&self, id: TaskId) -> StoreResult<Task> {
        self.read_task(id)
    }

    fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        let dir = self.tasks_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut tasks = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(id) = entry.file_name().to_str().and_then(TaskId::parse) else {
                continue;
            };
            match self.read_task(id) {
                Ok(task) => tasks.push(task),
                // Deleted between read_dir and read.
                Err(StoreError::NotFound { .. }) => continue,
                Err(e) => {
                    tracing::warn!(task_id = %id, error = %e, "Skipping unreadable task record");
                }
            }
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    fn set_status(&self, id: TaskId, change: StatusChange) -> StoreResult<Task> {
        let _guard = self.write_lock.lock();
        let mut task = self.read_task(id)?;
        apply_change(&mut task, change)?;
        self.write_task(&task)?;
        Ok(task)
    }

    fn delete_task(&self, id: TaskId) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        let task = self.read_task(id)?;
        if !task.status.is_terminal() {
            return Err(StoreError::TaskActive(id));
        }
        fs::remove_dir_all(self.task_dir(id))?;
        Ok(())
    }

    fn append_output(&self, line: &OutputLine) -> StoreResult<()> {
        let dir = self.task_dir(line.task_id);
        if !dir.join(TASK_FILE).exists() {
            return Err(StoreError::not_found("Task", line.task_id));
        }

        let _guard = self.write_lock.lock();
        let mut file = open_private(
            &dir.join(OUTPUT_FILE),
            OpenOptions::new().create(true).append(true),
        )?;
        let mut json = serde_json::to_string(line)?;
        json.push('\n');
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    fn get_output(&self, id: TaskId) -> StoreResult<Vec<OutputLine>> {
        let dir = self.task_dir(id);
        if !dir.join(TASK_FILE).exists() {
            return Err(StoreError::not_found("Task", id));
        }

        let path = dir.join(OUTPUT_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&path)?);
        let raw: Vec<String> = reader
            .lines()
            .filter(|line| !line.as_ref().is_ok_and(|l| l.trim().is_empty()))
            .collect::<std::io::Result<_>>()?;

        let mut lines = Vec::with_capacity(raw.len());
        for (index, line) in raw.iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(parsed) => lines.push(parsed),
                // A crash mid-append leaves at most the last line torn.
                Err(e) if index + 1 == raw.len() => {
                    tracing::warn!(
                        task_id = %id,
                        line = index + 1,
                        error = %e,
                        "Skipping torn output line"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(lines)
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
    use runbook_types::{ExitOutcome, TaskStatus};

    fn temp_store() -> (tempfile::TempDir, JsonlRecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlRecordStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_create_persists_task_file() {
        let (_dir, store) = temp_store();
        let task = store.create_task(TaskSpec::new(1, 1, "site.yml")).unwrap();

        assert!(store.task_dir(task.id).join("task.json").exists());
        let back = store.get_task(task.id).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_reopen_sees_existing_tasks() {
        let (dir, store) = temp_store();
        let task = store.create_task(TaskSpec::default()).unwrap();
        store.append_output(&OutputLine::new(task.id, "hello")).unwrap();
        drop(store);

        let reopened = JsonlRecordStore::new(dir.path());
        assert_eq!(reopened.list_tasks().unwrap().len(), 1);
        assert_eq!(reopened.get_output(task.id).unwrap()[0].text, "hello");
    }

    #[test]
    fn test_status_transitions_persist() {
        let (_dir, store) = temp_store();
        let task = store.create_task(TaskSpec::default()).unwrap();
        store
            .set_status(task.id, StatusChange::new(TaskStatus::Running))
            .unwrap();
        store
            .set_status(
                task.id,
                StatusChange::new(TaskStatus::Error)
                    .with_outcome(Some(ExitOutcome::Failed { code: 4 })),
            )
            .unwrap();

        let back = store.get_task(task.id).unwrap();
        assert_eq!(back.status, TaskStatus::Error);
        assert_eq!(back.outcome, Some(ExitOutcome::Failed { code: 4 }));
        assert!(back.started_at.is_some() && back.ended_at.is_some());

        let err = store
            .set_status(task.id, StatusChange::new(TaskStatus::Running))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_get_missing_task() {
        let (_dir, store) = temp_store();
        let err = store.get_task(TaskId::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "Task", .. }));
        assert!(store.list_tasks().unwrap().is_empty());
    }

    #[test]
    fn test_output_empty_before_first_line() {
        let (_dir, store) = temp_store();
        let task = store.create_task(TaskSpec::default()).unwrap();
        assert!(store.get_output(task.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_directory() {
        let (_dir, store) = temp_store();
        let task = store.create_task(TaskSpec::default()).unwrap();
        assert!(matches!(
            store.delete_task(task.id),
            Err(StoreError::TaskActive(_))
        ));

        store
            .set_status(task.id, StatusChange::new(TaskStatus::Stopped))
            .unwrap();
        store.delete_task(task.id).unwrap();
        assert!(!store.task_dir(task.id).exists());
    }

    #[test]
    fn test_torn_last_output_line_is_skipped() {
        let (_dir, store) = temp_store();
        let task = store.create_task(TaskSpec::default()).unwrap();
        store.append_output(&OutputLine::new(task.id, "one")).unwrap();
        store.append_output(&OutputLine::new(task.id, "two")).unwrap();

        let path = store.task_dir(task.id).join(OUTPUT_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"task_id":"#).unwrap();
        drop(file);

        let lines = store.get_output(task.id).unwrap();
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["one", "two"]);
    }

    #[test]
    fn test_malformed_middle_output_line_is_an_error() {
        let (_dir, store) = temp_store();
        let task = store.create_task(TaskSpec::default()).unwrap();
        let path = store.task_dir(task.id).join(OUTPUT_FILE);
        fs::write(&path, "not json\n").unwrap();
        store.append_output(&OutputLine::new(task.id, "after")).unwrap();

        assert!(store.get_output(task.id).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_task_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = temp_store();
        let task = store.create_task(TaskSpec::default()).unwrap();
        store.append_output(&OutputLine::new(task.id, "secret")).unwrap();
        store
            .set_status(task.id, StatusChange::new(TaskStatus::Running))
            .unwrap();

        let dir = store.task_dir(task.id);
        for name in [TASK_FILE, OUTPUT_FILE] {
            let mode = fs::metadata(dir.join(name)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{name}");
        }
    }

    #[test]
    fn test_list_ignores_foreign_entries() {
        let (dir, store) = temp_store();
        store.create_task(TaskSpec::default()).unwrap();
        fs::create_dir_all(dir.path().join("tasks").join("not-a-task")).unwrap();

        assert_eq!(store.list_tasks().unwrap().len(), 1);
    }
}
