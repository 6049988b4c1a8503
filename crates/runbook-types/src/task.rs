//! Task types: the request, its lifecycle status, and its output.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{RecordId, Timestamp, now};

/// Unique identifier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random task id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a task id from its hyphenated string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// The first eight hex digits, used in file names and log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a task.
///
/// ```text
/// Waiting ──► Running ──► Success | Error | Stopped
///    └───────────────────────────────────► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Running,
    Success,
    Error,
    Stopped,
}

impl TaskStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Stopped)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Waiting, Self::Running) => true,
            (Self::Waiting, Self::Stopped) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Exit outcome
// ─────────────────────────────────────────────────────────────────────────────

/// How the automation process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitOutcome {
    /// Exited with code 0.
    Success,
    /// Exited with a non-zero code.
    Failed { code: i32 },
    /// Terminated by a signal nobody asked for.
    Signaled { signal: i32 },
    /// Terminated because a stop was requested.
    Killed,
}

impl ExitOutcome {
    /// Terminal task status this outcome maps to.
    pub fn status(self) -> TaskStatus {
        match self {
            Self::Success => TaskStatus::Success,
            Self::Killed => TaskStatus::Stopped,
            Self::Failed { .. } | Self::Signaled { .. } => TaskStatus::Error,
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "exited successfully"),
            Self::Failed { code } => write!(f, "exited with code {code}"),
            Self::Signaled { signal } => write!(f, "terminated by signal {signal}"),
            Self::Killed => write!(f, "stopped by request"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Spec & record
// ─────────────────────────────────────────────────────────────────────────────

/// A request to run a playbook.
///
/// Everything the engine needs to prepare and launch the run; referenced
/// records (inventory, keys, environment) are looked up in the record-store
/// when the task reaches the head of the queue, not at submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    pub project_id: RecordId,
    pub template_id: RecordId,
    /// Playbook file passed last on the command line. Empty means none.
    pub playbook: String,
    pub inventory_id: Option<RecordId>,
    pub environment_id: Option<RecordId>,
    /// Key installed as the vault password file.
    pub vault_key_id: Option<RecordId>,
    /// Extra arguments from the template, passed first.
    pub arguments: Vec<String>,
    /// Working directory (usually the repository checkout).
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables for the process.
    pub env: BTreeMap<String, String>,
    pub debug: bool,
    pub dry_run: bool,
    pub diff: bool,
}

impl TaskSpec {
    /// Spec for the given project/template running `playbook`.
    pub fn new(project_id: RecordId, template_id: RecordId, playbook: impl Into<String>) -> Self {
        Self {
            project_id,
            template_id,
            playbook: playbook.into(),
            ..Default::default()
        }
    }

    pub fn with_inventory(mut self, inventory_id: RecordId) -> Self {
        self.inventory_id = Some(inventory_id);
        self
    }

    pub fn with_environment(mut self, environment_id: RecordId) -> Self {
        self.environment_id = Some(environment_id);
        self
    }

    pub fn with_vault_key(mut self, key_id: RecordId) -> Self {
        self.vault_key_id = Some(key_id);
        self
    }

    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A task as persisted by the record-store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: RecordId,
    pub template_id: RecordId,
    pub spec: TaskSpec,
    pub status: TaskStatus,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExitOutcome>,
}

impl Task {
    /// A new waiting task for `spec`.
    pub fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            project_id: spec.project_id,
            template_id: spec.template_id,
            spec,
            status: TaskStatus::Waiting,
            created_at: now(),
            started_at: None,
            ended_at: None,
            outcome: None,
        }
    }
}

/// One line of task output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub task_id: TaskId,
    pub timestamp: Timestamp,
    pub text: String,
}

impl OutputLine {
    /// A line stamped with the current time.
    pub fn new(task_id: TaskId, text: impl Into<String>) -> Self {
        Self {
            task_id,
            timestamp: now(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use TaskStatus::*;
        assert!(Waiting.can_transition_to(Running));
        assert!(Waiting.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Success));
        assert!(Running.can_transition_to(Error));
        assert!(Running.can_transition_to(Stopped));
    }

    #[test]
    fn test_illegal_transitions() {
        use TaskStatus::*;
        assert!(!Waiting.can_transition_to(Success));
        assert!(!Waiting.can_transition_to(Error));
        assert!(!Running.can_transition_to(Waiting));
        assert!(!Running.can_transition_to(Running));
        for terminal in [Success, Error, Stopped] {
            for next in [Waiting, Running, Success, Error, Stopped] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_outcome_maps_to_status() {
        assert_eq!(ExitOutcome::Success.status(), TaskStatus::Success);
        assert_eq!(ExitOutcome::Failed { code: 2 }.status(), TaskStatus::Error);
        assert_eq!(ExitOutcome::Signaled { signal: 9 }.status(), TaskStatus::Error);
        assert_eq!(ExitOutcome::Killed.status(), TaskStatus::Stopped);
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Stopped).unwrap();
        assert_eq!(json, "\"stopped\"");
        let outcome = serde_json::to_value(ExitOutcome::Failed { code: 3 }).unwrap();
        assert_eq!(outcome["kind"], "failed");
        assert_eq!(outcome["code"], 3);
    }

    #[test]
    fn test_task_id_short_and_parse() {
        let id = TaskId::new();
        assert_eq!(id.short().len(), 8);
        assert_eq!(TaskId::parse(&id.to_string()), Some(id));
        assert_eq!(TaskId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_spec_defaults_from_partial_json() {
        let spec: TaskSpec =
            serde_json::from_str(r#"{"project_id": 1, "template_id": 2, "playbook": "site.yml"}"#)
                .unwrap();
        assert_eq!(spec.playbook, "site.yml");
        assert!(spec.inventory_id.is_none());
        assert!(spec.arguments.is_empty());
        assert!(!spec.debug);
    }
}
