//! The scheduler task: one queue, one running task, everything in order.
//!
//! All queue state lives in [`Scheduler`], which is moved into a single
//! Tokio task. Callers talk to it through [`SchedulerCommand`]s; it talks
//! back through the record store, the notifier and the output broadcaster.

use std::collections::VecDeque;
use std::sync::Arc;

use runbook_types::{ExitOutcome, OutputLine, Task, TaskEvent, TaskId, TaskStatus};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifacts::{ArtifactSet, ensure_tmp_dir};
use crate::command::{PreparedRun, build_command};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result, StoreError, StoreResult};
use crate::inventory::resolve_inventory;
use crate::notify::Notifier;
use crate::output::OutputBroadcaster;
use crate::runner::{CommandRunner, RunHandle};
use crate::secrets::{KeyPurpose, install_key};
use crate::store::{RecordStore, StatusChange};

#[derive(Debug)]
pub(crate) enum SchedulerCommand {
    Submit(TaskId),
    Stop(TaskId),
}

/// State shared between the scheduler task and the engine handle.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) output: OutputBroadcaster,
    pub(crate) runner: Arc<dyn CommandRunner>,
    pub(crate) config: EngineConfig,
    /// Bumped on every status change.
    pub(crate) status_rev: watch::Sender<u64>,
}

impl Shared {
    /// Persist a status change, announce it, and close listeners once
    /// the task is finished.
    pub(crate) fn transition(&self, task_id: TaskId, change: StatusChange) -> StoreResult<Task> {
        let task = self.store.set_status(task_id, change)?;
        self.notifier.notify(TaskEvent::StatusChanged {
            task_id,
            status: task.status,
            at: change.at,
        });
        self.status_rev.send_modify(|rev| *rev += 1);
        if task.status.is_terminal() {
            self.output.close(task_id);
        }
        Ok(task)
    }

    fn emit(&self, task_id: TaskId, text: impl Into<String>) {
        if let Err(e) = self.output.publish(OutputLine::new(task_id, text)) {
            warn!(task_id = %task_id, error = %e, "Failed to record output line");
        }
    }
}

/// FIFO of waiting task ids.
#[derive(Debug, Default)]
struct TaskQueue {
    waiting: VecDeque<TaskId>,
}

impl TaskQueue {
    fn push(&mut self, task_id: TaskId) {
        self.waiting.push_back(task_id);
    }

    fn pop(&mut self) -> Option<TaskId> {
        self.waiting.pop_front()
    }

    fn remove(&mut self, task_id: TaskId) -> bool {
        match self.waiting.iter().position(|id| *id == task_id) {
            Some(index) => {
                self.waiting.remove(index);
                true
            }
            None => false,
        }
    }

    fn drain(&mut self) -> impl Iterator<Item = TaskId> + '_ {
        self.waiting.drain(..)
    }
}

pub(crate) struct Scheduler {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    shutdown: CancellationToken,
    queue: TaskQueue,
}

impl Scheduler {
    pub(crate) fn new(
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<SchedulerCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shared,
            commands,
            shutdown,
            queue: TaskQueue::default(),
        }
    }

    /// Run until shutdown is requested or every engine handle is gone.
    pub(crate) async fn run(mut self) {
        info!("Task scheduler started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            // Stops sent right after a submit must land before the pop.
            while let Ok(command) = self.commands.try_recv() {
                self.apply(command, None);
            }
            if let Some(task_id) = self.queue.pop() {
                self.execute(task_id).await;
                continue;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        self.apply(command, None);
                    }
                    None => break,
                },
            }
        }

        self.stop_remaining();
        info!("Task scheduler stopped");
    }

    /// Apply a command; returns true if the current run must be killed.
    fn apply(&mut self, command: SchedulerCommand, current: Option<TaskId>) -> bool {
        match command {
            SchedulerCommand::Submit(task_id) => {
                debug!(task_id = %task_id, "Task queued");
                self.queue.push(task_id);
                false
            }
            SchedulerCommand::Stop(task_id) if current == Some(task_id) => true,
            SchedulerCommand::Stop(task_id) => {
                if self.queue.remove(task_id) {
                    self.mark_stopped(task_id);
                } else {
                    debug!(task_id = %task_id, "Stop ignored; task is not waiting or running");
                }
                false
            }
        }
    }

    fn mark_stopped(&self, task_id: TaskId) {
        match self
            .shared
            .transition(task_id, StatusChange::new(TaskStatus::Stopped))
        {
            Ok(_) => info!(task_id = %task_id, "Waiting task stopped"),
            // Already stopped through Engine::stop.
            Err(StoreError::InvalidTransition { .. }) => {
                debug!(task_id = %task_id, "Waiting task was already stopped");
            }
            Err(e) => error!(task_id = %task_id, error = %e, "Failed to stop waiting task"),
        }
    }

    /// Everything still queued or in flight becomes Stopped.
    fn stop_remaining(&mut self) {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let SchedulerCommand::Submit(task_id) = command {
                self.queue.push(task_id);
            }
        }
        let remaining: Vec<_> = self.queue.drain().collect();
        for task_id in remaining {
            self.mark_stopped(task_id);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────

    async fn execute(&mut self, task_id: TaskId) {
        let task = match self.shared.store.get_task(task_id) {
            Ok(task) if task.status == TaskStatus::Waiting => task,
            Ok(task) => {
                debug!(task_id = %task_id, status = %task.status, "Skipping task that is no longer waiting");
                return;
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Queued task cannot be loaded");
                return;
            }
        };

        // The store decides atomically between this and a concurrent stop.
        match self
            .shared
            .transition(task_id, StatusChange::new(TaskStatus::Running))
        {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { .. }) => {
                debug!(task_id = %task_id, "Task was stopped before it could start");
                return;
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Failed to mark task running");
                return;
            }
        }
        info!(task_id = %task_id, template_id = task.template_id, "Task started");

        let mut artifacts = ArtifactSet::new(task_id);
        let (status, outcome) = match self.run_task(&task, &mut artifacts).await {
            Ok(outcome) => {
                match outcome {
                    ExitOutcome::Success => {}
                    ExitOutcome::Killed => {
                        self.shared.emit(task_id, EngineError::Killed.to_string());
                    }
                    ExitOutcome::Failed { .. } | ExitOutcome::Signaled { .. } => {
                        let e = EngineError::ProcessExecution { outcome };
                        self.shared.emit(task_id, format!("Task failed: {e}"));
                    }
                }
                (outcome.status(), Some(outcome))
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Task could not be started");
                self.shared.emit(task_id, format!("Task failed: {e}"));
                (TaskStatus::Error, None)
            }
        };

        // Artifacts go before the terminal status is visible.
        let removed = artifacts.cleanup();
        debug!(task_id = %task_id, removed, "Task artifacts cleaned up");

        match self
            .shared
            .transition(task_id, StatusChange::new(status).with_outcome(outcome))
        {
            Ok(_) => info!(task_id = %task_id, %status, "Task finished"),
            Err(e) => error!(task_id = %task_id, error = %e, "Failed to record final status"),
        }
    }

    async fn run_task(&mut self, task: &Task, artifacts: &mut ArtifactSet) -> Result<ExitOutcome> {
        let prepared = self.prepare(task, artifacts)?;
        let command = build_command(&self.shared.config, &task.spec, &prepared);
        info!(task_id = %task.id, command = %command, "Starting process");

        let handle = self.shared.runner.start(&command)?;
        debug!(task_id = %task.id, pid = ?handle.pid(), "Process running");
        Ok(self.supervise(task.id, handle).await)
    }

    /// Install keys and resolve the inventory, registering every file
    /// written in `artifacts`.
    fn prepare(&self, task: &Task, artifacts: &mut ArtifactSet) -> Result<PreparedRun> {
        let store = &self.shared.store;
        let tmp_dir = &self.shared.config.tmp_dir;
        let spec = &task.spec;
        ensure_tmp_dir(tmp_dir).map_err(|e| EngineError::io(tmp_dir, e))?;

        let mut prepared = PreparedRun::default();
        let inventory = spec.inventory_id.map(|id| store.get_inventory(id)).transpose()?;

        if let Some(key_id) = inventory.as_ref().and_then(|inv| inv.ssh_key_id) {
            let key = store.get_key(key_id)?;
            let path = install_key(tmp_dir, task.id, KeyPurpose::Ssh, &key)?;
            artifacts.track(&path);
            prepared.ssh_key = Some(path);
        }

        if let Some(key_id) = spec.vault_key_id {
            let key = store.get_key(key_id)?;
            let path = install_key(tmp_dir, task.id, KeyPurpose::Vault, &key)?;
            artifacts.track(&path);
            prepared.vault_password_file = Some(path);
        }

        if let Some(record) = inventory {
            let resolved =
                resolve_inventory(&record, task.id, tmp_dir, spec.working_directory.as_deref())?;
            if let Some(path) = resolved.temp_file() {
                artifacts.track(path);
            }
            prepared.inventory = Some(resolved);
        }

        if let Some(environment_id) = spec.environment_id {
            prepared.extra_vars = Some(store.get_environment(environment_id)?.json);
        }

        Ok(prepared)
    }

    /// Forward output until it closes, then wait for exit, serving stop
    /// and submit commands throughout.
    ///
    /// A run that was asked to stop reports `Killed` even if the process
    /// got to exit on its own first.
    async fn supervise(&mut self, task_id: TaskId, mut handle: RunHandle) -> ExitOutcome {
        let kill = handle.kill_switch();

        loop {
            tokio::select! {
                line = handle.read_line() => match line {
                    Some(text) => self.shared.emit(task_id, text),
                    None => break,
                },
                Some(command) = self.commands.recv() => {
                    if self.apply(command, Some(task_id)) {
                        info!(task_id = %task_id, "Stopping running task");
                        kill.cancel();
                    }
                }
                _ = self.shutdown.cancelled(), if !kill.is_cancelled() => {
                    info!(task_id = %task_id, "Shutdown requested; stopping running task");
                    kill.cancel();
                }
            }
        }

        // Lines read before the kill still belong to the record.
        for text in handle.drain_buffered() {
            self.shared.emit(task_id, text);
        }

        let outcome = loop {
            tokio::select! {
                outcome = handle.wait() => break outcome,
                Some(command) = self.commands.recv() => {
                    if self.apply(command, Some(task_id)) {
                        info!(task_id = %task_id, "Stopping running task");
                        kill.cancel();
                    }
                }
                _ = self.shutdown.cancelled(), if !kill.is_cancelled() => {
                    kill.cancel();
                }
            }
        };

        if kill.is_cancelled() && outcome != ExitOutcome::Killed {
            debug!(task_id = %task_id, %outcome, "Process ended on its own after a stop request");
            return ExitOutcome::Killed;
        }
        outcome
    }
}
