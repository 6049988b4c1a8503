//! Public handle to a running engine.

use std::sync::Arc;

use parking_lot::Mutex;
use runbook_types::{OutputLine, Task, TaskId, TaskSpec, TaskStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifacts::{ensure_tmp_dir, sweep_stale};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result, StoreError};
use crate::notify::Notifier;
use crate::output::{OutputBroadcaster, Subscription};
use crate::runner::{CommandRunner, ProcessRunner};
use crate::scheduler::{Scheduler, SchedulerCommand, Shared};
use crate::store::{RecordStore, StatusChange};

/// Task execution engine.
///
/// Owns one scheduler task that runs submitted tasks strictly one at a time
/// in submission order. Dropping the engine stops it the same way
/// [`shutdown`](Engine::shutdown) does, without waiting.
pub struct Engine {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<SchedulerCommand>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Start an engine that runs processes with [`ProcessRunner`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: EngineConfig,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let runner = Arc::new(ProcessRunner::new(config.stop_grace, config.line_buffer));
        Self::start_with_runner(config, store, notifier, runner)
    }

    /// Start an engine with a custom [`CommandRunner`].
    pub fn start_with_runner(
        config: EngineConfig,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        if config.command.trim().is_empty() {
            return Err(EngineError::Config("command must not be empty".to_string()));
        }

        ensure_tmp_dir(&config.tmp_dir).map_err(|e| EngineError::io(&config.tmp_dir, e))?;
        if config.sweep_on_startup {
            match sweep_stale(&config.tmp_dir, config.stale_after, false) {
                Ok(result) if !result.removed.is_empty() => {
                    info!(removed = result.removed.len(), "Swept stale task artifacts");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Stale artifact sweep failed"),
            }
        }

        let output = OutputBroadcaster::new(store.clone(), notifier.clone(), config.listener_buffer);
        let (status_rev, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            store,
            notifier,
            output,
            runner,
            config,
            status_rev,
        });

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::new(shared.clone(), commands_rx, shutdown.clone());
        let worker = tokio::spawn(scheduler.run());

        info!(
            tmp_dir = %shared.config.tmp_dir.display(),
            command = %shared.config.command,
            "Engine started"
        );
        Ok(Self {
            shared,
            commands,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    // ─────────────────────────────────────────────────────────────────────
    // Control
    // ─────────────────────────────────────────────────────────────────────

    /// Persist a new task and queue it behind any waiting ones.
    pub fn submit(&self, spec: TaskSpec) -> Result<TaskId> {
        let task = self.shared.store.create_task(spec)?;
        self.enqueue(&task)?;
        Ok(task.id)
    }

    /// Like [`submit`](Self::submit), with a listener registered before the
    /// task can start, so the stream carries every line.
    pub fn submit_with_output(&self, spec: TaskSpec) -> Result<(TaskId, Subscription)> {
        let task = self.shared.store.create_task(spec)?;
        let subscription = self.shared.output.subscribe(task.id);
        if let Err(e) = self.enqueue(&task) {
            self.shared.output.unsubscribe(&subscription);
            return Err(e);
        }
        Ok((task.id, subscription))
    }

    fn enqueue(&self, task: &Task) -> Result<()> {
        if self.commands.send(SchedulerCommand::Submit(task.id)).is_err() {
            // Never reaches the queue; do not leave it waiting forever.
            if let Err(e) = self
                .shared
                .transition(task.id, StatusChange::new(TaskStatus::Stopped))
            {
                warn!(task_id = %task.id, error = %e, "Failed to stop rejected task");
            }
            return Err(EngineError::ShutDown);
        }
        info!(task_id = %task.id, template_id = task.template_id, "Task submitted");
        Ok(())
    }

    /// Stop a task.
    ///
    /// A waiting task becomes `Stopped` without running; a running task is
    /// killed and becomes `Stopped` once its process is gone. Stopping a
    /// finished task does nothing.
    pub fn stop(&self, task_id: TaskId) -> Result<()> {
        let task = self.shared.store.get_task(task_id)?;
        if task.status.is_terminal() {
            return Ok(());
        }
        if task.status == TaskStatus::Waiting {
            // Whichever of this and the scheduler's Waiting -> Running
            // lands first in the store wins.
            match self
                .shared
                .transition(task_id, StatusChange::new(TaskStatus::Stopped))
            {
                Ok(_) => {
                    info!(task_id = %task_id, "Waiting task stopped");
                    // Only drops the queue entry; a gone scheduler has none.
                    let _ = self.commands.send(SchedulerCommand::Stop(task_id));
                    return Ok(());
                }
                Err(StoreError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            if self.get_status(task_id)?.is_terminal() {
                return Ok(());
            }
        }
        self.commands
            .send(SchedulerCommand::Stop(task_id))
            .map_err(|_| EngineError::ShutDown)
    }

    /// Stop the running task, mark every waiting task `Stopped`, and wait
    /// for the scheduler to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────

    /// Live output of a task from now on.
    ///
    /// The stream ends when the task finishes; for a task that already has,
    /// it ends immediately. Earlier lines come from [`get_output`](Self::get_output).
    pub fn subscribe_output(&self, task_id: TaskId) -> Result<Subscription> {
        self.shared.store.get_task(task_id)?;
        let subscription = self.shared.output.subscribe(task_id);
        // Checked after registering so a finish in between is not missed.
        if self.get_status(task_id)?.is_terminal() {
            self.shared.output.unsubscribe(&subscription);
            return Ok(Subscription::closed(task_id));
        }
        Ok(subscription)
    }

    /// Stop receiving on `subscription`.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.shared.output.unsubscribe(subscription);
    }

    pub fn get_status(&self, task_id: TaskId) -> Result<TaskStatus> {
        Ok(self.shared.store.get_task(task_id)?.status)
    }

    pub fn get_task(&self, task_id: TaskId) -> Result<Task> {
        Ok(self.shared.store.get_task(task_id)?)
    }

    pub fn get_output(&self, task_id: TaskId) -> Result<Vec<OutputLine>> {
        Ok(self.shared.store.get_output(task_id)?)
    }

    /// All tasks, newest first.
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.shared.store.list_tasks()?)
    }

    /// Delete a finished task and its output.
    pub fn remove_task(&self, task_id: TaskId) -> Result<()> {
        self.shared.store.delete_task(task_id)?;
        self.shared.output.close(task_id);
        info!(task_id = %task_id, "Task removed");
        Ok(())
    }

    /// Wait until `task_id` reaches a terminal status and return it.
    pub async fn wait_for_completion(&self, task_id: TaskId) -> Result<TaskStatus> {
        let mut rev = self.shared.status_rev.subscribe();
        loop {
            let status = self.get_status(task_id)?;
            if status.is_terminal() {
                return Ok(status);
            }
            if rev.changed().await.is_err() {
                return Err(EngineError::ShutDown);
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
