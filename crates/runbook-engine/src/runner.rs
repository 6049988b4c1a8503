//! Supervised subprocess execution.
//!
//! [`ProcessRunner`] spawns the command with piped stdout/stderr, pumps both
//! into one bounded line channel, and hands a supervisor task the child so
//! that a kill request can be served while the caller is blocked reading.
//!
//! ```text
//! stdout ─► pump ─┐
//!                 ├─► mpsc(line_buffer) ─► RunHandle::read_line
//! stderr ─► pump ─┘
//! child  ─► supervisor ─► oneshot(ExitOutcome) ─► RunHandle::wait
//!              ▲
//!              └── CancellationToken (RunHandle::kill)
//! ```

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use runbook_types::ExitOutcome;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::command::CommandSpec;
use crate::error::{EngineError, Result};

/// Longest line forwarded in one piece; longer lines are split.
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Starts commands. The seam tests use to observe or replace process
/// creation.
pub trait CommandRunner: Send + Sync {
    fn start(&self, command: &CommandSpec) -> Result<RunHandle>;
}

// ─────────────────────────────────────────────────────────────────────────────
// RunHandle
// ─────────────────────────────────────────────────────────────────────────────

/// A running process: its output lines, a kill switch and its exit outcome.
#[derive(Debug)]
pub struct RunHandle {
    pid: Option<u32>,
    cancel: CancellationToken,
    lines: mpsc::Receiver<String>,
    exit: oneshot::Receiver<ExitOutcome>,
    outcome: Option<ExitOutcome>,
}

impl RunHandle {
    /// Assemble a handle from its parts.
    ///
    /// The producer side must stop sending lines and report `Killed` on
    /// `exit` once `cancel` fires.
    pub fn new(
        pid: Option<u32>,
        cancel: CancellationToken,
        lines: mpsc::Receiver<String>,
        exit: oneshot::Receiver<ExitOutcome>,
    ) -> Self {
        Self {
            pid,
            cancel,
            lines,
            exit,
            outcome: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next output line, or `None` once output has closed or a kill was
    /// requested.
    pub async fn read_line(&mut self) -> Option<String> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            line = self.lines.recv() => line,
        }
    }

    /// Lines already received but not yet read. Never waits.
    pub fn drain_buffered(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.lines.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Request termination. Idempotent; no effect after exit.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    /// Token that kills this run when cancelled.
    pub fn kill_switch(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the process to end and return how it ended.
    pub async fn wait(&mut self) -> ExitOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        let outcome = match (&mut self.exit).await {
            Ok(outcome) => outcome,
            Err(_) if self.cancel.is_cancelled() => ExitOutcome::Killed,
            Err(_) => {
                error!(pid = ?self.pid, "Process supervisor went away without an exit status");
                ExitOutcome::Failed { code: -1 }
            }
        };
        self.outcome = Some(outcome);
        outcome
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProcessRunner
// ─────────────────────────────────────────────────────────────────────────────

/// Default runner backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    stop_grace: Duration,
    line_buffer: usize,
}

impl ProcessRunner {
    pub fn new(stop_grace: Duration, line_buffer: usize) -> Self {
        Self {
            stop_grace,
            line_buffer: line_buffer.max(1),
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 64)
    }
}

impl CommandRunner for ProcessRunner {
    fn start(&self, spec: &CommandSpec) -> Result<RunHandle> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        // Own process group so a stop reaches everything the tool forks.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| EngineError::ProcessStart {
            command: spec.program.clone(),
            source: e,
        })?;
        let pid = child.id();
        debug!(?pid, program = %spec.program, "Spawned process");

        let (line_tx, line_rx) = mpsc::channel(self.line_buffer);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, line_tx));
        }

        let cancel = CancellationToken::new();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(supervise(child, pid, cancel.clone(), self.stop_grace, exit_tx));

        Ok(RunHandle::new(pid, cancel, line_rx, exit_rx))
    }
}

/// Forward lines from `reader` until EOF or the receiver goes away.
async fn pump_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match (&mut reader)
            .take(MAX_LINE_BYTES)
            .read_until(b'\n', &mut buf)
            .await
        {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output stream closed with error");
                break;
            }
        }
    }
}

async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    cancel: CancellationToken,
    grace: Duration,
    exit_tx: oneshot::Sender<ExitOutcome>,
) {
    let outcome = tokio::select! {
        biased;
        status = child.wait() => match status {
            Ok(status) => outcome_from_status(status),
            Err(e) => {
                error!(?pid, error = %e, "Failed to wait for process");
                ExitOutcome::Failed { code: -1 }
            }
        },
        _ = cancel.cancelled() => {
            terminate(&mut child, pid, grace).await;
            ExitOutcome::Killed
        }
    };
    debug!(?pid, %outcome, "Process finished");
    let _ = exit_tx.send(outcome);
}

/// SIGTERM the process group, then SIGKILL once `grace` runs out.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_group(pid, libc::SIGTERM);
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(?pid, ?status, "Process exited after stop request"),
        Ok(Err(e)) => warn!(?pid, error = %e, "Failed to wait for stopped process"),
        Err(_) => {
            warn!(?pid, grace_secs = grace.as_secs_f64(), "Process ignored SIGTERM; killing");
            #[cfg(unix)]
            if let Some(pid) = pid {
                signal_group(pid, libc::SIGKILL);
            }
            let _ = child.start_kill();
            if let Err(e) = child.wait().await {
                warn!(?pid, error = %e, "Failed to reap killed process");
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid signals the process group we
    // created at spawn; it has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc != 0 {
        debug!(pid, signal, error = %std::io::Error::last_os_error(), "kill(2) failed");
    }
}

fn outcome_from_status(status: ExitStatus) -> ExitOutcome {
    if status.success() {
        return ExitOutcome::Success;
    }
    if let Some(code) = status.code() {
        return ExitOutcome::Failed { code };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitOutcome::Signaled { signal };
        }
    }
    ExitOutcome::Failed { code: -1 }
}
