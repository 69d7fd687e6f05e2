//! Model runner process proxy
//!
//! Owns one OS process per active model and detects its termination reliably.
//! The runner executable is invoked as `<runner-bin> <model-id>` with its
//! stdin piped; closing that pipe tells the runner no more work is coming and
//! it should finish up and exit on its own.
//!
//! A dedicated monitor task blocks on process-wait and, upon exit, reports
//! the status exactly once: into a watch channel consumed by the proxy's own
//! `stop_gracefully`, and as a `RunnerExited` command into the owning slot
//! agent's mailbox. The mailbox event is the sole path by which a spontaneous
//! process death reaches the agent loop.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::{ModelId, RunnerExit};

use super::error::{RunnerError, RunnerResult};
use super::messages::SlotCommand;

/// Two-stage stop budget for one runner process.
///
/// These are operational tuning knobs, not protocol invariants; the defaults
/// match what production runs with.
#[derive(Debug, Clone, Copy)]
pub struct StopTimeouts {
    /// Wait after closing stdin before escalating to SIGKILL.
    pub graceful_stop: Duration,

    /// Wait after SIGKILL before declaring the process unkillable.
    pub kill_wait: Duration,
}

impl Default for StopTimeouts {
    fn default() -> Self {
        Self {
            graceful_stop: Duration::from_secs(240),
            kill_wait: Duration::from_secs(10),
        }
    }
}

/// OS-process-handle capability for one live runner.
///
/// Kept narrow (write stdin, close stdin, kill, observe exit) so the slot
/// agent logic is testable against a fake handle.
#[async_trait]
pub trait RunnerHandle: Send {
    fn pid(&self) -> u32;

    /// Write newline-terminated rows to the runner's stdin.
    async fn send_rows(&mut self, rows: &[String]) -> RunnerResult<()>;

    async fn flush(&mut self) -> RunnerResult<()>;

    /// Close stdin, signalling the runner that no more work is coming.
    fn close_stdin(&mut self);

    /// Force-terminate the process.
    fn kill(&mut self) -> RunnerResult<()>;

    /// Resolve once the monitor task has reaped the process.
    async fn wait_exited(&mut self) -> RunnerExit;
}

/// Creates runner handles and wires their exit monitors back into the owning
/// slot agent's mailbox.
pub trait RunnerSpawner: Send + Sync {
    fn spawn(
        &self,
        model_id: &ModelId,
        events: mpsc::Sender<SlotCommand>,
    ) -> RunnerResult<Box<dyn RunnerHandle>>;
}

/// Spawns real OS processes running the configured model runner executable.
pub struct ProcessSpawner {
    runner_bin: PathBuf,
}

impl ProcessSpawner {
    pub fn new(runner_bin: impl Into<PathBuf>) -> Self {
        Self {
            runner_bin: runner_bin.into(),
        }
    }
}

impl RunnerSpawner for ProcessSpawner {
    fn spawn(
        &self,
        model_id: &ModelId,
        events: mpsc::Sender<SlotCommand>,
    ) -> RunnerResult<Box<dyn RunnerHandle>> {
        let mut child = Command::new(&self.runner_bin)
            .arg(model_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(RunnerError::Spawn)?;

        let pid = child
            .id()
            .ok_or_else(|| RunnerError::Spawn(io::Error::other("spawned child has no pid")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::Spawn(io::Error::other("spawned child has no stdin")))?;

        let (exit_tx, exit_rx) = watch::channel(None);
        let monitor_model = model_id.clone();

        // Monitor task: reap the child and report its exit exactly once. The
        // agent may already be gone by then (teardown via close), in which
        // case the mailbox send fails and that is fine.
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => RunnerExit::from_status(status),
                Err(e) => {
                    error!(pid, model = %monitor_model, error = %e, "waiting on model runner failed");
                    RunnerExit::Exited(-1)
                }
            };
            debug!(pid, model = %monitor_model, ?exit, "model runner process reaped");
            let _ = exit_tx.send(Some(exit));
            let _ = events.send(SlotCommand::RunnerExited { pid, exit }).await;
        });

        Ok(Box::new(ProcessHandle {
            pid,
            stdin: Some(stdin),
            exit_rx,
        }))
    }
}

struct ProcessHandle {
    pid: u32,
    /// Piped stdin; `None` once closed.
    stdin: Option<ChildStdin>,
    exit_rx: watch::Receiver<Option<RunnerExit>>,
}

#[async_trait]
impl RunnerHandle for ProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn send_rows(&mut self, rows: &[String]) -> RunnerResult<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            RunnerError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "runner stdin already closed",
            ))
        })?;
        for row in rows {
            stdin.write_all(row.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> RunnerResult<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            stdin.flush().await?;
        }
        Ok(())
    }

    fn close_stdin(&mut self) {
        // Dropping the handle closes the pipe, which is the EOF the runner
        // interprets as "finish and exit".
        self.stdin = None;
    }

    fn kill(&mut self) -> RunnerResult<()> {
        kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL).map_err(RunnerError::Kill)
    }

    async fn wait_exited(&mut self) -> RunnerExit {
        loop {
            if let Some(exit) = *self.exit_rx.borrow_and_update() {
                return exit;
            }
            if self.exit_rx.changed().await.is_err() {
                // Monitor dropped without reporting; only reachable if the
                // runtime is tearing down around us.
                return RunnerExit::Signaled(Signal::SIGKILL as i32);
            }
        }
    }
}

/// Proxy owning one live runner process on behalf of a slot agent.
pub struct ModelRunner {
    model_id: ModelId,
    handle: Box<dyn RunnerHandle>,
    timeouts: StopTimeouts,
}

impl ModelRunner {
    pub fn new(model_id: ModelId, handle: Box<dyn RunnerHandle>, timeouts: StopTimeouts) -> Self {
        Self {
            model_id,
            handle,
            timeouts,
        }
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Write rows to the runner and flush. A failure here is an I/O error the
    /// caller can distinguish from scheduling-logic faults.
    pub async fn send_rows(&mut self, rows: &[String]) -> RunnerResult<()> {
        self.handle.send_rows(rows).await?;
        self.handle.flush().await
    }

    /// Close stdin and wait for the process to exit on its own, escalating to
    /// SIGKILL after `graceful_stop`. Surviving `kill_wait` past SIGKILL is
    /// unrecoverable and surfaces as [`RunnerError::Unkillable`].
    pub async fn stop_gracefully(&mut self) -> RunnerResult<RunnerExit> {
        let pid = self.handle.pid();
        debug!(pid, model = %self.model_id, "closing runner stdin for graceful stop");
        self.handle.close_stdin();

        match timeout(self.timeouts.graceful_stop, self.handle.wait_exited()).await {
            Ok(exit) => return Ok(exit),
            Err(_) => {
                warn!(pid, model = %self.model_id, "runner ignored stdin close, sending SIGKILL");
            }
        }

        self.handle.kill()?;
        match timeout(self.timeouts.kill_wait, self.handle.wait_exited()).await {
            Ok(exit) => Ok(exit),
            Err(_) => Err(RunnerError::Unkillable { pid }),
        }
    }
}
