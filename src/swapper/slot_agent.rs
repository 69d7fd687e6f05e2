//! SlotAgent - sequences model runner lifecycles within one slot
//!
//! Each agent owns exactly one execution slot and runs as its own tokio task,
//! draining one FIFO mailbox. All mutation of the slot's model state happens
//! inside that task; callers only enqueue commands. This single-writer rule
//! is what makes two models in one slot impossible by construction.
//!
//! ## Slot state machine
//!
//! ```text
//! IDLE ──start_model──▶ RUNNING ──stop_model / runner exit──▶ STOPPING
//!   ▲                                                            │
//!   │                                              exit status known,
//!   │                                              callback fired
//!   └────────────release_slot─────── STOPPED_PENDING_RELEASE ◀───┘
//! ```
//!
//! An explicit stop and a spontaneous process death take the same stop path;
//! "crashed" and "stopped" are deliberately indistinguishable downstream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::fatal;
use crate::{ModelId, RunnerExit};

use super::messages::{ModelFinishedCallback, SlotCommand};
use super::runner::{ModelRunner, RunnerSpawner, StopTimeouts};

/// Mailbox depth per slot agent.
const MAILBOX_DEPTH: usize = 32;

/// Bound on how long `close()` waits for the agent task to exit. Must cover
/// a full two-stage runner stop.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-slot model bookkeeping. Owned exclusively by the agent task; no other
/// context ever touches it.
struct CurrentModelState {
    model_id: ModelId,

    /// Live process proxy; `None` once the stop sequence has consumed it.
    runner: Option<ModelRunner>,

    /// Fired exactly once, after `exit_status` is recorded.
    finished: Option<ModelFinishedCallback>,

    /// A stop sequence has begun, whether requested or detected.
    stop_pending: bool,

    /// The stop was requested via `stop_model`, not detected via exit.
    stop_requested: bool,

    /// Raw exit status; set exactly once, after the process terminated.
    exit_status: Option<RunnerExit>,
}

struct SlotAgent {
    slot_id: usize,
    command_rx: mpsc::Receiver<SlotCommand>,
    /// Handed to the spawner so runner monitors can post exit events.
    command_tx: mpsc::Sender<SlotCommand>,
    spawner: Arc<dyn RunnerSpawner>,
    stop_timeouts: StopTimeouts,
    current: Option<CurrentModelState>,
}

impl SlotAgent {
    #[instrument(skip(self), fields(slot = self.slot_id))]
    async fn run(mut self) {
        debug!("slot agent started");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                SlotCommand::StartModel { model_id, finished } => {
                    self.handle_start(model_id, finished);
                }
                SlotCommand::SendInput { rows } => self.handle_send_input(rows).await,
                SlotCommand::StopModel => self.handle_stop().await,
                SlotCommand::RunnerExited { pid, exit } => self.handle_runner_exited(pid, exit),
                SlotCommand::ReleaseSlot => self.handle_release(),
                SlotCommand::Close { done } => {
                    self.handle_close().await;
                    let _ = done.send(());
                    break;
                }
            }
        }

        debug!("slot agent stopped");
    }

    fn handle_start(&mut self, model_id: ModelId, finished: ModelFinishedCallback) {
        assert!(
            self.current.is_none(),
            "slot {}: start_model while slot still holds model {}",
            self.slot_id,
            self.current.as_ref().map(|c| c.model_id.as_str()).unwrap_or("?"),
        );

        debug!(model = %model_id, "starting model runner");
        let handle = match self.spawner.spawn(&model_id, self.command_tx.clone()) {
            Ok(handle) => handle,
            // A slot that cannot spawn its runner cannot be left
            // half-assigned; escalate like any other agent fault.
            Err(e) => panic!(
                "slot {}: failed to spawn runner for model {}: {}",
                self.slot_id, model_id, e
            ),
        };
        info!(model = %model_id, pid = handle.pid(), "model runner started");

        self.current = Some(CurrentModelState {
            runner: Some(ModelRunner::new(
                model_id.clone(),
                handle,
                self.stop_timeouts,
            )),
            model_id,
            finished: Some(finished),
            stop_pending: false,
            stop_requested: false,
            exit_status: None,
        });
    }

    async fn handle_send_input(&mut self, rows: Vec<String>) {
        let Some(current) = self.current.as_mut() else {
            warn!(rows = rows.len(), "input for an empty slot, dropping");
            return;
        };
        if current.stop_pending {
            warn!(model = %current.model_id, rows = rows.len(), "input after stop began, dropping");
            return;
        }
        let runner = current
            .runner
            .as_mut()
            .expect("running model without a live runner");
        if let Err(e) = runner.send_rows(&rows).await {
            // Broken pipe usually means the runner died and its exit event is
            // already queued behind this command.
            warn!(model = %current.model_id, error = %e, "failed to forward rows to runner");
        }
    }

    async fn handle_stop(&mut self) {
        let Some(current) = self.current.as_mut() else {
            panic!("slot {}: stop_model with no model assigned", self.slot_id);
        };
        if current.stop_pending {
            // The runner exited on its own just before the explicit stop
            // arrived; nothing left to stop.
            warn!(model = %current.model_id, "stop_model raced an already-pending stop, ignoring");
            return;
        }
        current.stop_requested = true;
        self.finish_stop().await;
    }

    /// Drive the stop sequence to completion. Blocks the agent loop until the
    /// exit status is known; the slot takes no new work until then.
    async fn finish_stop(&mut self) {
        let (model_id, mut runner) = {
            let current = self
                .current
                .as_mut()
                .expect("stop sequence with no model assigned");
            current.stop_pending = true;
            let runner = current
                .runner
                .take()
                .expect("stop sequence with no live runner");
            (current.model_id.clone(), runner)
        };

        let exit = match runner.stop_gracefully().await {
            Ok(exit) => exit,
            Err(e) => panic!(
                "slot {}: runner for model {} (pid {}) would not stop: {}",
                self.slot_id,
                model_id,
                runner.pid(),
                e
            ),
        };
        self.record_exit(exit);
    }

    fn handle_runner_exited(&mut self, pid: u32, exit: RunnerExit) {
        let Some(current) = self.current.as_mut() else {
            // Late monitor delivery for a slot already torn down or released.
            debug!(pid, "runner exit for an empty slot, ignoring");
            return;
        };
        match current.runner.as_ref() {
            Some(runner) if runner.pid() == pid => {}
            Some(runner) => {
                warn!(pid, current_pid = runner.pid(), "runner exit for a stale pid, ignoring");
                return;
            }
            None => {
                // stop_gracefully already consumed this exit through the
                // monitor's watch channel; the mailbox copy is redundant.
                debug!(pid, "runner exit already observed during stop, ignoring");
                return;
            }
        }

        debug!(pid, model = %current.model_id, "runner exited on its own");
        // A spontaneous death takes the same path as a deliberate stop. The
        // monitor already reaped the process, so the status is final here.
        current.stop_pending = true;
        current.runner = None;
        self.record_exit(exit);
    }

    /// Record the exit status and fire the finished callback, in that order.
    fn record_exit(&mut self, exit: RunnerExit) {
        let current = self
            .current
            .as_mut()
            .expect("recording an exit with no model assigned");
        assert!(
            current.exit_status.is_none(),
            "slot {}: exit status for model {} recorded twice",
            self.slot_id,
            current.model_id,
        );
        current.exit_status = Some(exit);

        info!(model = %current.model_id, ?exit, requested = current.stop_requested, "model finished");
        let finished = current
            .finished
            .take()
            .expect("finished callback already consumed");
        finished(exit);
    }

    fn handle_release(&mut self) {
        let Some(current) = self.current.take() else {
            panic!("slot {}: release_slot with no model assigned", self.slot_id);
        };
        assert!(
            current.exit_status.is_some(),
            "slot {}: release_slot before the finished callback fired for model {}",
            self.slot_id,
            current.model_id,
        );
        debug!(model = %current.model_id, "slot released");
    }

    async fn handle_close(&mut self) {
        let Some(mut current) = self.current.take() else {
            debug!("closing idle slot agent");
            return;
        };

        // Shutdown short-circuit: no finished callback, no release handshake.
        info!(model = %current.model_id, "closing slot agent with active model, force-stopping");
        if let Some(mut runner) = current.runner.take() {
            if let Err(e) = runner.stop_gracefully().await {
                panic!(
                    "slot {}: runner for model {} would not stop during close: {}",
                    self.slot_id, current.model_id, e
                );
            }
        }
    }
}

/// Handle for one slot agent.
///
/// Producers are non-blocking apart from mailbox backpressure; completion of
/// a start is signalled via the finished callback, never a return value.
pub struct SlotAgentHandle {
    slot_id: usize,
    sender: mpsc::Sender<SlotCommand>,
    join: tokio::task::JoinHandle<()>,
}

impl SlotAgentHandle {
    /// Spawn a new agent task owning `slot_id`.
    pub fn spawn(
        slot_id: usize,
        spawner: Arc<dyn RunnerSpawner>,
        stop_timeouts: StopTimeouts,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        let agent = SlotAgent {
            slot_id,
            command_rx: rx,
            command_tx: tx.clone(),
            spawner,
            stop_timeouts,
            current: None,
        };
        let join = tokio::spawn(fatal::guarded("slot agent", agent.run()));

        Self {
            slot_id,
            sender: tx,
            join,
        }
    }

    pub fn slot_id(&self) -> usize {
        self.slot_id
    }

    /// Assign a model to this slot. Precondition: the slot's previous
    /// occupant (if any) was released.
    pub async fn start_model(
        &self,
        model_id: ModelId,
        finished: ModelFinishedCallback,
    ) -> anyhow::Result<()> {
        self.send(SlotCommand::StartModel { model_id, finished })
            .await
    }

    /// Forward input rows to the running model.
    pub async fn send_input(&self, rows: Vec<String>) -> anyhow::Result<()> {
        self.send(SlotCommand::SendInput { rows }).await
    }

    /// Begin graceful shutdown of the running model. Precondition: a model
    /// is assigned to this slot.
    pub async fn stop_model(&self) -> anyhow::Result<()> {
        self.send(SlotCommand::StopModel).await
    }

    /// Acknowledge the finished model, making the slot eligible for the next
    /// `start_model`. Precondition: the finished callback has fired.
    pub async fn release_slot(&self) -> anyhow::Result<()> {
        self.send(SlotCommand::ReleaseSlot).await
    }

    /// Tear the agent down unconditionally. An active model is force-stopped
    /// without firing its finished callback and without the release
    /// handshake. Blocks until the agent task has exited.
    pub async fn close(self) -> anyhow::Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(SlotCommand::Close { done: done_tx }).await?;
        let _ = done_rx.await;

        match timeout(CLOSE_TIMEOUT, self.join).await {
            Ok(joined) => {
                joined?;
                Ok(())
            }
            Err(_) => panic!(
                "slot agent {} failed to close within {:?}",
                self.slot_id, CLOSE_TIMEOUT
            ),
        }
    }

    async fn send(&self, cmd: SlotCommand) -> anyhow::Result<()> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("slot agent {} mailbox closed", self.slot_id))
    }
}
