//! Message types for slot agent mailboxes
//!
//! Every mutation of per-slot state travels through exactly one of these
//! commands, processed one at a time by the owning agent task. This is what
//! makes the per-slot bookkeeping safe without any locking.

use std::fmt;

use tokio::sync::oneshot;

use crate::{ModelId, RunnerExit};

/// Invoked exactly once, when the model's process has fully terminated.
///
/// The exit status is always recorded before the callback fires.
pub type ModelFinishedCallback = Box<dyn FnOnce(RunnerExit) + Send + 'static>;

/// Commands drained one at a time by a slot agent's mailbox loop
pub enum SlotCommand {
    /// Assign a model to this slot and spawn its runner process.
    ///
    /// Precondition: the slot is empty (previous occupant released).
    StartModel {
        model_id: ModelId,
        finished: ModelFinishedCallback,
    },

    /// Forward input rows to the running model's stdin.
    SendInput { rows: Vec<String> },

    /// Begin graceful shutdown of the running model.
    StopModel,

    /// Acknowledge a finished model, freeing the slot for the next one.
    ReleaseSlot,

    /// Posted by a runner's monitor task once the OS process is reaped.
    ///
    /// This is the only channel through which asynchronous process death
    /// reaches the agent loop.
    RunnerExited { pid: u32, exit: RunnerExit },

    /// Unconditional teardown; skips the finished callback and the release
    /// handshake.
    Close { done: oneshot::Sender<()> },
}

impl fmt::Debug for SlotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotCommand::StartModel { model_id, .. } => f
                .debug_struct("StartModel")
                .field("model_id", model_id)
                .finish_non_exhaustive(),
            SlotCommand::SendInput { rows } => f
                .debug_struct("SendInput")
                .field("rows", &rows.len())
                .finish(),
            SlotCommand::StopModel => write!(f, "StopModel"),
            SlotCommand::ReleaseSlot => write!(f, "ReleaseSlot"),
            SlotCommand::RunnerExited { pid, exit } => f
                .debug_struct("RunnerExited")
                .field("pid", pid)
                .field("exit", exit)
                .finish(),
            SlotCommand::Close { .. } => write!(f, "Close"),
        }
    }
}
