pub mod bus;
pub mod config;
pub mod fatal;
pub mod service;
pub mod signals;
pub mod swapper;
pub mod util;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of one anomaly-detection model instance.
pub type ModelId = String;

/// One command pulled off the interface bus, addressed to a single model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelRequest {
    /// Schedule the model onto a free slot, or queue it until one frees up.
    Start { model_id: ModelId },

    /// Forward input rows to an already-running model.
    Input { model_id: ModelId, rows: Vec<String> },

    /// Stop the model and free its slot.
    Stop { model_id: ModelId },
}

impl ModelRequest {
    pub fn model_id(&self) -> &str {
        match self {
            ModelRequest::Start { model_id }
            | ModelRequest::Input { model_id, .. }
            | ModelRequest::Stop { model_id } => model_id,
        }
    }
}

/// Terminal status of a model runner process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "code", rename_all = "snake_case")]
pub enum RunnerExit {
    /// Process exited on its own with this status code.
    Exited(i32),

    /// Process was terminated by this signal number.
    Signaled(i32),
}

impl RunnerExit {
    pub fn success(&self) -> bool {
        matches!(self, RunnerExit::Exited(0))
    }

    pub fn from_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match status.code() {
            Some(code) => RunnerExit::Exited(code),
            None => RunnerExit::Signaled(status.signal().unwrap_or(0)),
        }
    }
}

/// Published on the bus once a model's process has fully terminated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResult {
    pub model_id: ModelId,
    pub exit: RunnerExit,
    pub finished_at: DateTime<Utc>,
}
