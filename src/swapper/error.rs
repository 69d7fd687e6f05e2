//! Error types for model runner process operations

use std::fmt;

/// Result type alias for runner process operations
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur while managing a model runner process
///
/// Caller-contract violations (starting a model in an occupied slot,
/// releasing an unfinished slot) are not represented here: those are
/// programming errors and assert inside the slot agent instead.
#[derive(Debug)]
pub enum RunnerError {
    /// Spawning the runner executable failed
    Spawn(std::io::Error),

    /// Writing to the runner's stdin failed, e.g. the process already died
    Io(std::io::Error),

    /// Delivering SIGKILL to the runner failed
    Kill(nix::Error),

    /// The process survived SIGKILL past the bounded wait
    Unkillable { pid: u32 },
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::Spawn(err) => write!(f, "failed to spawn model runner: {}", err),
            RunnerError::Io(err) => write!(f, "model runner stdin write failed: {}", err),
            RunnerError::Kill(err) => write!(f, "failed to kill model runner: {}", err),
            RunnerError::Unkillable { pid } => {
                write!(f, "model runner pid {} survived SIGKILL", pid)
            }
        }
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunnerError::Spawn(err) | RunnerError::Io(err) => Some(err),
            RunnerError::Kill(err) => Some(err),
            RunnerError::Unkillable { .. } => None,
        }
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        RunnerError::Io(err)
    }
}

impl RunnerError {
    /// True for I/O failures a caller may want to absorb, e.g. a broken pipe
    /// because the runner already exited on its own.
    pub fn is_io(&self) -> bool {
        matches!(self, RunnerError::Io(_))
    }
}
