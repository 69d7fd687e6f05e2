use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::swapper::runner::StopTimeouts;

/// Top-level configuration for the scheduler binary.
///
/// All bounded-wait durations are operational tuning knobs; the serde
/// defaults match what production runs with.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SwapperConfig {
    /// Fixed slot count; omitted means "size from host resources".
    pub concurrency: Option<usize>,

    /// Model runner executable, invoked as `<runner_bin> <model-id>`.
    #[serde(default = "default_runner_bin")]
    pub runner_bin: PathBuf,

    /// Wait after closing a runner's stdin before escalating to SIGKILL.
    #[serde(default = "default_graceful_stop_secs")]
    pub graceful_stop_secs: u64,

    /// Wait after SIGKILL before declaring a runner unkillable.
    #[serde(default = "default_kill_wait_secs")]
    pub kill_wait_secs: u64,

    /// Wait for the swap controller to finish draining after a signal.
    #[serde(default = "default_controller_stop_timeout_secs")]
    pub controller_stop_timeout_secs: u64,
}

impl Default for SwapperConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::util::get_concurrency_override(),
            runner_bin: default_runner_bin(),
            graceful_stop_secs: default_graceful_stop_secs(),
            kill_wait_secs: default_kill_wait_secs(),
            controller_stop_timeout_secs: default_controller_stop_timeout_secs(),
        }
    }
}

impl SwapperConfig {
    pub fn stop_timeouts(&self) -> StopTimeouts {
        StopTimeouts {
            graceful_stop: Duration::from_secs(self.graceful_stop_secs),
            kill_wait: Duration::from_secs(self.kill_wait_secs),
        }
    }

    pub fn controller_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.controller_stop_timeout_secs)
    }
}

fn default_runner_bin() -> PathBuf {
    crate::util::get_runner_bin()
}

fn default_graceful_stop_secs() -> u64 {
    240
}

fn default_kill_wait_secs() -> u64 {
    10
}

fn default_controller_stop_timeout_secs() -> u64 {
    60
}

pub fn read_config_file(path: &str) -> anyhow::Result<SwapperConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
