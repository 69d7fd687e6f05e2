//! ModelSchedulerService - top-level supervisor
//!
//! Process entry point of the swapper: sizes the slot pool from host
//! resources, owns the swap controller, and bridges OS signals into the
//! cooperative shutdown protocol via the self-pipe. SIGHUP asks the driver
//! loop to rebuild the whole service (live reload without a process restart);
//! SIGTERM and SIGINT request a clean exit.

use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use sysinfo::System;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::bus::ModelCommandBus;
use crate::config::SwapperConfig;
use crate::fatal;
use crate::signals::SignalPipe;
use crate::swapper::controller::SwapController;
use crate::swapper::runner::{RunnerSpawner, StopTimeouts};

/// Floor for the computed slot count.
pub const MIN_CONCURRENCY: usize = 2;

/// Memory held back for the scheduler and the OS.
pub const BASE_RESERVATION_BYTES: u64 = 1 << 30;

/// Memory budget per model runner slot.
pub const PER_SLOT_MEMORY_BYTES: u64 = 2 << 30;

/// Slot concurrency for a host: leave one CPU for the scheduler and the OS,
/// respect the per-slot memory budget, never go below the floor.
pub fn compute_concurrency(cpu_count: usize, total_memory_bytes: u64) -> usize {
    let by_cpu = cpu_count.saturating_sub(1);
    let by_memory =
        (total_memory_bytes.saturating_sub(BASE_RESERVATION_BYTES) / PER_SLOT_MEMORY_BYTES) as usize;
    MIN_CONCURRENCY.max(by_cpu.min(by_memory))
}

/// Size the slot pool from the actual host.
pub fn detect_concurrency() -> usize {
    let mut sys = System::new_all();
    sys.refresh_all();
    let cpu_count = sys.cpus().len();
    let total_memory = sys.total_memory();
    let concurrency = compute_concurrency(cpu_count, total_memory);
    debug!(cpu_count, total_memory, concurrency, "sized slot pool from host resources");
    concurrency
}

pub struct ModelSchedulerService {
    concurrency: usize,
    signal_pipe: SignalPipe,
    bus: Arc<dyn ModelCommandBus>,
    spawner: Arc<dyn RunnerSpawner>,
    stop_timeouts: StopTimeouts,
    controller_stop_timeout: Duration,
}

impl ModelSchedulerService {
    /// Build a fresh service instance: size the slot pool, open the
    /// self-pipe, register the signal handlers.
    pub fn new(
        config: &SwapperConfig,
        bus: Arc<dyn ModelCommandBus>,
        spawner: Arc<dyn RunnerSpawner>,
    ) -> anyhow::Result<Self> {
        let concurrency = match config.concurrency {
            Some(n) => {
                debug!(concurrency = n, "using configured concurrency");
                n
            }
            None => {
                let n = detect_concurrency();
                info!(concurrency = n, "computed concurrency from host resources");
                n
            }
        };
        anyhow::ensure!(concurrency > 0, "concurrency must be positive");

        Ok(Self {
            concurrency,
            signal_pipe: SignalPipe::new()?,
            bus,
            spawner,
            stop_timeouts: config.stop_timeouts(),
            controller_stop_timeout: config.controller_stop_timeout(),
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run until a handled signal arrives or the bus closes. Returns `true`
    /// iff the signal was SIGHUP, i.e. the caller should rebuild a fresh
    /// service instance and run it again.
    #[instrument(skip(self), fields(concurrency = self.concurrency))]
    pub async fn run(&mut self) -> anyhow::Result<bool> {
        let controller = SwapController::new(
            self.concurrency,
            self.bus.clone(),
            self.spawner.clone(),
            self.stop_timeouts,
        );
        let stop = controller.stop_handle();
        let mut controller_join = tokio::spawn(fatal::guarded("swap controller", controller.run()));

        info!("model scheduler service running");

        let restart = tokio::select! {
            signum = self.signal_pipe.next_signal() => {
                let signum = signum?;
                info!(signum, "signal received, stopping swap controller");
                stop.request_stop_ts();
                match timeout(self.controller_stop_timeout, &mut controller_join).await {
                    Ok(joined) => joined??,
                    Err(_) => fatal::die(format_args!(
                        "swap controller failed to stop within {:?}",
                        self.controller_stop_timeout
                    )),
                }
                signum == Signal::SIGHUP as i32
            }
            joined = &mut controller_join => {
                joined??;
                info!("swap controller finished on its own, shutting down");
                false
            }
        };

        Ok(restart)
    }
}
