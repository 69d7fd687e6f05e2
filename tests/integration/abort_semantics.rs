//! Process-abort semantics for faults inside slot agents
//!
//! A fault inside an agent task must not strand its slot in a zombie state;
//! the whole process goes down with the reserved exit code instead. Verified
//! by re-running this test binary as a subprocess and letting the child walk
//! into the fault.

use std::process::Command;
use std::sync::Arc;

use model_swapper::fatal::THREAD_FAULT_EXIT_CODE;
use model_swapper::swapper::runner::ProcessSpawner;
use model_swapper::swapper::slot_agent::SlotAgentHandle;
use tokio::time::{Duration, sleep};

use crate::helpers::short_timeouts;

const FAULT_ENV: &str = "SWAPPER_TEST_SPAWN_FAULT";

async fn drive_into_spawn_fault() {
    let spawner = Arc::new(ProcessSpawner::new("/nonexistent/model-runner"));
    let handle = SlotAgentHandle::spawn(0, spawner, short_timeouts());
    let _ = handle
        .start_model("m1".to_string(), Box::new(|_| {}))
        .await;

    // The agent task panics on the failed spawn and the abort hook takes
    // the whole process down; getting past this sleep is the failure case.
    sleep(Duration::from_secs(30)).await;
    std::process::exit(1);
}

#[tokio::test]
async fn spawn_failure_aborts_the_process() {
    if std::env::var(FAULT_ENV).is_ok() {
        model_swapper::fatal::install_abort_hook();
        drive_into_spawn_fault().await;
    }

    let exe = std::env::current_exe().unwrap();
    let status = Command::new(exe)
        .args([
            "abort_semantics::spawn_failure_aborts_the_process",
            "--exact",
            "--nocapture",
        ])
        .env(FAULT_ENV, "1")
        .status()
        .unwrap();

    assert_eq!(status.code(), Some(THREAD_FAULT_EXIT_CODE));
}
