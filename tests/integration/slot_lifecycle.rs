//! Slot agent lifecycle tests against real OS processes

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use model_swapper::RunnerExit;
use model_swapper::swapper::messages::ModelFinishedCallback;
use model_swapper::swapper::runner::ProcessSpawner;
use model_swapper::swapper::slot_agent::SlotAgentHandle;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::time::{Duration, timeout};

use crate::helpers::*;

fn counting_callback(
    count: Arc<AtomicUsize>,
) -> (ModelFinishedCallback, UnboundedReceiver<RunnerExit>) {
    let (tx, rx) = unbounded_channel();
    let callback = Box::new(move |exit| {
        count.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(exit);
    });
    (callback, rx)
}

async fn recv_exit(rx: &mut UnboundedReceiver<RunnerExit>) -> RunnerExit {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("finished callback did not fire in time")
        .expect("callback channel closed")
}

// Scenario: one slot runs two models back to back through the full
// start/stop/release handshake, with real subprocesses.
#[tokio::test]
async fn slot_runs_two_models_back_to_back() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_runner_script(&dir, "runner.sh", WELL_BEHAVED_RUNNER);
    let spawner = Arc::new(ProcessSpawner::new(script));
    let handle = SlotAgentHandle::spawn(0, spawner, short_timeouts());
    let count = Arc::new(AtomicUsize::new(0));

    let (callback, mut exit_rx) = counting_callback(count.clone());
    handle.start_model("m1".to_string(), callback).await.unwrap();
    handle
        .send_input(vec!["1.0,2.0".to_string(), "3.0,4.0".to_string()])
        .await
        .unwrap();
    handle.stop_model().await.unwrap();
    assert_eq!(recv_exit(&mut exit_rx).await, RunnerExit::Exited(0));

    handle.release_slot().await.unwrap();

    let (callback, mut exit_rx) = counting_callback(count.clone());
    handle.start_model("m2".to_string(), callback).await.unwrap();
    handle.stop_model().await.unwrap();
    assert_eq!(recv_exit(&mut exit_rx).await, RunnerExit::Exited(0));

    handle.release_slot().await.unwrap();
    handle.close().await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

// P5 against a real process: the runner exits on its own, no stop_model
// was ever issued, and the callback still fires exactly once.
#[tokio::test]
async fn crashing_runner_still_finishes_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_runner_script(&dir, "runner.sh", SELF_EXITING_RUNNER);
    let spawner = Arc::new(ProcessSpawner::new(script));
    let handle = SlotAgentHandle::spawn(0, spawner, short_timeouts());
    let count = Arc::new(AtomicUsize::new(0));

    let (callback, mut exit_rx) = counting_callback(count.clone());
    handle.start_model("m1".to_string(), callback).await.unwrap();

    assert_eq!(recv_exit(&mut exit_rx).await, RunnerExit::Exited(7));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    handle.release_slot().await.unwrap();
    handle.close().await.unwrap();
}

// A runner that ignores stdin close gets SIGKILLed after the graceful wait.
#[tokio::test]
async fn stubborn_runner_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_runner_script(&dir, "runner.sh", STUBBORN_RUNNER);
    let spawner = Arc::new(ProcessSpawner::new(script));
    let handle = SlotAgentHandle::spawn(0, spawner, short_timeouts());
    let count = Arc::new(AtomicUsize::new(0));

    let (callback, mut exit_rx) = counting_callback(count.clone());
    handle.start_model("m1".to_string(), callback).await.unwrap();
    handle.stop_model().await.unwrap();

    assert_eq!(
        recv_exit(&mut exit_rx).await,
        RunnerExit::Signaled(nix::sys::signal::Signal::SIGKILL as i32)
    );

    handle.release_slot().await.unwrap();
    handle.close().await.unwrap();
}

// close() tears down a live runner without firing the callback.
#[tokio::test]
async fn close_with_live_runner_skips_callback() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_runner_script(&dir, "runner.sh", WELL_BEHAVED_RUNNER);
    let spawner = Arc::new(ProcessSpawner::new(script));
    let handle = SlotAgentHandle::spawn(0, spawner, short_timeouts());
    let count = Arc::new(AtomicUsize::new(0));

    let (callback, _exit_rx) = counting_callback(count.clone());
    handle.start_model("m1".to_string(), callback).await.unwrap();
    handle.close().await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 0);
}
