//! Signal-driven shutdown and restart of the whole scheduler service

use std::sync::Arc;

use model_swapper::bus::InMemoryBus;
use model_swapper::config::SwapperConfig;
use model_swapper::service::ModelSchedulerService;
use model_swapper::swapper::runner::ProcessSpawner;
use model_swapper::{ModelRequest, RunnerExit};
use nix::sys::signal::{Signal, raise};
use serial_test::serial;
use tokio::time::{Duration, sleep, timeout};

use crate::helpers::*;

fn test_config(runner_bin: std::path::PathBuf) -> SwapperConfig {
    SwapperConfig {
        concurrency: Some(2),
        runner_bin,
        graceful_stop_secs: 2,
        kill_wait_secs: 5,
        controller_stop_timeout_secs: 20,
    }
}

// Scenario: SIGTERM while a model runs. The service drains the active model,
// publishes its result, and run() reports "do not restart".
#[tokio::test]
#[serial]
async fn sigterm_drains_and_exits() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_runner_script(&dir, "runner.sh", WELL_BEHAVED_RUNNER);
    let (bus, req_tx, mut res_rx) = InMemoryBus::new();
    let config = test_config(script.clone());
    let mut service =
        ModelSchedulerService::new(&config, bus, Arc::new(ProcessSpawner::new(script))).unwrap();

    req_tx
        .send(ModelRequest::Start {
            model_id: "m1".to_string(),
        })
        .await
        .unwrap();

    let run = tokio::spawn(async move { service.run().await });
    // Let the controller pick up the request before pulling the plug.
    sleep(Duration::from_millis(300)).await;
    raise(Signal::SIGTERM).unwrap();

    let restart = timeout(Duration::from_secs(30), run)
        .await
        .expect("service did not shut down in time")
        .unwrap()
        .unwrap();
    assert!(!restart);

    let result = res_rx.recv().await.expect("no result for the drained model");
    assert_eq!(result.model_id, "m1");
    assert_eq!(result.exit, RunnerExit::Exited(0));

    drop(req_tx);
}

// Scenario: SIGHUP asks for a rebuild. run() reports "restart", and a fresh
// service instance comes up on the same bus without tripping the
// single-owner signal pipe assertion.
#[tokio::test]
#[serial]
async fn sighup_requests_restart_and_service_rebuilds() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_runner_script(&dir, "runner.sh", WELL_BEHAVED_RUNNER);
    let (bus, req_tx, _res_rx) = InMemoryBus::new();
    let spawner = Arc::new(ProcessSpawner::new(script.clone()));
    let config = test_config(script);

    let mut service =
        ModelSchedulerService::new(&config, bus.clone(), spawner.clone()).unwrap();
    let run = tokio::spawn(async move {
        let restart = service.run().await;
        drop(service);
        restart
    });
    sleep(Duration::from_millis(300)).await;
    raise(Signal::SIGHUP).unwrap();

    let restart = timeout(Duration::from_secs(30), run)
        .await
        .expect("service did not stop on hangup in time")
        .unwrap()
        .unwrap();
    assert!(restart);

    // The rebuilt instance owns a fresh self-pipe and answers SIGTERM.
    let mut service = ModelSchedulerService::new(&config, bus, spawner).unwrap();
    let run = tokio::spawn(async move { service.run().await });
    sleep(Duration::from_millis(300)).await;
    raise(Signal::SIGTERM).unwrap();

    let restart = timeout(Duration::from_secs(30), run)
        .await
        .expect("rebuilt service did not shut down in time")
        .unwrap()
        .unwrap();
    assert!(!restart);

    drop(req_tx);
}

// The request side of the bus closing is a clean shutdown, not an error.
#[tokio::test]
#[serial]
async fn closed_bus_shuts_the_service_down() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_runner_script(&dir, "runner.sh", WELL_BEHAVED_RUNNER);
    let (bus, req_tx, _res_rx) = InMemoryBus::new();
    let config = test_config(script.clone());
    let mut service =
        ModelSchedulerService::new(&config, bus, Arc::new(ProcessSpawner::new(script))).unwrap();

    drop(req_tx);

    let restart = timeout(Duration::from_secs(10), service.run())
        .await
        .expect("service did not notice the closed bus")
        .unwrap();
    assert!(!restart);
}
