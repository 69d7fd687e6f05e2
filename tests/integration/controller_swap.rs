//! Swap controller tests with real runner processes

use std::sync::Arc;

use model_swapper::bus::InMemoryBus;
use model_swapper::swapper::controller::SwapController;
use model_swapper::swapper::runner::ProcessSpawner;
use model_swapper::{ModelRequest, ModelResult, RunnerExit};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Duration, timeout};

use crate::helpers::*;

async fn recv_result(rx: &mut UnboundedReceiver<ModelResult>) -> ModelResult {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no model result published in time")
        .expect("result channel closed")
}

// More models than slots: the overflow model waits until a slot frees up,
// then runs and produces its own result.
#[tokio::test]
async fn overflow_model_swaps_in_when_a_slot_frees() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_runner_script(&dir, "runner.sh", WELL_BEHAVED_RUNNER);
    let (bus, req_tx, mut res_rx) = InMemoryBus::new();
    let controller = SwapController::new(
        2,
        bus,
        Arc::new(ProcessSpawner::new(script)),
        short_timeouts(),
    );
    let stop = controller.stop_handle();
    let join = tokio::spawn(controller.run());

    for model in ["m1", "m2", "m3"] {
        req_tx
            .send(ModelRequest::Start {
                model_id: model.to_string(),
            })
            .await
            .unwrap();
    }

    req_tx
        .send(ModelRequest::Stop {
            model_id: "m1".to_string(),
        })
        .await
        .unwrap();
    let result = recv_result(&mut res_rx).await;
    assert_eq!(result.model_id, "m1");
    assert_eq!(result.exit, RunnerExit::Exited(0));

    // m3 now holds the freed slot; stopping it must produce a result.
    req_tx
        .send(ModelRequest::Stop {
            model_id: "m3".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(recv_result(&mut res_rx).await.model_id, "m3");

    stop.request_stop_ts();
    timeout(Duration::from_secs(30), join)
        .await
        .expect("controller did not stop in time")
        .unwrap()
        .unwrap();

    // m2 was drained during shutdown.
    assert_eq!(recv_result(&mut res_rx).await.model_id, "m2");
}

// A model crashing on its own frees its slot and publishes a result without
// any stop request.
#[tokio::test]
async fn crashed_model_publishes_result_and_frees_slot() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_runner_script(&dir, "runner.sh", SELF_EXITING_RUNNER);
    let (bus, req_tx, mut res_rx) = InMemoryBus::new();
    let controller = SwapController::new(
        1,
        bus,
        Arc::new(ProcessSpawner::new(script)),
        short_timeouts(),
    );
    let stop = controller.stop_handle();
    let join = tokio::spawn(controller.run());

    req_tx
        .send(ModelRequest::Start {
            model_id: "m1".to_string(),
        })
        .await
        .unwrap();
    req_tx
        .send(ModelRequest::Start {
            model_id: "m2".to_string(),
        })
        .await
        .unwrap();

    // Both runners exit immediately; both results must come through, with
    // the crashed slot recycled in between.
    let first = recv_result(&mut res_rx).await;
    let second = recv_result(&mut res_rx).await;
    assert_eq!(first.model_id, "m1");
    assert_eq!(first.exit, RunnerExit::Exited(7));
    assert_eq!(second.model_id, "m2");

    stop.request_stop_ts();
    timeout(Duration::from_secs(30), join)
        .await
        .expect("controller did not stop in time")
        .unwrap()
        .unwrap();
}
