//! SwapController - assigns pending models to free slots
//!
//! Pulls model requests off the interface bus and multiplexes them onto the
//! fixed pool of slot agents. Admission is strictly FIFO: the model that has
//! been waiting longest takes the next free slot. Results are published back
//! onto the bus once a model's process has fully terminated.
//!
//! `run()` drives the loop until a stop is requested through the thread-safe
//! [`ControllerStopHandle`]; stopping drains every active model before the
//! agents are closed, so no slot is ever abandoned mid-shutdown.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::bus::ModelCommandBus;
use crate::{ModelId, ModelRequest, ModelResult, RunnerExit};

use super::messages::ModelFinishedCallback;
use super::runner::{RunnerSpawner, StopTimeouts};
use super::slot_agent::SlotAgentHandle;

/// Internal notification posted by a finished callback.
#[derive(Debug)]
enum SlotEvent {
    ModelFinished {
        slot_id: usize,
        model_id: ModelId,
        exit: RunnerExit,
    },
}

/// Thread-safe stop requester; callable from a context other than the one
/// driving `run()`, including the signal path.
#[derive(Clone)]
pub struct ControllerStopHandle {
    stop_tx: watch::Sender<bool>,
}

impl ControllerStopHandle {
    /// Ask the controller to wind down: take no new models, stop all active
    /// slots, let `run()` return. Idempotent.
    pub fn request_stop_ts(&self) {
        let _ = self.stop_tx.send(true);
    }
}

pub struct SwapController {
    agents: Vec<SlotAgentHandle>,
    bus: Arc<dyn ModelCommandBus>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    event_tx: mpsc::UnboundedSender<SlotEvent>,
    event_rx: mpsc::UnboundedReceiver<SlotEvent>,
    /// Slot ids currently without a model, in release order.
    free_slots: VecDeque<usize>,
    /// Models waiting for a slot, in arrival order.
    pending: VecDeque<ModelId>,
    /// Running (or stopping-but-unreleased) models and their slots.
    active: HashMap<ModelId, usize>,
}

impl SwapController {
    /// Build a controller managing exactly `concurrency` slots.
    pub fn new(
        concurrency: usize,
        bus: Arc<dyn ModelCommandBus>,
        spawner: Arc<dyn RunnerSpawner>,
        stop_timeouts: StopTimeouts,
    ) -> Self {
        assert!(concurrency > 0, "swap controller needs at least one slot");

        let (stop_tx, stop_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let agents = (0..concurrency)
            .map(|slot_id| SlotAgentHandle::spawn(slot_id, spawner.clone(), stop_timeouts))
            .collect();

        info!(concurrency, "swap controller created");

        Self {
            agents,
            bus,
            stop_tx,
            stop_rx,
            event_tx,
            event_rx,
            free_slots: (0..concurrency).collect(),
            pending: VecDeque::new(),
            active: HashMap::new(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.agents.len()
    }

    pub fn stop_handle(&self) -> ControllerStopHandle {
        ControllerStopHandle {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Drive the scheduling loop until a stop is requested or the bus
    /// closes, then drain all active models and close every agent.
    #[instrument(skip(self), fields(concurrency = self.agents.len()))]
    pub async fn run(mut self) -> anyhow::Result<()> {
        debug!("swap controller running");
        let mut stop_rx = self.stop_rx.clone();
        let bus = self.bus.clone();

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        info!("stop requested, draining active models");
                        break;
                    }
                }
                request = bus.next_request() => {
                    match request {
                        Some(request) => self.handle_request(request).await?,
                        None => {
                            info!("command bus closed, draining active models");
                            break;
                        }
                    }
                }
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event).await?;
                }
            }
        }

        self.drain().await
    }

    async fn handle_request(&mut self, request: ModelRequest) -> anyhow::Result<()> {
        match request {
            ModelRequest::Start { model_id } => {
                if self.active.contains_key(&model_id) || self.pending.contains(&model_id) {
                    warn!(model = %model_id, "duplicate start request ignored");
                    return Ok(());
                }
                debug!(model = %model_id, "model queued");
                self.pending.push_back(model_id);
                self.dispatch_pending().await?;
            }
            ModelRequest::Input { model_id, rows } => match self.active.get(&model_id) {
                Some(&slot_id) => self.agents[slot_id].send_input(rows).await?,
                None => {
                    warn!(model = %model_id, "input for a model that is not running, dropping")
                }
            },
            ModelRequest::Stop { model_id } => {
                if let Some(&slot_id) = self.active.get(&model_id) {
                    self.agents[slot_id].stop_model().await?;
                } else if let Some(pos) = self.pending.iter().position(|m| m == &model_id) {
                    self.pending.remove(pos);
                    debug!(model = %model_id, "dropped queued model before it got a slot");
                } else {
                    warn!(model = %model_id, "stop for unknown model ignored");
                }
            }
        }
        Ok(())
    }

    /// FIFO admission: the longest-waiting model takes the next free slot.
    async fn dispatch_pending(&mut self) -> anyhow::Result<()> {
        while !self.pending.is_empty() && !self.free_slots.is_empty() {
            let model_id = self.pending.pop_front().expect("pending checked non-empty");
            let slot_id = self.free_slots.pop_front().expect("free checked non-empty");

            let event_tx = self.event_tx.clone();
            let event_model = model_id.clone();
            let finished: ModelFinishedCallback = Box::new(move |exit| {
                let _ = event_tx.send(SlotEvent::ModelFinished {
                    slot_id,
                    model_id: event_model,
                    exit,
                });
            });

            self.agents[slot_id].start_model(model_id.clone(), finished).await?;
            debug!(model = %model_id, slot = slot_id, "model assigned to slot");
            self.active.insert(model_id, slot_id);
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: SlotEvent) -> anyhow::Result<()> {
        let SlotEvent::ModelFinished {
            slot_id,
            model_id,
            exit,
        } = event;

        // Two-phase hand-off: acknowledge the finished model before the slot
        // may take new work.
        self.agents[slot_id].release_slot().await?;
        self.active.remove(&model_id);
        self.free_slots.push_back(slot_id);

        let result = ModelResult {
            model_id: model_id.clone(),
            exit,
            finished_at: Utc::now(),
        };
        if let Err(e) = self.bus.publish_result(result).await {
            warn!(model = %model_id, error = %e, "failed to publish model result");
        }

        self.dispatch_pending().await
    }

    /// Stop every active model, wait for each result, then close all agents.
    async fn drain(mut self) -> anyhow::Result<()> {
        self.pending.clear();

        let occupied: Vec<usize> = self.active.values().copied().collect();
        for slot_id in occupied {
            self.agents[slot_id].stop_model().await?;
        }

        while !self.active.is_empty() {
            match self.event_rx.recv().await {
                Some(event) => self.handle_event(event).await?,
                // Unreachable while we hold an event_tx, but do not hang on it.
                None => break,
            }
        }

        for agent in self.agents.drain(..) {
            agent.close().await?;
        }
        info!("swap controller stopped");
        Ok(())
    }
}
