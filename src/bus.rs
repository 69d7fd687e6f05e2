//! Model command bus seam
//!
//! The production message bus (AMQP) lives outside this crate; the swap
//! controller only needs a place to pull per-model requests from and push
//! results to. [`InMemoryBus`] backs tests and embedding, [`JsonLineBus`]
//! speaks newline-delimited JSON over arbitrary byte streams and is what the
//! scheduler binary wires to stdin/stdout.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, warn};

use crate::{ModelRequest, ModelResult};

/// Transport-agnostic interface between the swap controller and the rest of
/// the platform.
#[async_trait]
pub trait ModelCommandBus: Send + Sync {
    /// Next pending request, or `None` once the bus is permanently closed.
    ///
    /// Must be cancel-safe: the controller polls this inside a `select!`.
    async fn next_request(&self) -> Option<ModelRequest>;

    /// Publish the terminal result of one model.
    async fn publish_result(&self, result: ModelResult) -> anyhow::Result<()>;
}

/// Channel-backed bus for tests and in-process embedding.
pub struct InMemoryBus {
    requests: Mutex<mpsc::Receiver<ModelRequest>>,
    results: mpsc::UnboundedSender<ModelResult>,
}

impl InMemoryBus {
    /// Returns the bus plus the request sender and result receiver for the
    /// embedding side.
    pub fn new() -> (
        Arc<Self>,
        mpsc::Sender<ModelRequest>,
        mpsc::UnboundedReceiver<ModelResult>,
    ) {
        let (req_tx, req_rx) = mpsc::channel(64);
        let (res_tx, res_rx) = mpsc::unbounded_channel();
        let bus = Arc::new(Self {
            requests: Mutex::new(req_rx),
            results: res_tx,
        });
        (bus, req_tx, res_rx)
    }
}

#[async_trait]
impl ModelCommandBus for InMemoryBus {
    async fn next_request(&self) -> Option<ModelRequest> {
        self.requests.lock().await.recv().await
    }

    async fn publish_result(&self, result: ModelResult) -> anyhow::Result<()> {
        self.results
            .send(result)
            .map_err(|_| anyhow::anyhow!("result channel closed"))
    }
}

/// Newline-delimited JSON over byte streams.
///
/// A reader task parses requests line by line and feeds an internal channel,
/// keeping `next_request` cancel-safe regardless of the underlying stream.
/// Malformed lines are logged and skipped; a closed stream closes the bus.
pub struct JsonLineBus {
    requests: Mutex<mpsc::Receiver<ModelRequest>>,
    results: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl JsonLineBus {
    pub fn new(
        reader: impl AsyncBufRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Arc<Self> {
        let (req_tx, req_rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ModelRequest>(line) {
                            Ok(request) => {
                                if req_tx.send(request).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "discarding malformed model request line")
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("model request stream reached EOF");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "model request stream failed");
                        break;
                    }
                }
            }
        });

        Arc::new(Self {
            requests: Mutex::new(req_rx),
            results: Mutex::new(Box::new(writer)),
        })
    }
}

#[async_trait]
impl ModelCommandBus for JsonLineBus {
    async fn next_request(&self) -> Option<ModelRequest> {
        self.requests.lock().await.recv().await
    }

    async fn publish_result(&self, result: ModelResult) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(&result)?;
        line.push(b'\n');

        let mut writer = self.results.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}
