//! BatchSink - Ships measurements to an HTTP endpoint in batches
//!
//! ## Batching Strategy
//!
//! Measurements are buffered and flushed on whichever trigger fires first:
//! - **Size trigger**: the buffer reached its capacity
//! - **Time trigger**: the flush interval ticked
//!
//! After a size-triggered flush the next timer tick is skipped once, so a
//! nearly empty batch is not sent right behind a full one.
//!
//! Every flush attempt empties the buffer. A batch the endpoint does not
//! accept is logged and discarded; there is no retry and no requeue.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, instrument, trace};

use super::messages::{BatchCommand, BatchStats, SharedMeasurement};
use super::sink::Sink;

/// Errors delivering a batch
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("error posting data: {0}")]
    Request(#[from] reqwest::Error),

    #[error("error posting data: expected status 204, got {0}")]
    UnexpectedStatus(StatusCode),
}

/// Delivery of one serialized batch
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Where batches go, for logging
    fn endpoint(&self) -> &str;

    async fn post(&self, body: String) -> Result<(), SinkError>;
}

/// Posts batches as `text/plain` and expects `204 No Content`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, body: String) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await?;

        if response.status() != StatusCode::NO_CONTENT {
            return Err(SinkError::UnexpectedStatus(response.status()));
        }

        Ok(())
    }
}

/// Why a flush happened, for logging
#[derive(Debug, Clone, Copy)]
enum FlushTrigger {
    Size,
    Time,
}

/// Sink accumulating measurements and posting them in batches
pub struct BatchSink<T> {
    transport: T,
    capacity: usize,
    flush_interval: Duration,
    buffer: Vec<SharedMeasurement>,
    skip_next_tick: bool,
    command_rx: mpsc::Receiver<BatchCommand>,
    stats: BatchStats,
}

impl<T: Transport> BatchSink<T> {
    /// Create the sink and a handle for querying it
    ///
    /// `capacity` is clamped to at least one.
    pub fn new(transport: T, capacity: usize, flush_interval: Duration) -> (Self, BatchHandle) {
        let capacity = capacity.max(1);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let sink = Self {
            transport,
            capacity,
            flush_interval,
            buffer: Vec::with_capacity(capacity),
            skip_next_tick: false,
            command_rx: cmd_rx,
            stats: BatchStats::default(),
        };

        (sink, BatchHandle { sender: cmd_tx })
    }

    async fn store(&mut self, measurement: SharedMeasurement) {
        self.buffer.push(measurement);

        if self.buffer.len() >= self.capacity {
            trace!("size-based flush triggered ({} measurements)", self.buffer.len());
            self.flush(FlushTrigger::Size).await;
            self.skip_next_tick = true;
        }
    }

    async fn on_tick(&mut self) {
        if self.skip_next_tick {
            trace!("skipping tick right after a size-based flush");
            self.skip_next_tick = false;
            return;
        }

        if self.buffer.is_empty() {
            trace!("tick with empty buffer, nothing to flush");
            return;
        }

        trace!("time-based flush triggered ({} measurements)", self.buffer.len());
        self.flush(FlushTrigger::Time).await;
    }

    async fn flush(&mut self, trigger: FlushTrigger) {
        let batch_size = self.buffer.len();
        let body: String = self
            .buffer
            .drain(..)
            .map(|measurement| format!("{measurement}\n"))
            .collect();

        self.stats.flush_count += 1;

        match self.transport.post(body).await {
            Ok(()) => {
                debug!(
                    "flush #{} ({:?}) delivered {} measurements to {}",
                    self.stats.flush_count,
                    trigger,
                    batch_size,
                    self.transport.endpoint()
                );
            }
            Err(e) => {
                self.stats.failed_flushes += 1;
                self.stats.dropped += batch_size as u64;
                error!(
                    "{}: {e}, dropping {batch_size} measurements",
                    self.transport.endpoint()
                );
            }
        }
    }

    fn handle_command(&self, cmd: BatchCommand) {
        match cmd {
            BatchCommand::GetStats { respond_to } => {
                let _ = respond_to.send(BatchStats {
                    buffered: self.buffer.len(),
                    ..self.stats.clone()
                });
            }
        }
    }
}

#[async_trait]
impl<T: Transport> Sink for BatchSink<T> {
    fn name(&self) -> &str {
        self.transport.endpoint()
    }

    #[instrument(skip_all, fields(endpoint = %self.transport.endpoint()))]
    async fn run(mut self: Box<Self>, mut rx: mpsc::Receiver<SharedMeasurement>) {
        debug!(
            "starting batch sink (capacity {}, interval {:?})",
            self.capacity, self.flush_interval
        );

        let mut ticker = time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                received = rx.recv() => {
                    match received {
                        Some(measurement) => self.store(measurement).await,
                        None => {
                            debug!("measurement queue closed, {} measurements left unsent", self.buffer.len());
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.on_tick().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd);
                }
            }
        }

        debug!("batch sink stopped");
    }
}

/// Handle for querying a running BatchSink
#[derive(Clone)]
pub struct BatchHandle {
    sender: mpsc::Sender<BatchCommand>,
}

impl BatchHandle {
    /// Get batch statistics
    pub async fn get_stats(&self) -> Option<BatchStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BatchCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }
}
