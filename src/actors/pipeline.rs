//! PipelineActor - Fans measurements out to every registered sink
//!
//! Task bodies publish into a single ingress queue. The actor drains it and
//! re-publishes each measurement, in arrival order, to the private queue of
//! every registered sink, waiting for each sink to accept before moving on.
//!
//! ## Message Flow
//!
//! ```text
//! Publisher ─┐
//! Publisher ─┼─► ingress ─► PipelineActor ─┬─► PrintSink
//! Publisher ─┘                  ↑          └─► BatchSink
//!                               └─── Commands (Register, GetStats)
//! ```
//!
//! Nothing is dropped: a sink that stops draining stalls the whole
//! measurement stream, and with it every publisher.

use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, trace, warn};

use crate::measurement::Measurement;

use super::messages::{PipelineCommand, PipelineStats, SharedMeasurement};
use super::sink::Sink;

/// Capacity of the ingress queue and of every sink queue
const QUEUE_CAPACITY: usize = 1;

/// Returned when the pipeline actor is no longer running
#[derive(Debug, Error)]
#[error("measurement pipeline is closed")]
pub struct PublishError;

/// Cloneable entry point for task bodies
#[derive(Clone, Debug)]
pub struct Publisher {
    ingress: mpsc::Sender<Measurement>,
}

impl Publisher {
    /// Hand a measurement to the pipeline
    ///
    /// Waits while the pipeline is busy delivering earlier measurements.
    pub async fn publish(&self, measurement: Measurement) -> Result<(), PublishError> {
        self.ingress.send(measurement).await.map_err(|_| PublishError)
    }
}

struct SinkQueue {
    name: String,
    tx: mpsc::Sender<SharedMeasurement>,
}

/// Actor owning the sink queues
pub struct PipelineActor {
    ingress_rx: mpsc::Receiver<Measurement>,
    command_rx: mpsc::Receiver<PipelineCommand>,
    sinks: Vec<SinkQueue>,
    published: u64,
}

impl PipelineActor {
    pub fn new(
        ingress_rx: mpsc::Receiver<Measurement>,
        command_rx: mpsc::Receiver<PipelineCommand>,
    ) -> Self {
        Self {
            ingress_rx,
            command_rx,
            sinks: vec![],
            published: 0,
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until every publisher (including the handle) has been dropped.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting pipeline actor");

        loop {
            tokio::select! {
                // registrations take effect before any measurement still queued
                biased;

                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd);
                }

                received = self.ingress_rx.recv() => {
                    match received {
                        Some(measurement) => self.broadcast(measurement).await,
                        None => {
                            debug!("all publishers gone, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("pipeline actor stopped");
    }

    fn handle_command(&mut self, cmd: PipelineCommand) {
        match cmd {
            PipelineCommand::Register {
                name,
                sink_tx,
                respond_to,
            } => {
                debug!("registering sink {name}");
                self.sinks.push(SinkQueue { name, tx: sink_tx });
                let _ = respond_to.send(());
            }

            PipelineCommand::GetStats { respond_to } => {
                let _ = respond_to.send(PipelineStats {
                    published: self.published,
                    sinks: self.sinks.len(),
                });
            }
        }
    }

    async fn broadcast(&mut self, measurement: Measurement) {
        let measurement = Arc::new(measurement);
        self.published += 1;

        let mut closed = vec![];
        for (idx, sink) in self.sinks.iter().enumerate() {
            if sink.tx.send(measurement.clone()).await.is_err() {
                warn!("sink {} stopped receiving, removing it", sink.name);
                closed.push(idx);
            }
        }

        for idx in closed.into_iter().rev() {
            self.sinks.remove(idx);
        }

        trace!(
            "delivered {} to {} sinks",
            measurement.name,
            self.sinks.len()
        );
    }
}

/// Handle for the pipeline actor
///
/// Holds an ingress sender itself, so the pipeline stays alive as long as the
/// handle does.
#[derive(Clone)]
pub struct PipelineHandle {
    sender: mpsc::Sender<PipelineCommand>,
    publisher: Publisher,
}

impl PipelineHandle {
    /// Spawn the pipeline actor
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (ingress_tx, ingress_rx) = mpsc::channel(QUEUE_CAPACITY);

        let actor = PipelineActor::new(ingress_rx, cmd_rx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            publisher: Publisher {
                ingress: ingress_tx,
            },
        }
    }

    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Spawn `sink` on its own task and attach it to the pipeline
    ///
    /// Returns once the pipeline has accepted the registration.
    pub async fn register<S: Sink>(&self, sink: S) -> Result<()> {
        let name = sink.name().to_string();
        let (sink_tx, sink_rx) = mpsc::channel(QUEUE_CAPACITY);

        tokio::spawn(Box::new(sink).run(sink_rx));

        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PipelineCommand::Register {
                name,
                sink_tx,
                respond_to: tx,
            })
            .await
            .context("failed to send Register command")?;

        rx.await.context("failed to receive registration ack")?;
        Ok(())
    }

    /// Get pipeline statistics
    pub async fn get_stats(&self) -> Option<PipelineStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PipelineCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }
}
