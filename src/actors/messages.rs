//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Measurements**: flow one way, task body → pipeline → sinks, over
//!    bounded mpsc channels so that a slow consumer stalls its producer
//! 2. **Commands**: request/response messages sent to a specific actor
//! 3. **Sharing**: sinks receive `Arc<Measurement>`, one allocation per result

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::measurement::Measurement;

/// What a sink receives from the pipeline
pub type SharedMeasurement = Arc<Measurement>;

/// Commands that can be sent to the pipeline (fan-out) actor
#[derive(Debug)]
pub enum PipelineCommand {
    /// Add a sink queue; every result broadcast afterwards is delivered to it
    Register {
        name: String,
        sink_tx: mpsc::Sender<SharedMeasurement>,
        respond_to: oneshot::Sender<()>,
    },

    /// Get pipeline statistics
    GetStats {
        respond_to: oneshot::Sender<PipelineStats>,
    },
}

/// Pipeline statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Results broadcast so far
    pub published: u64,

    /// Sinks currently registered
    pub sinks: usize,
}

/// Commands that can be sent to a BatchSink
#[derive(Debug)]
pub enum BatchCommand {
    /// Get batch statistics
    GetStats {
        respond_to: oneshot::Sender<BatchStats>,
    },
}

/// Batch sink statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Results waiting in the buffer
    pub buffered: usize,

    /// Flush attempts, successful or not
    pub flush_count: u64,

    /// Flush attempts the endpoint did not accept
    pub failed_flushes: u64,

    /// Results discarded together with a failed batch
    pub dropped: u64,
}
