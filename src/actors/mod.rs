//! Actors moving measurements from task bodies to their destinations
//!
//! Each actor runs as an independent async task communicating via Tokio
//! channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!   Scheduler ──► WorkerPool ──► task bodies
//!                                     │ Publisher::publish
//!                                     ▼
//!                             ┌──────────────┐
//!                             │ PipelineActor│ (fan-out, in order)
//!                             └──────┬───────┘
//!                    ┌───────────────┼───────────────┐
//!                    ▼               ▼               ▼
//!              ┌──────────┐    ┌───────────┐   ┌───────────┐
//!              │PrintSink │    │ BatchSink │   │ ...       │
//!              └──────────┘    └─────┬─────┘   └───────────┘
//!                                    │ Transport::post
//!                                    ▼
//!                             HTTP endpoint
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Measurements**: bounded mpsc queues end to end, nothing is dropped
//!    before a sink has seen it
//! 2. **Commands**: each actor has an mpsc command channel for control messages
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod batch;
pub mod messages;
pub mod pipeline;
pub mod sink;
