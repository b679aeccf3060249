//! Host monitoring agent
//!
//! Runs configured checks on a fixed schedule and streams the resulting
//! measurements, in InfluxDB line protocol, to stdout and/or an HTTP
//! endpoint in batches.

pub mod actors;
pub mod checks;
pub mod config;
pub mod datasource;
pub mod measurement;
pub mod scheduler;
pub mod tailer;
pub mod util;
