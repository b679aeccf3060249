//! Failure tests for the measurement flow
//!
//! These tests verify that failures stay contained:
//! - Rejected or unreachable batch endpoints
//! - Checks failing on some runs
//! - Configuration errors at startup

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use hostwatch::actors::batch::{BatchSink, HttpTransport};
use hostwatch::actors::pipeline::PipelineHandle;
use hostwatch::checks::{Check, CheckError, build_tasks, into_task};
use hostwatch::config::{ConfigError, SystemSpec};
use hostwatch::datasource::DataSources;
use hostwatch::measurement::{Point, Reading};
use hostwatch::scheduler::Scheduler;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

/// Fails on every second run
#[derive(Debug)]
struct Flaky {
    runs: i64,
}

#[async_trait]
impl Check for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn execute(&mut self) -> Result<Vec<Reading>, CheckError> {
        self.runs += 1;
        if self.runs % 2 == 0 {
            return Err(CheckError::UnexpectedValue {
                what: "flaky",
                value: self.runs.to_string(),
            });
        }
        Ok(vec![Reading::new(self.runs)])
    }
}

fn value(line: &str) -> i64 {
    line.split(' ')
        .nth(1)
        .and_then(|field| field.strip_prefix("value="))
        .unwrap()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn test_failing_check_stays_scheduled() {
    let pipeline = PipelineHandle::spawn();
    let collecting = CollectingSink::default();
    pipeline.register(collecting.clone()).await.unwrap();

    let task = into_task(
        Box::new(Flaky { runs: 0 }),
        "flaky".into(),
        Arc::new(Point::new("h", "shop", "prod")),
        Duration::from_millis(50),
        pipeline.publisher(),
    );
    let scheduler = tokio::spawn(Scheduler::new(vec![task], 1).run());

    let lines = collecting.wait_for(3, Duration::from_secs(5)).await;
    scheduler.abort();

    let values: Vec<i64> = lines.iter().take(3).map(|line| value(line)).collect();
    assert_eq!(values, vec![1, 3, 5]);
}

#[tokio::test]
async fn test_rejected_batches_are_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let pipeline = PipelineHandle::spawn();
    let collecting = CollectingSink::default();
    pipeline.register(collecting.clone()).await.unwrap();
    let (sink, batch) = BatchSink::new(
        HttpTransport::new(reqwest::Client::new(), format!("{}/write", server.uri())),
        2,
        Duration::from_secs(60),
    );
    pipeline.register(sink).await.unwrap();

    let task = into_task(
        Box::new(Flaky { runs: 0 }),
        "flaky".into(),
        Arc::new(Point::new("h", "shop", "prod")),
        Duration::from_millis(20),
        pipeline.publisher(),
    );
    let scheduler = tokio::spawn(Scheduler::new(vec![task], 1).run());

    // the stream keeps flowing past the failing endpoint
    collecting.wait_for(6, Duration::from_secs(5)).await;
    wait_for_requests(&server, 2, Duration::from_secs(5)).await;
    scheduler.abort();

    let stats = batch.get_stats().await.unwrap();
    assert!(stats.failed_flushes >= 2);
    assert_eq!(stats.failed_flushes, stats.flush_count);
    assert_eq!(stats.dropped, stats.failed_flushes * 2);
    assert!(collecting.lines().len() >= 6);
}

#[tokio::test]
async fn test_unreachable_endpoint_does_not_stall_the_stream() {
    // bind and release a port so nothing listens on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}/write", listener.local_addr().unwrap());
    drop(listener);

    let pipeline = PipelineHandle::spawn();
    let collecting = CollectingSink::default();
    pipeline.register(collecting.clone()).await.unwrap();
    let (sink, batch) = BatchSink::new(
        HttpTransport::new(reqwest::Client::new(), endpoint),
        1,
        Duration::from_secs(60),
    );
    pipeline.register(sink).await.unwrap();

    let task = into_task(
        Box::new(Flaky { runs: 0 }),
        "flaky".into(),
        Arc::new(Point::new("h", "shop", "prod")),
        Duration::from_millis(20),
        pipeline.publisher(),
    );
    let scheduler = tokio::spawn(Scheduler::new(vec![task], 1).run());

    let lines = collecting.wait_for(4, Duration::from_secs(5)).await;
    scheduler.abort();

    assert!(lines.len() >= 4);
    let stats = batch.get_stats().await.unwrap();
    assert!(stats.failed_flushes >= 1);
}

#[tokio::test]
async fn test_configuration_errors_before_start() {
    let pipeline = PipelineHandle::spawn();
    let sources = DataSources::new();

    let unknown: SystemSpec = "shop.prod:disk".parse().unwrap();
    assert_matches!(
        build_tasks(&unknown, "h", Duration::from_secs(10), &sources, &pipeline.publisher()).await,
        Err(ConfigError::InCheck { source, .. }) if matches!(*source, ConfigError::UnknownCheck(_))
    );

    let bad_interval: SystemSpec = "shop.prod:load,every=often".parse().unwrap();
    assert_matches!(
        build_tasks(&bad_interval, "h", Duration::from_secs(10), &sources, &pipeline.publisher()).await,
        Err(ConfigError::InCheck { source, .. }) if matches!(*source, ConfigError::InvalidOption { option: "every", .. })
    );
}
