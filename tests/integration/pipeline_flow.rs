//! Integration tests for the full measurement flow
//!
//! These tests verify that the pieces work correctly together:
//! - Scheduler → check → pipeline → batch sink → HTTP endpoint
//! - Fan-out of the same stream to several sinks

use std::time::Duration;

use hostwatch::actors::batch::{BatchSink, HttpTransport};
use hostwatch::actors::pipeline::PipelineHandle;
use hostwatch::checks::build_tasks;
use hostwatch::config::SystemSpec;
use hostwatch::datasource::DataSources;
use hostwatch::scheduler::Scheduler;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn influx_mock() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/write"))
        .and(header("content-type", "text/plain"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    server
}

fn proc_system(proc_dir: &TempDir) -> SystemSpec {
    format!(
        "shop.prod:proc,dir={},every=100ms",
        proc_dir.path().display()
    )
    .parse()
    .unwrap()
}

#[tokio::test]
async fn test_measurements_reach_http_endpoint_in_batches() {
    let server = influx_mock().await;

    let proc_dir = TempDir::new().unwrap();
    fake_proc(
        proc_dir.path(),
        &[
            "/usr/sbin/httpd -DFOREGROUND",
            "/usr/sbin/httpd -DFOREGROUND",
            "/sbin/init splash",
        ],
    );

    let pipeline = PipelineHandle::spawn();
    let (sink, batch) = BatchSink::new(
        HttpTransport::new(reqwest::Client::new(), format!("{}/write", server.uri())),
        3,
        Duration::from_secs(60),
    );
    pipeline.register(sink).await.unwrap();

    let tasks = build_tasks(
        &proc_system(&proc_dir),
        "test-host",
        Duration::from_secs(10),
        &DataSources::new(),
        &pipeline.publisher(),
    )
    .await
    .unwrap();
    let scheduler = tokio::spawn(Scheduler::new(tasks, 1).run());

    let bodies = wait_for_requests(&server, 1, Duration::from_secs(5)).await;
    scheduler.abort();

    assert!(!bodies.is_empty(), "no batch was posted");
    let body = &bodies[0];
    assert!(body.ends_with('\n'));

    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 3);
    for line in lines {
        assert!(
            line.starts_with("http_processes,host=test-host,product=shop,stage=prod value=2 "),
            "unexpected line: {line}"
        );
    }

    let stats = batch.get_stats().await.unwrap();
    assert!(stats.flush_count >= 1);
    assert_eq!(stats.failed_flushes, 0);
}

#[tokio::test]
async fn test_every_sink_sees_the_same_stream() {
    let server = influx_mock().await;

    let proc_dir = TempDir::new().unwrap();
    fake_proc(proc_dir.path(), &["/usr/sbin/httpd"]);

    let pipeline = PipelineHandle::spawn();
    let collecting = CollectingSink::default();
    pipeline.register(collecting.clone()).await.unwrap();

    let (sink, _batch) = BatchSink::new(
        HttpTransport::new(reqwest::Client::new(), format!("{}/write", server.uri())),
        2,
        Duration::from_secs(60),
    );
    pipeline.register(sink).await.unwrap();

    let tasks = build_tasks(
        &proc_system(&proc_dir),
        "test-host",
        Duration::from_secs(10),
        &DataSources::new(),
        &pipeline.publisher(),
    )
    .await
    .unwrap();
    let scheduler = tokio::spawn(Scheduler::new(tasks, 1).run());

    let bodies = wait_for_requests(&server, 1, Duration::from_secs(5)).await;
    let lines = collecting.wait_for(2, Duration::from_secs(5)).await;
    scheduler.abort();

    assert!(!bodies.is_empty(), "no batch was posted");
    let posted: Vec<&str> = bodies[0].lines().collect();
    assert_eq!(posted, lines[..2].iter().map(String::as_str).collect::<Vec<_>>());
}
