//! Integration tests for request counting across log rotation

use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};

use hostwatch::actors::pipeline::PipelineHandle;
use hostwatch::checks::build_tasks;
use hostwatch::config::SystemSpec;
use hostwatch::datasource::DataSources;
use hostwatch::scheduler::Task;
use tempfile::TempDir;

use crate::helpers::*;

fn set_age(path: &Path, age: Duration) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

async fn run(task: &Task) {
    (task.body())().await.unwrap();
}

fn values(lines: &[String]) -> Vec<i64> {
    lines
        .iter()
        .map(|line| {
            line.split(' ')
                .nth(1)
                .and_then(|field| field.strip_prefix("value="))
                .unwrap()
                .parse()
                .unwrap()
        })
        .collect()
}

async fn requests_task(dir: &TempDir, options: &str, pipeline: &PipelineHandle) -> Task {
    let system: SystemSpec = format!(
        "shop.prod:reqs,dir={},match=access{options}",
        dir.path().display()
    )
    .parse()
    .unwrap();

    build_tasks(
        &system,
        "web-1",
        Duration::from_secs(10),
        &DataSources::new(),
        &pipeline.publisher(),
    )
    .await
    .unwrap()
    .remove(0)
}

#[tokio::test]
async fn test_requests_are_counted_across_rotation() {
    let dir = TempDir::new().unwrap();
    let current = dir.path().join("access.log");
    append(&current, "GET /before-start\n");
    set_age(&current, Duration::from_secs(120));

    let pipeline = PipelineHandle::spawn();
    let collecting = CollectingSink::default();
    pipeline.register(collecting.clone()).await.unwrap();
    let task = requests_task(&dir, "", &pipeline).await;

    // lines written before the agent started are not counted
    append(&current, "GET /a\nGET /b\n");
    set_age(&current, Duration::from_secs(60));
    run(&task).await;

    // the server switches to a new file
    let rotated = dir.path().join("access.log.new");
    append(&rotated, "GET /c\nGET /d\nGET /e\n");
    run(&task).await;

    // and the new file is later truncated
    std::fs::write(&rotated, "GET /f\n").unwrap();
    run(&task).await;

    run(&task).await;

    let lines = collecting.wait_for(4, Duration::from_secs(2)).await;
    assert_eq!(values(&lines), vec![2, 3, 1, 0]);
    assert!(lines[0].starts_with("requests,host=web-1,product=shop,stage=prod value=2 "));
}

#[tokio::test]
async fn test_contains_filter_and_name_override() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("access.log");
    append(&log, "");

    let pipeline = PipelineHandle::spawn();
    let collecting = CollectingSink::default();
    pipeline.register(collecting.clone()).await.unwrap();
    let task = requests_task(&dir, ",contains=POST,name=posts", &pipeline).await;
    assert_eq!(task.name(), "shop.prod:posts");

    append(&log, "GET /\nPOST /login\nPOST /cart\nGET /cart\n");
    run(&task).await;

    let lines = collecting.wait_for(1, Duration::from_secs(2)).await;
    assert!(lines[0].starts_with("posts,host=web-1,product=shop,stage=prod value=2 "));
}

#[tokio::test]
async fn test_only_newer_timestamps_are_counted() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("access.log");
    append(&log, "");

    let pipeline = PipelineHandle::spawn();
    let collecting = CollectingSink::default();
    pipeline.register(collecting.clone()).await.unwrap();
    let task = requests_task(&dir, ",time=auto", &pipeline).await;

    append(
        &log,
        "10.0.0.1 - - [10/Oct/2000:13:55:36 -0700] \"GET / HTTP/1.0\" 200 2326\n\
         10.0.0.1 - - [10/Oct/2099:13:55:36 -0700] \"GET / HTTP/1.0\" 200 2326\n\
         10.0.0.1 - - [11/Oct/2099:13:55:36 -0700] \"GET / HTTP/1.0\" 200 2326\n",
    );
    run(&task).await;

    // replayed line from before the last one seen
    append(
        &log,
        "10.0.0.1 - - [10/Oct/2099:13:55:36 -0700] \"GET / HTTP/1.0\" 200 2326\n",
    );
    run(&task).await;

    let lines = collecting.wait_for(2, Duration::from_secs(2)).await;
    assert_eq!(values(&lines), vec![2, 0]);
}
