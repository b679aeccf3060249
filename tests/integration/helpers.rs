//! Helper functions for integration tests

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hostwatch::actors::messages::SharedMeasurement;
use hostwatch::actors::sink::Sink;
use tokio::sync::mpsc;
use wiremock::MockServer;

/// Sink collecting the line protocol of everything it receives
#[derive(Clone, Default)]
pub struct CollectingSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CollectingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Wait until at least `count` lines arrived or `timeout` passed
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.lines.lock().unwrap().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.lines()
    }
}

#[async_trait]
impl Sink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn run(self: Box<Self>, mut rx: mpsc::Receiver<SharedMeasurement>) {
        while let Some(measurement) = rx.recv().await {
            self.lines.lock().unwrap().push(measurement.to_string());
        }
    }
}

/// Lay out a procfs-like directory with one entry per command line
pub fn fake_proc(dir: &Path, cmdlines: &[&str]) {
    for (pid, cmdline) in cmdlines.iter().enumerate() {
        let entry = dir.join((pid + 1).to_string());
        std::fs::create_dir(&entry).unwrap();
        std::fs::write(entry.join("cmdline"), cmdline.replace(' ', "\0")).unwrap();
    }
}

pub fn append(path: &Path, content: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

/// Wait until the mock server received at least `count` requests
pub async fn wait_for_requests(server: &MockServer, count: usize, timeout: Duration) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let requests = server.received_requests().await.unwrap_or_default();
        if requests.len() >= count || tokio::time::Instant::now() >= deadline {
            return requests
                .iter()
                .map(|request| String::from_utf8_lossy(&request.body).into_owned())
                .collect();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
