//! Fixed-size worker pool
//!
//! Workers share a single dispatch queue. Each worker pulls one job, runs its
//! body to completion and only then pulls the next one, so a slow body holds a
//! worker slot for its whole duration.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace, warn};

use super::TaskFn;

/// Capacity of the dispatch queue
///
/// Kept at one so that the scheduler's send blocks as soon as every worker is
/// busy and a single job is already waiting.
const DISPATCH_CAPACITY: usize = 1;

/// A due task handed from the scheduler to a worker
#[derive(Clone)]
pub struct Job {
    pub name: String,
    body: TaskFn,
}

impl Job {
    pub(crate) fn new(name: String, body: TaskFn) -> Self {
        Self { name, body }
    }

    /// Run the task body, logging a failure with the task name
    #[instrument(skip(self), fields(task = %self.name))]
    pub async fn run(self) {
        trace!("running task");
        if let Err(e) = (self.body)().await {
            error!(task = %self.name, "task failed: {:#}", e);
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Handle to the spawned workers
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) and return the dispatch sender
    pub fn spawn(size: usize) -> (Self, mpsc::Sender<Job>) {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel(DISPATCH_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        debug!("spawning {size} workers");

        let handles = (0..size)
            .map(|id| tokio::spawn(worker(id, rx.clone())))
            .collect();

        (Self { handles }, tx)
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }
}

async fn worker(id: usize, queue: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        // only the receive is done under the lock, the job itself runs unlocked
        let job = { queue.lock().await.recv().await };

        match job {
            Some(job) => job.run().await,
            None => {
                warn!(worker = id, "dispatch queue closed, stopping worker");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task_fn;
    use std::time::Duration;
    use tokio::time::Instant;

    fn sleeping_job(name: &str, starts: Arc<std::sync::Mutex<Vec<Duration>>>, origin: Instant) -> Job {
        let body = task_fn(move || {
            let starts = starts.clone();
            async move {
                starts.lock().unwrap().push(origin.elapsed());
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            }
        });
        Job::new(name.to_string(), body)
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_run_jobs_concurrently() {
        let origin = Instant::now();
        let starts = Arc::new(std::sync::Mutex::new(vec![]));
        let (pool, tx) = WorkerPool::spawn(2);
        assert_eq!(pool.size(), 2);

        tx.send(sleeping_job("a", starts.clone(), origin)).await.unwrap();
        tx.send(sleeping_job("b", starts.clone(), origin)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts, vec![Duration::ZERO, Duration::ZERO]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_worker_runs_jobs_one_after_another() {
        let origin = Instant::now();
        let starts = Arc::new(std::sync::Mutex::new(vec![]));
        let (_pool, tx) = WorkerPool::spawn(1);

        for name in ["a", "b", "c"] {
            tx.send(sleeping_job(name, starts.clone(), origin)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(3500)).await;

        let starts = starts.lock().unwrap().clone();
        assert_eq!(
            starts,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2)
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_job_does_not_stop_worker() {
        let (_pool, tx) = WorkerPool::spawn(1);
        let (done_tx, mut done_rx) = mpsc::channel(1);

        let failing = task_fn(|| async { Err(anyhow::anyhow!("boom")) });
        tx.send(Job::new("failing".into(), failing)).await.unwrap();

        let ok = task_fn(move || {
            let done_tx = done_tx.clone();
            async move {
                done_tx.send(()).await?;
                Ok(())
            }
        });
        tx.send(Job::new("ok".into(), ok)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), done_rx.recv())
            .await
            .unwrap()
            .unwrap();
    }
}
