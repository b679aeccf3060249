//! Periodic task scheduler
//!
//! The scheduler tracks, for every task, the time remaining until it is due.
//! Each pass it sleeps until the nearest deadline, subtracts the waited time
//! from every task and hands all tasks that reached zero to the worker pool,
//! re-arming them with their configured interval.
//!
//! ```text
//! ┌───────────┐  sleep(min remaining)  ┌──────────────┐  Job  ┌──────────┐
//! │ Scheduler │ ─────────────────────► │ due tasks    │ ────► │ Worker N │
//! └───────────┘                        └──────────────┘       └──────────┘
//! ```
//!
//! Dispatching blocks while every worker is busy. This is the only
//! backpressure in the system: tasks queue up instead of being dropped, and
//! their schedule drifts under sustained overload.

pub mod worker;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error, instrument, trace};

pub use worker::{Job, WorkerPool};

/// Body of a task, invoked once per firing
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure into a [`TaskFn`]
pub fn task_fn<F, Fut>(f: F) -> TaskFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// A named unit of periodic work
///
/// Tasks are due immediately after creation and then once per `interval`.
pub struct Task {
    name: String,
    interval: Duration,
    remaining: Duration,
    body: TaskFn,
}

impl Task {
    pub fn new(name: impl Into<String>, interval: Duration, body: TaskFn) -> Self {
        Self {
            name: name.into(),
            interval,
            remaining: Duration::ZERO,
            body,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Body run on every firing
    pub fn body(&self) -> &TaskFn {
        &self.body
    }

    fn job(&self) -> Job {
        Job::new(self.name.clone(), self.body.clone())
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

/// Owns all tasks and drives them on a bounded worker pool
pub struct Scheduler {
    tasks: Vec<Task>,
    workers: usize,
}

impl Scheduler {
    pub fn new(tasks: Vec<Task>, workers: usize) -> Self {
        Self { tasks, workers }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run forever
    ///
    /// Returns immediately when there are no tasks; otherwise it only returns
    /// if the worker pool goes away.
    #[instrument(skip(self), fields(tasks = self.tasks.len(), workers = self.workers))]
    pub async fn run(mut self) {
        if self.tasks.is_empty() {
            debug!("no tasks to schedule");
            return;
        }

        let (_pool, dispatch) = WorkerPool::spawn(self.workers);

        debug!("starting scheduler");

        loop {
            let Some(wait) = self.next_wait() else {
                return;
            };

            if !wait.is_zero() {
                trace!("sleeping {wait:?} until next task is due");
                tokio::time::sleep(wait).await;
            }

            for job in self.advance(wait) {
                trace!(task = %job.name, "dispatching");
                if dispatch.send(job).await.is_err() {
                    error!("worker pool is gone, stopping scheduler");
                    return;
                }
            }
        }
    }

    /// Time until the nearest task is due
    ///
    /// Tasks are kept sorted by remaining time; the sort is stable, so exact
    /// ties keep their relative order from pass to pass.
    fn next_wait(&mut self) -> Option<Duration> {
        self.tasks.sort_by_key(|task| task.remaining);
        self.tasks.first().map(|task| task.remaining)
    }

    /// Account for `elapsed` time and collect every task that became due
    fn advance(&mut self, elapsed: Duration) -> Vec<Job> {
        let mut due = vec![];
        for task in &mut self.tasks {
            task.remaining = task.remaining.saturating_sub(elapsed);
            if task.remaining.is_zero() {
                task.remaining = task.interval;
                due.push(task.job());
            }
        }
        due
    }
}
