//! Periodic checks and their conversion into scheduler tasks
//!
//! A check produces zero or more [`Reading`]s per run. [`build_tasks`] turns
//! the configured checks of a system into scheduler [`Task`]s that run the
//! check and publish one [`Measurement`] per reading.
//!
//! | check    | measurement          | value                                   |
//! |----------|----------------------|-----------------------------------------|
//! | `proc`   | `http_processes`     | processes whose command line matches    |
//! | `load`   | `loadavg`            | one-minute load in percent of all CPUs  |
//! | `reqs`   | `requests`           | new log lines since the previous run    |
//! | `pages`  | `mysql_pages`        | rows in `pages`                         |
//! | `cached` | `mysql_cached_pages` | distinct cached page tags               |
//! | `conn`   | `mysql_connections`  | `Threads_connected`                     |
//! | `syslog` | `mysql_syslog`       | new `sys_log` entries, tagged by type   |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::actors::pipeline::Publisher;
use crate::config::{CheckSpec, ConfigError, SystemSpec};
use crate::datasource::{DataSourceError, DataSources};
use crate::measurement::{Measurement, Point, Reading};
use crate::scheduler::{Task, task_fn};
use crate::tailer::TailError;

pub mod load;
pub mod logs;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod process;

/// Errors of a single check run
///
/// A failed run is logged and retried at the next interval.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Tail(#[from] TailError),

    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    #[cfg(feature = "mysql")]
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("unexpected value for {what}: {value}")]
    UnexpectedValue { what: &'static str, value: String },
}

/// A measurement source run periodically by the scheduler
#[async_trait]
pub trait Check: std::fmt::Debug + Send + 'static {
    /// Default measurement name
    fn name(&self) -> &str;

    /// Take one sample
    async fn execute(&mut self) -> Result<Vec<Reading>, CheckError>;
}

/// Build the check named by `spec`
///
/// Returns the check and its measurement name, which the `name` option
/// overrides.
pub async fn build_check(
    spec: &CheckSpec,
    sources: &DataSources,
) -> Result<(Box<dyn Check>, String), ConfigError> {
    let options = &spec.options;
    let check: Box<dyn Check> = match spec.kind.as_str() {
        "proc" => Box::new(process::ProcessCount::from_options(options)),
        "load" => Box::new(load::LoadAverage::new()),
        "reqs" => Box::new(logs::LogLines::from_options(options).await?),

        #[cfg(feature = "mysql")]
        "pages" | "cached" | "conn" | "syslog" => Box::new(mysql::MysqlCheck::from_options(
            &spec.kind, options, sources,
        )?),

        #[cfg(not(feature = "mysql"))]
        "pages" | "cached" | "conn" | "syslog" => {
            let _ = sources;
            return Err(ConfigError::Unsupported(spec.kind.clone()));
        }

        other => return Err(ConfigError::UnknownCheck(other.to_string())),
    };

    let name = options.get_or("name", check.name()).to_string();
    Ok((check, name))
}

/// Wrap `check` into a scheduler task publishing to `publisher`
pub fn into_task(
    check: Box<dyn Check>,
    measurement: String,
    point: Arc<Point>,
    interval: Duration,
    publisher: Publisher,
) -> Task {
    let label = format!("{}.{}:{}", point.product, point.stage, measurement);
    let check = Arc::new(Mutex::new(check));

    Task::new(
        label,
        interval,
        task_fn(move || {
            run_check(
                check.clone(),
                measurement.clone(),
                point.clone(),
                publisher.clone(),
            )
        }),
    )
}

#[instrument(skip_all, fields(check = %measurement))]
async fn run_check(
    check: Arc<Mutex<Box<dyn Check>>>,
    measurement: String,
    point: Arc<Point>,
    publisher: Publisher,
) -> anyhow::Result<()> {
    let readings = {
        let mut check = check.lock().await;
        check
            .execute()
            .await
            .with_context(|| format!("{point}: {measurement} check failed"))?
    };

    debug!("publishing {} readings", readings.len());
    for reading in readings {
        publisher
            .publish(Measurement::new(&measurement, point.clone(), reading))
            .await?;
    }
    Ok(())
}

/// Build one task per configured check of `system`
pub async fn build_tasks(
    system: &SystemSpec,
    host: &str,
    default_every: Duration,
    sources: &DataSources,
    publisher: &Publisher,
) -> Result<Vec<Task>, ConfigError> {
    let point = Arc::new(Point::new(host, &system.product, &system.stage));
    let mut tasks = Vec::with_capacity(system.checks.len());

    for spec in &system.checks {
        let in_check = |source: ConfigError| ConfigError::InCheck {
            system: system.label(),
            check: spec.kind.clone(),
            source: Box::new(source),
        };

        let every = spec.options.every(&spec.kind, default_every).map_err(in_check)?;
        let (check, measurement) = build_check(spec, sources).await.map_err(in_check)?;

        tasks.push(into_task(
            check,
            measurement,
            point.clone(),
            every,
            publisher.clone(),
        ));
    }

    Ok(tasks)
}
