//! Count new log lines, e.g. web server requests

use async_trait::async_trait;

use super::{Check, CheckError};
use crate::config::{ConfigError, Options};
use crate::measurement::Reading;
use crate::tailer::{LineFilter, LogTailer, TimestampFormat};

const CHECK: &str = "reqs";

/// Counts lines appended to the newest matching log file since the last run
#[derive(Debug)]
pub struct LogLines {
    tailer: LogTailer,
}

impl LogLines {
    pub fn new(tailer: LogTailer) -> Self {
        Self { tailer }
    }

    /// Build from the `dir`, `match`, `contains` and `time` options
    ///
    /// `time=auto` selects the format from the timestamp itself, any other
    /// value is a chrono format string.
    pub async fn from_options(options: &Options) -> Result<Self, ConfigError> {
        let dir = options.required(CHECK, "dir")?;
        let prefix = options.required(CHECK, "match")?;

        let filter = match (options.get("contains"), options.get("time")) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::ConflictingOptions {
                    check: CHECK.to_string(),
                    first: "contains",
                    second: "time",
                });
            }
            (Some(needle), None) => LineFilter::Contains(needle.to_string()),
            (None, Some("auto")) => LineFilter::NewerThanLastSeen(TimestampFormat::Auto),
            (None, Some(format)) => {
                LineFilter::NewerThanLastSeen(TimestampFormat::Explicit(format.to_string()))
            }
            (None, None) => LineFilter::All,
        };

        Ok(Self::new(LogTailer::new(dir, prefix, filter).await?))
    }
}

#[async_trait]
impl Check for LogLines {
    fn name(&self) -> &str {
        "requests"
    }

    async fn execute(&mut self) -> Result<Vec<Reading>, CheckError> {
        let count = self.tailer.poll().await?;
        Ok(vec![Reading::new(count as i64)])
    }
}
