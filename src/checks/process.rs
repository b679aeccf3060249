//! Count processes by command line

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::trace;

use super::{Check, CheckError};
use crate::config::Options;
use crate::measurement::Reading;

pub const DEFAULT_PROC_DIR: &str = "/proc";
pub const DEFAULT_PATTERN: &str = "httpd";

/// Counts processes whose command line contains a pattern
///
/// Scans the numeric entries of a procfs-style directory. Processes exiting
/// during the scan are skipped.
#[derive(Debug)]
pub struct ProcessCount {
    dir: PathBuf,
    pattern: String,
}

impl ProcessCount {
    pub fn new(dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            pattern: pattern.into(),
        }
    }

    /// `dir` and `match` options, defaulting to `/proc` and `httpd`
    pub fn from_options(options: &Options) -> Self {
        Self::new(
            options.get_or("dir", DEFAULT_PROC_DIR),
            options.get_or("match", DEFAULT_PATTERN),
        )
    }
}

#[async_trait]
impl Check for ProcessCount {
    fn name(&self) -> &str {
        "http_processes"
    }

    async fn execute(&mut self) -> Result<Vec<Reading>, CheckError> {
        let io_error = |path: &PathBuf| {
            let path = path.clone();
            move |source| CheckError::Io { path, source }
        };

        let mut entries = fs::read_dir(&self.dir).await.map_err(io_error(&self.dir))?;
        let mut count = 0;

        while let Some(entry) = entries.next_entry().await.map_err(io_error(&self.dir))? {
            let is_pid = entry
                .file_name()
                .to_str()
                .and_then(|name| name.chars().next())
                .is_some_and(|c| c.is_ascii_digit());
            if !is_pid {
                continue;
            }

            let cmdline = entry.path().join("cmdline");
            let content = match fs::read(&cmdline).await {
                Ok(content) => content,
                // process exited since the directory listing
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&cmdline)(e)),
            };

            // only the program path, up to the first argument separator
            let program = content.split(|b| *b == 0).next().unwrap_or_default();
            if String::from_utf8_lossy(program).contains(&self.pattern) {
                count += 1;
            }
        }

        trace!("{count} processes matching {}", self.pattern);
        Ok(vec![Reading::new(count)])
    }
}
