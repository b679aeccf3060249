//! Incremental, rotation-aware log tailer
//!
//! A [`LogTailer`] follows the most recently modified file starting with a
//! given prefix inside a directory. Each [`LogTailer::poll`] reports how many
//! complete lines were appended since the previous poll.
//!
//! Rotation is detected heuristically:
//! - a different file became the newest match → start over at offset 0
//! - the file is now smaller than the tracked offset → start over at offset 0
//!
//! There is no file-identity (inode) tracking, so a file that is replaced by
//! a bigger one under the same name goes unnoticed.
//!
//! Lines longer than [`MAX_LINE_LEN`] bytes are skipped with a warning.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, trace, warn};

/// Bracketed timestamp token, e.g. `[10/Oct/2000:13:55:36 -0700]`
static TIMESTAMP_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]").expect("valid timestamp token regex"));

/// Length of a common-log-format timestamp token
const COMMON_LOG_TOKEN_LEN: usize = 26;

/// `10/Oct/2000:13:55:36 -0700`
const COMMON_LOG_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// `Wed Oct 11 14:32:52 2000`
const CTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Longest line, without terminator, that is inspected and counted
pub const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("invalid directory for log files {}: {source}", .dir.display())]
    InvalidDirectory {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid directory for log files: {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("there are no files starting with {prefix} in directory {}", .dir.display())]
    NoMatchingFile { dir: PathBuf, prefix: String },

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl TailError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| TailError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How the bracketed timestamp of a line is parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampFormat {
    /// Pick the format from the token length
    Auto,

    /// A chrono format string, with or without a UTC offset
    Explicit(String),
}

impl TimestampFormat {
    /// Parse a timestamp token; offset-less timestamps are taken as UTC
    pub fn parse(&self, token: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        match self {
            TimestampFormat::Auto if token.len() == COMMON_LOG_TOKEN_LEN => {
                DateTime::parse_from_str(token, COMMON_LOG_FORMAT).map(|ts| ts.with_timezone(&Utc))
            }
            TimestampFormat::Auto => {
                NaiveDateTime::parse_from_str(token, CTIME_FORMAT).map(|ts| ts.and_utc())
            }
            TimestampFormat::Explicit(format) => DateTime::parse_from_str(token, format)
                .map(|ts| ts.with_timezone(&Utc))
                .or_else(|_| NaiveDateTime::parse_from_str(token, format).map(|ts| ts.and_utc())),
        }
    }
}

/// Which of the new lines are counted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineFilter {
    /// Every complete line
    All,

    /// Lines containing the substring
    Contains(String),

    /// Lines whose bracketed timestamp is later than the last one seen
    NewerThanLastSeen(TimestampFormat),
}

/// Tails the newest prefix-matching file of a directory
#[derive(Debug)]
pub struct LogTailer {
    dir: PathBuf,
    prefix: String,
    current: PathBuf,
    offset: u64,
    filter: LineFilter,
    last_seen: Option<DateTime<Utc>>,
    /// inside an over-long line whose terminator has not been read yet
    skipping: bool,
}

impl LogTailer {
    /// Start tailing at the current end of the newest matching file
    pub async fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        filter: LineFilter,
    ) -> Result<Self, TailError> {
        let dir = dir.into();
        let prefix = prefix.into();

        let meta = fs::metadata(&dir)
            .await
            .map_err(|source| TailError::InvalidDirectory {
                dir: dir.clone(),
                source,
            })?;
        if !meta.is_dir() {
            return Err(TailError::NotADirectory(dir));
        }

        let current = newest_match(&dir, &prefix).await?;
        let offset = fs::metadata(&current)
            .await
            .map_err(TailError::io(&current))?
            .len();

        let last_seen = match filter {
            LineFilter::NewerThanLastSeen(_) => Some(Utc::now()),
            _ => None,
        };

        debug!("tailing {} from offset {offset}", current.display());

        Ok(Self {
            dir,
            prefix,
            current,
            offset,
            filter,
            last_seen,
            skipping: false,
        })
    }

    pub fn current_file(&self) -> &Path {
        &self.current
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Count the lines appended since the previous poll
    pub async fn poll(&mut self) -> Result<u64, TailError> {
        let newest = newest_match(&self.dir, &self.prefix).await?;
        if newest != self.current {
            debug!(
                "log rotated from {} to {}",
                self.current.display(),
                newest.display()
            );
            self.current = newest;
            self.offset = 0;
            self.skipping = false;
        }

        let size = fs::metadata(&self.current)
            .await
            .map_err(TailError::io(&self.current))?
            .len();
        if size < self.offset {
            debug!(
                "{} shrank below offset {} (now {size} bytes), starting over",
                self.current.display(),
                self.offset
            );
            self.offset = 0;
            self.skipping = false;
        }

        self.count_new_lines().await
    }

    async fn count_new_lines(&mut self) -> Result<u64, TailError> {
        let path = self.current.clone();
        let mut file = File::open(&path).await.map_err(TailError::io(&path))?;
        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(TailError::io(&path))?;

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let mut consumed = 0u64;
        let mut count = 0u64;
        let mut latest = None;

        loop {
            line.clear();
            let read = (&mut reader)
                .take(MAX_LINE_LEN as u64 + 1)
                .read_until(b'\n', &mut line)
                .await
                .map_err(TailError::io(&path))?;
            if read == 0 {
                break;
            }
            let complete = line.last() == Some(&b'\n');

            if self.skipping {
                consumed += read as u64;
                self.skipping = !complete;
                continue;
            }

            if !complete {
                // a trailing line without terminator is still being written
                if read <= MAX_LINE_LEN {
                    break;
                }
                warn!(
                    "skipping line longer than {MAX_LINE_LEN} bytes at offset {} in {}",
                    self.offset + consumed,
                    path.display()
                );
                consumed += read as u64;
                self.skipping = true;
                continue;
            }
            consumed += read as u64;

            let text = String::from_utf8_lossy(&line[..read - 1]);
            match &self.filter {
                LineFilter::All => count += 1,
                LineFilter::Contains(needle) => {
                    if text.contains(needle.as_str()) {
                        count += 1;
                    }
                }
                LineFilter::NewerThanLastSeen(format) => {
                    let Some(token) = TIMESTAMP_TOKEN.captures(&text).and_then(|c| c.get(1)) else {
                        continue;
                    };
                    match format.parse(token.as_str()) {
                        Ok(ts) => {
                            if self.last_seen.is_none_or(|last| ts > last) {
                                count += 1;
                            }
                            latest = Some(ts);
                        }
                        Err(e) => {
                            warn!(
                                "cannot parse time {:?} in logfile {}: {e}",
                                token.as_str(),
                                path.display()
                            );
                        }
                    }
                }
            }
        }

        self.offset += consumed;
        if let LineFilter::NewerThanLastSeen(_) = self.filter {
            self.last_seen = Some(latest.unwrap_or_else(Utc::now));
        }

        trace!(
            "{count} new lines in {}, offset now {}",
            path.display(),
            self.offset
        );

        Ok(count)
    }
}

/// Most recently modified file in `dir` whose name starts with `prefix`
///
/// Candidates are visited in name order and only a strictly newer
/// modification time replaces the current pick, so ties go to the
/// lexicographically first name.
async fn newest_match(dir: &Path, prefix: &str) -> Result<PathBuf, TailError> {
    let mut entries = fs::read_dir(dir).await.map_err(TailError::io(dir))?;

    let mut candidates = vec![];
    while let Some(entry) = entries.next_entry().await.map_err(TailError::io(dir))? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }

        let path = entry.path();
        let meta = entry.metadata().await.map_err(TailError::io(&path))?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().map_err(TailError::io(&path))?;
        candidates.push((path, modified));
    }
    candidates.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut newest: Option<(PathBuf, std::time::SystemTime)> = None;
    for (path, modified) in candidates {
        match &newest {
            Some((_, best)) if modified <= *best => {}
            _ => newest = Some((path, modified)),
        }
    }

    newest
        .map(|(path, _)| path)
        .ok_or_else(|| TailError::NoMatchingFile {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
        })
}
