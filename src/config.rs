//! Agent configuration
//!
//! Configuration comes from two places, an optional JSON file and the command
//! line. Both are read into a [`Config`]; [`Config::merge`] layers the command
//! line over the file and [`Settings::resolve`] validates the result and fills
//! in defaults.
//!
//! Checks are selected per monitored system with the grammar
//! `SYSTEM.STAGE:CHECK,k=v,...,CHECK,k=v,...`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

use crate::tailer::TailError;

/// Default interval for checks without an `every` option
pub const DEFAULT_EVERY: Duration = Duration::from_secs(10);

/// Default number of results per HTTP batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default maximum time between two HTTP batches
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(10);

/// Errors detected before the scheduler starts; all of them are fatal
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} should be in format SYSTEM.STAGE:CHECK,ARGS...,CHECK,ARGS...")]
    InvalidSystemSpec(String),

    #[error("{0} should be in format SYSTEM.STAGE")]
    InvalidSystemName(String),

    #[error("system {0} specified more than once")]
    DuplicateSystem(String),

    #[error("check {check}: invalid option without key")]
    OptionWithoutKey { check: String },

    #[error("check {check}: option {option} repeated")]
    RepeatedOption { check: String, option: String },

    #[error("check {check}: options {first} and {second} cannot be combined")]
    ConflictingOptions {
        check: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("{0}: not a valid check")]
    UnknownCheck(String),

    #[error("check {check}: required option '{option}'")]
    MissingOption { check: String, option: &'static str },

    #[error("check {check}: option '{option}' is invalid: {reason}")]
    InvalidOption {
        check: String,
        option: &'static str,
        reason: String,
    },

    #[error("{0} should be in format NAME=DSN")]
    InvalidDataSource(String),

    #[error("duplicated database connection {0}")]
    DuplicateDataSource(String),

    #[error("database connection {0} not defined; define it using --mysql")]
    UnknownDataSource(String),

    #[error("check {0} needs database support, which this build does not include")]
    Unsupported(String),

    #[error("{what} is invalid: {reason}")]
    InvalidValue { what: &'static str, reason: String },

    #[error("cannot init log file reader: {0}")]
    LogReader(#[from] TailError),

    #[error("cannot read config file {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration file {}: {source}", .path.display())]
    ParseFile {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{system}: check {check}: {source}")]
    InCheck {
        system: String,
        check: String,
        source: Box<ConfigError>,
    },

    #[error("no tasks to run")]
    NoTasks,
}

/// Options of one configured check, keyed by option name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options(BTreeMap<String, String>);

impl Options {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn required(&self, check: &str, key: &'static str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingOption {
            check: check.to_string(),
            option: key,
        })
    }

    /// The `every` option, or `default` when absent
    pub fn every(&self, check: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get("every") {
            Some(value) => parse_interval(value).map_err(|reason| ConfigError::InvalidOption {
                check: check.to_string(),
                option: "every",
                reason,
            }),
            None => Ok(default),
        }
    }

    fn insert(&mut self, check: &str, key: &str, value: &str) -> Result<(), ConfigError> {
        if key.is_empty() {
            return Err(ConfigError::OptionWithoutKey {
                check: check.to_string(),
            });
        }
        if self.0.contains_key(key) {
            return Err(ConfigError::RepeatedOption {
                check: check.to_string(),
                option: key.to_string(),
            });
        }
        self.0.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Options {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// One check selected for a system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSpec {
    pub kind: String,
    pub options: Options,
}

/// All checks selected for one `SYSTEM.STAGE` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemSpec {
    pub product: String,
    pub stage: String,
    pub checks: Vec<CheckSpec>,
}

impl SystemSpec {
    pub fn label(&self) -> String {
        format!("{}.{}", self.product, self.stage)
    }
}

impl std::str::FromStr for SystemSpec {
    type Err = ConfigError;

    /// Parse `SYSTEM.STAGE:CHECK,k=v,...,CHECK,k=v,...`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (system, checks) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidSystemSpec(s.to_string()))?;
        let (product, stage) = system
            .split_once('.')
            .ok_or_else(|| ConfigError::InvalidSystemName(system.to_string()))?;

        Ok(Self {
            product: product.to_string(),
            stage: stage.to_string(),
            checks: parse_checks(checks)?,
        })
    }
}

/// Parse `CHECK,k=v,...,CHECK,k=v,...`
///
/// A segment without `=` starts a new check, `k=v` segments attach an option
/// to the current one. Empty segments are ignored.
pub fn parse_checks(s: &str) -> Result<Vec<CheckSpec>, ConfigError> {
    let mut checks: Vec<CheckSpec> = vec![];

    for part in s.split(',').filter(|part| !part.is_empty()) {
        if let (Some((key, value)), Some(current)) = (part.split_once('='), checks.last_mut()) {
            current.options.insert(&current.kind, key, value)?;
            continue;
        }

        checks.push(CheckSpec {
            kind: part.to_string(),
            options: Options::default(),
        });
    }

    Ok(checks)
}

/// Parse an interval such as `10s`, `1m` or `500ms`; zero is rejected
pub fn parse_interval(value: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(value).map_err(|e| e.to_string())?;
    if duration.is_zero() {
        return Err("must be greater than zero".to_string());
    }
    Ok(duration)
}

/// HTTP batch sink section of the configuration file
///
/// An empty endpoint keeps the endpoint of the configuration merged over.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct InfluxConfig {
    pub endpoint: String,
    pub batch_size: Option<usize>,
    pub batch_interval: Option<String>,
}

/// Unresolved configuration, as read from file or command line
#[derive(Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub workers: Option<usize>,
    pub every: Option<String>,
    pub host: Option<String>,

    /// Named data sources as `NAME=DSN`
    pub mysql: Vec<String>,

    /// Check selections as `SYSTEM.STAGE:CHECK,...`
    pub systems: Vec<String>,

    pub print: Option<bool>,
    pub influx: Option<InfluxConfig>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // names only, DSNs carry credentials
        let mysql: Vec<_> = self
            .mysql
            .iter()
            .map(|entry| entry.split_once('=').map_or("<invalid>", |(name, _)| name))
            .collect();
        f.debug_struct("Config")
            .field("workers", &self.workers)
            .field("every", &self.every)
            .field("host", &self.host)
            .field("mysql", &mysql)
            .field("systems", &self.systems)
            .field("print", &self.print)
            .field("influx", &self.influx)
            .finish()
    }
}

impl Config {
    /// Layer `over` on top of `self`
    ///
    /// Scalars set in `over` win; lists are concatenated, so a name given in
    /// both places is reported as a duplicate during resolution.
    pub fn merge(self, over: Config) -> Config {
        Config {
            workers: over.workers.or(self.workers),
            every: over.every.or(self.every),
            host: over.host.or(self.host),
            mysql: self.mysql.into_iter().chain(over.mysql).collect(),
            systems: self.systems.into_iter().chain(over.systems).collect(),
            print: over.print.or(self.print),
            influx: match (self.influx, over.influx) {
                (Some(base), Some(over)) => Some(InfluxConfig {
                    endpoint: if over.endpoint.is_empty() {
                        base.endpoint
                    } else {
                        over.endpoint
                    },
                    batch_size: over.batch_size.or(base.batch_size),
                    batch_interval: over.batch_interval.or(base.batch_interval),
                }),
                (base, over) => over.or(base),
            },
        }
    }
}

/// Resolved HTTP batch sink settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    pub endpoint: String,
    pub size: usize,
    pub interval: Duration,
}

/// Fully validated configuration
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub workers: usize,
    pub every: Duration,
    pub host: String,
    pub data_sources: Vec<(String, String)>,
    pub systems: Vec<SystemSpec>,
    pub print: bool,
    pub batch: Option<BatchSettings>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data_sources: Vec<_> = self.data_sources.iter().map(|(name, _)| name).collect();
        f.debug_struct("Settings")
            .field("workers", &self.workers)
            .field("every", &self.every)
            .field("host", &self.host)
            .field("data_sources", &data_sources)
            .field("systems", &self.systems)
            .field("print", &self.print)
            .field("batch", &self.batch)
            .finish()
    }
}

impl Settings {
    /// Validate `config` and fill in defaults
    ///
    /// `default_host` is only consulted when no host name was configured.
    pub fn resolve(
        config: Config,
        default_host: impl FnOnce() -> String,
    ) -> Result<Settings, ConfigError> {
        let workers = match config.workers {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    what: "workers",
                    reason: "at least one worker is required".to_string(),
                });
            }
            Some(n) => n,
            None => 1,
        };

        let every = config
            .every
            .as_deref()
            .map(|value| {
                parse_interval(value).map_err(|reason| ConfigError::InvalidValue {
                    what: "every",
                    reason,
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_EVERY);

        let mut data_sources: Vec<(String, String)> = vec![];
        for entry in &config.mysql {
            let (name, dsn) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidDataSource(entry.clone()))?;
            if data_sources.iter().any(|(known, _)| known == name) {
                return Err(ConfigError::DuplicateDataSource(name.to_string()));
            }
            data_sources.push((name.to_string(), dsn.to_string()));
        }

        let mut systems: Vec<SystemSpec> = vec![];
        for entry in &config.systems {
            let system: SystemSpec = entry.parse()?;
            if systems.iter().any(|known| known.label() == system.label()) {
                return Err(ConfigError::DuplicateSystem(system.label()));
            }
            systems.push(system);
        }

        let batch = config
            .influx
            .map(|influx| -> Result<BatchSettings, ConfigError> {
                if influx.endpoint.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        what: "batch endpoint",
                        reason: "an endpoint URL is required for batch options".to_string(),
                    });
                }
                let size = match influx.batch_size {
                    Some(0) => {
                        return Err(ConfigError::InvalidValue {
                            what: "batch size",
                            reason: "must be at least one".to_string(),
                        });
                    }
                    Some(n) => n,
                    None => DEFAULT_BATCH_SIZE,
                };
                let interval = match influx.batch_interval.as_deref() {
                    Some(value) => {
                        parse_interval(value).map_err(|reason| ConfigError::InvalidValue {
                            what: "batch interval",
                            reason,
                        })?
                    }
                    None => DEFAULT_BATCH_INTERVAL,
                };
                Ok(BatchSettings {
                    endpoint: influx.endpoint,
                    size,
                    interval,
                })
            })
            .transpose()?;

        // without any HTTP sink, measurements go to stdout
        let print = config.print.unwrap_or(batch.is_none());

        let host = config.host.unwrap_or_else(default_host);

        Ok(Settings {
            workers,
            every,
            host,
            data_sources,
            systems,
            print,
            batch,
        })
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&file_content)
        .map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
        .inspect(|config| trace!("loaded config: {config:?}"))
}
