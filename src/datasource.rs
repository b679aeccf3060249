//! Named database connections shared between checks
//!
//! Every data source is configured once as `NAME=DSN` and connected lazily
//! the first time a check needs it. The outcome of that first attempt is kept
//! for the lifetime of the agent: later callers get the same pool, or the same
//! failure.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

#[cfg(feature = "mysql")]
use {
    sqlx::mysql::{MySqlPool, MySqlPoolOptions},
    std::time::Duration,
    tokio::sync::OnceCell,
    tracing::{info, instrument, warn},
};

use crate::config::ConfigError;

#[cfg(feature = "mysql")]
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(feature = "mysql")]
const MAX_CONNECTIONS: u32 = 4;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataSourceError {
    #[error("cannot connect to database {name}: {reason}")]
    Connect { name: String, reason: String },
}

/// One named connection
pub struct DataSource {
    name: String,
    dsn: String,
    #[cfg(feature = "mysql")]
    pool: OnceCell<Result<MySqlPool, DataSourceError>>,
}

impl DataSource {
    fn new(name: &str, dsn: &str) -> Self {
        Self {
            name: name.to_string(),
            dsn: dsn.to_string(),
            #[cfg(feature = "mysql")]
            pool: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Connection pool for this data source
    ///
    /// Only the first call connects; concurrent callers wait for it.
    #[cfg(feature = "mysql")]
    #[instrument(skip(self), fields(source = %self.name))]
    pub async fn pool(&self) -> Result<MySqlPool, DataSourceError> {
        self.pool
            .get_or_init(|| async {
                let result = MySqlPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect(&self.dsn)
                    .await
                    .map_err(|e| DataSourceError::Connect {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    });

                match &result {
                    Ok(_) => info!("connected to database {}", self.name),
                    Err(e) => warn!("{e}; giving up on this connection"),
                }
                result
            })
            .await
            .clone()
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registry of all configured data sources
#[derive(Debug, Default)]
pub struct DataSources {
    entries: HashMap<String, Arc<DataSource>>,
}

impl DataSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from `(name, dsn)` pairs
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, ConfigError> {
        let mut sources = Self::new();
        for (name, dsn) in pairs {
            sources.insert(name, dsn)?;
        }
        Ok(sources)
    }

    pub fn insert(&mut self, name: &str, dsn: &str) -> Result<(), ConfigError> {
        if self.entries.contains_key(name) {
            return Err(ConfigError::DuplicateDataSource(name.to_string()));
        }
        self.entries
            .insert(name.to_string(), Arc::new(DataSource::new(name, dsn)));
        Ok(())
    }

    /// Look up a data source by name
    pub fn get(&self, name: &str) -> Result<Arc<DataSource>, ConfigError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownDataSource(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
