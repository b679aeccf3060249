//! Database checks for TYPO3 installations

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::MySqlPool;
use tracing::trace;

use super::{Check, CheckError};
use crate::config::{ConfigError, Options};
use crate::datasource::{DataSource, DataSources};
use crate::measurement::Reading;

pub const DEFAULT_CACHE_TABLE: &str = "cf_cache_pages_tags";

const QUERY_PAGES: &str = "SELECT COUNT(*) FROM pages WHERE deleted=0 AND hidden=0 AND doktype=1";
const QUERY_CONNECTIONS: &str = "SHOW STATUS WHERE `variable_name` = 'Threads_connected'";
const QUERY_SYSLOG: &str =
    "SELECT CAST(type AS SIGNED), COUNT(type) FROM sys_log WHERE tstamp > ? GROUP BY type";

/// Log entry types of `sys_log` and their tag values
const SYSLOG_TYPES: [(i64, &str); 7] = [
    (1, "db"),
    (2, "file"),
    (3, "cache"),
    (4, "ext"),
    (5, "err"),
    (254, "setting"),
    (255, "login"),
];

/// Table names are interpolated into SQL
static TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_$]+(\.[A-Za-z0-9_$]+)?$").expect("valid regex"));

#[derive(Debug)]
enum Query {
    Pages,
    CachedPages(String),
    Connections,
    Syslog { since: Option<DateTime<Utc>> },
}

/// One query against a named data source
#[derive(Debug)]
pub struct MysqlCheck {
    source: Arc<DataSource>,
    query: Query,
}

impl MysqlCheck {
    /// Build the `pages`, `cached`, `conn` or `syslog` check
    pub fn from_options(
        kind: &str,
        options: &Options,
        sources: &DataSources,
    ) -> Result<Self, ConfigError> {
        let source = sources.get(options.required(kind, "db")?)?;

        let query = match kind {
            "pages" => Query::Pages,
            "cached" => {
                let table = options.get_or("table", DEFAULT_CACHE_TABLE);
                if !TABLE_NAME.is_match(table) {
                    return Err(ConfigError::InvalidOption {
                        check: kind.to_string(),
                        option: "table",
                        reason: format!("{table} is not a table name"),
                    });
                }
                Query::CachedPages(table.to_string())
            }
            "conn" => Query::Connections,
            "syslog" => Query::Syslog { since: None },
            other => return Err(ConfigError::UnknownCheck(other.to_string())),
        };

        Ok(Self { source, query })
    }

    async fn count(pool: &MySqlPool, sql: &str) -> Result<i64, CheckError> {
        Ok(sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await?)
    }

    async fn connections(pool: &MySqlPool) -> Result<i64, CheckError> {
        let (_, value) = sqlx::query_as::<_, (String, String)>(QUERY_CONNECTIONS)
            .fetch_one(pool)
            .await?;
        value.parse().map_err(|_| CheckError::UnexpectedValue {
            what: "Threads_connected",
            value,
        })
    }

    async fn syslog(pool: &MySqlPool, since: DateTime<Utc>) -> Result<Vec<Reading>, CheckError> {
        let rows = sqlx::query_as::<_, (i64, i64)>(QUERY_SYSLOG)
            .bind(since.timestamp())
            .fetch_all(pool)
            .await?;

        Ok(syslog_readings(&rows))
    }
}

/// One reading per known log type, zero when absent from `rows`
fn syslog_readings(rows: &[(i64, i64)]) -> Vec<Reading> {
    SYSLOG_TYPES
        .iter()
        .map(|(kind, label)| {
            let count = rows
                .iter()
                .filter(|(row_kind, _)| row_kind == kind)
                .map(|(_, count)| count)
                .sum();
            Reading::tagged("type", *label, count)
        })
        .collect()
}

#[async_trait]
impl Check for MysqlCheck {
    fn name(&self) -> &str {
        match self.query {
            Query::Pages => "mysql_pages",
            Query::CachedPages(_) => "mysql_cached_pages",
            Query::Connections => "mysql_connections",
            Query::Syslog { .. } => "mysql_syslog",
        }
    }

    async fn execute(&mut self) -> Result<Vec<Reading>, CheckError> {
        let pool = self.source.pool().await?;
        trace!("querying {}", self.source.name());

        let readings = match &mut self.query {
            Query::Pages => vec![Reading::new(Self::count(&pool, QUERY_PAGES).await?)],
            Query::CachedPages(table) => {
                let sql = format!("SELECT COUNT(DISTINCT tag) FROM {table}");
                vec![Reading::new(Self::count(&pool, &sql).await?)]
            }
            Query::Connections => vec![Reading::new(Self::connections(&pool).await?)],
            Query::Syslog { since } => {
                let from = *since.get_or_insert_with(Utc::now);
                let readings = Self::syslog(&pool, from).await?;
                *since = Some(Utc::now());
                readings
            }
        };

        Ok(readings)
    }
}
