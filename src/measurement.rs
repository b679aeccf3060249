//! Measurement data model
//!
//! A [`Measurement`] is one timestamped value produced by a check. It carries
//! the [`Point`] identity of the check group it belongs to and serializes to a
//! single line of line-protocol text:
//!
//! ```text
//! <name>,host=<h>,product=<p>,stage=<s>[,<tag>=<value>] value=<v> <unix-nanos>
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Identity attached to every measurement of a check group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Point {
    pub host: String,
    pub product: String,
    pub stage: String,
}

impl Point {
    pub fn new(host: impl Into<String>, product: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            product: product.into(),
            stage: stage.into(),
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host={},product={},stage={}",
            self.host, self.product, self.stage
        )
    }
}

/// Extra `key=value` tag appended after the point tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A raw value returned by a check, before it is stamped with name and point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub tag: Option<Tag>,
    pub value: i64,
}

impl Reading {
    pub fn new(value: i64) -> Self {
        Self { tag: None, value }
    }

    pub fn tagged(key: impl Into<String>, tag_value: impl Into<String>, value: i64) -> Self {
        Self {
            tag: Some(Tag::new(key, tag_value)),
            value,
        }
    }
}

/// One immutable, timestamped measurement
///
/// The timestamp is captured when the measurement is created, not when a sink
/// eventually writes it out.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub name: String,
    pub point: Arc<Point>,
    pub tag: Option<Tag>,
    pub value: i64,
    pub timestamp: DateTime<Utc>,
}

impl Measurement {
    pub fn new(name: impl Into<String>, point: Arc<Point>, reading: Reading) -> Self {
        Self::at(name, point, reading, Utc::now())
    }

    pub fn at(
        name: impl Into<String>,
        point: Arc<Point>,
        reading: Reading,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            point,
            tag: reading.tag,
            value: reading.value,
            timestamp,
        }
    }

    /// Nanoseconds since the unix epoch
    ///
    /// Saturates for instants outside the range representable as `i64` nanos.
    pub fn unix_nanos(&self) -> i64 {
        self.timestamp
            .timestamp_nanos_opt()
            .unwrap_or(if self.timestamp.timestamp() < 0 {
                i64::MIN
            } else {
                i64::MAX
            })
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.name, self.point)?;
        if let Some(tag) = &self.tag {
            write!(f, ",{}={}", tag.key, tag.value)?;
        }
        write!(f, " value={} {}", self.value, self.unix_nanos())
    }
}
