//! # Energy Data Harvester Library
//!
//! A resilient incremental harvester for energy and weather telemetry feeds.
//! Pulls time-stamped measurements from several unreliable remote providers
//! (inverter telemetry, meteorological feeds, consumption portals, grid
//! indicator feeds) and persists them into an InfluxDB-style time-series
//! sink without losing or duplicating previously observed data points.
//!
//! ## Features
//!
//! - **Checkpoint Resume**: each series resumes from the last durably stored
//!   timestamp in the sink, so restarts never create gaps or duplicates
//! - **Windowed Fetching**: provider time ranges are paged through in
//!   non-overlapping windows capped at each provider's maximum span
//! - **Uniform Retry Discipline**: rate limiting, transient errors, and
//!   session expiry are classified and handled behind one executor
//! - **Idempotent Writes**: points are identified by measurement + tags +
//!   timestamp, so refetching a window overwrites instead of appending
//!
//! ## Quick Start
//!
//! ```no_run
//! use energy_data_harvester::harvest::Harvester;
//! use energy_data_harvester::shutdown::CancelToken;
//! use energy_data_harvester::sink::InfluxSink;
//! use std::sync::Arc;
//!
//! # async fn example(tasks: Vec<Box<dyn energy_data_harvester::harvest::SeriesTask>>) {
//! let sink = Arc::new(InfluxSink::new(
//!     "http://localhost:8086",
//!     "token",
//!     "org",
//!     "bucket",
//! ));
//! let harvester = Harvester::new(sink, CancelToken::new()).with_concurrency(4);
//! let summary = harvester.run(tasks).await;
//! println!("{} series completed", summary.completed.len());
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`harvest`] - Checkpoint resolution, window scheduling, fetch execution
//! - [`provider`] - Provider integrations and point mappers
//! - [`sink`] - Time-series sink writers (InfluxDB v2, in-memory)
//! - [`solar`] - Solar-relative time normalization
//! - [`config`] - Startup configuration loading
//! - [`shutdown`] - Cooperative cancellation
//! - [`cli`] - CLI command implementations

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// CLI command implementations
pub mod cli;

/// Startup configuration loading
pub mod config;

/// Harvest orchestration: checkpoints, windows, sessions, fetch execution
pub mod harvest;

/// Provider integrations and point mappers
pub mod provider;

/// Cooperative cancellation shared across tasks
pub mod shutdown;

/// Time-series sink writers
pub mod sink;

/// Solar-relative time normalization
pub mod solar;

/// Timestamp precision attached to a series and its points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    /// Whole seconds
    #[serde(rename = "s")]
    Seconds,
    /// Milliseconds
    #[serde(rename = "ms")]
    Milliseconds,
}

impl Precision {
    /// InfluxDB v2 write-API precision parameter value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Seconds => "s",
            Precision::Milliseconds => "ms",
        }
    }

    /// One unit at this precision, used to advance a checkpoint past the
    /// last stored instant.
    pub fn unit(&self) -> chrono::Duration {
        match self {
            Precision::Seconds => chrono::Duration::seconds(1),
            Precision::Milliseconds => chrono::Duration::milliseconds(1),
        }
    }

    /// Truncate a UTC timestamp to an integer in this precision's units.
    pub fn truncate(&self, ts: DateTime<Utc>) -> i64 {
        match self {
            Precision::Seconds => ts.timestamp(),
            Precision::Milliseconds => ts.timestamp_millis(),
        }
    }
}

/// Scalar field value carried by a canonical point.
///
/// Values pass through with the provider-native type; mappers never coerce.
/// An inconsistent type for the same field key across points is a provider
/// bug, not something repaired here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Floating point value
    Float(f64),
    /// Integer value
    Integer(i64),
    /// Text value
    Text(String),
    /// Boolean value
    Boolean(bool),
}

impl FieldValue {
    /// Render the value in InfluxDB line-protocol field syntax.
    fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{v}"),
            FieldValue::Integer(v) => format!("{v}i"),
            FieldValue::Text(v) => format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")),
            FieldValue::Boolean(v) => format!("{v}"),
        }
    }

    /// Convert a JSON scalar into a field value. Returns `None` for nulls
    /// and non-scalar values.
    pub fn from_json(value: &serde_json::Value) -> Option<FieldValue> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(FieldValue::Integer(i))
                } else {
                    n.as_f64().map(FieldValue::Float)
                }
            }
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(FieldValue::Boolean(*b)),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

/// Identity of one logical time series being harvested: a measurement name
/// plus stable identifying tags (station, device, contract, indicator id).
///
/// Used both to seed window scheduling (checkpoint lookup) and to tag
/// written points. Immutable once a harvest run starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    measurement: String,
    tags: BTreeMap<String, String>,
}

impl SeriesKey {
    /// Create a series key for a measurement with no tags yet.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
        }
    }

    /// Add an identity tag. Tag keys are unique; adding an existing key
    /// replaces its value.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Identity tags in key order.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.measurement)?;
        for (k, v) in &self.tags {
            write!(f, ",{k}={v}")?;
        }
        Ok(())
    }
}

/// Escape a measurement name for line protocol.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape a tag key, tag value, or field key for line protocol.
fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// The normalized record written to the sink: measurement, ordered tags,
/// field map, timestamp, and precision.
///
/// Two points with identical measurement + tags + (precision-truncated)
/// timestamp are the same stored fact; rewriting one overwrites rather than
/// appends.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalPoint {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: DateTime<Utc>,
    precision: Precision,
}

impl CanonicalPoint {
    /// Start building a point for a measurement. The timestamp defaults to
    /// the Unix epoch in second precision until [`CanonicalPoint::at`] is
    /// called.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            precision: Precision::Seconds,
        }
    }

    /// Start a point from a series key, copying its measurement and tags.
    pub fn for_series(key: &SeriesKey) -> Self {
        Self {
            measurement: key.measurement().to_string(),
            tags: key.tags().clone(),
            fields: BTreeMap::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            precision: Precision::Seconds,
        }
    }

    /// Add a tag key/value pair.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field key/value pair.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set the timestamp and its precision.
    pub fn at(mut self, timestamp: DateTime<Utc>, precision: Precision) -> Self {
        self.timestamp = timestamp;
        self.precision = precision;
        self
    }

    /// Measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Tag set in key order.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Field map in key order.
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Point timestamp (UTC).
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Timestamp precision.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Timestamp truncated to the point's precision units.
    pub fn truncated_timestamp(&self) -> i64 {
        self.precision.truncate(self.timestamp)
    }

    /// Validate point integrity before writing.
    pub fn validate(&self) -> Result<(), String> {
        if self.measurement.is_empty() {
            return Err("measurement name cannot be empty".to_string());
        }
        if self.fields.is_empty() {
            return Err(format!(
                "point for measurement '{}' has no fields",
                self.measurement
            ));
        }
        Ok(())
    }

    /// Render the point as one InfluxDB v2 line-protocol line.
    ///
    /// The timestamp is emitted in the point's precision units; the write
    /// request must carry the matching `precision` parameter.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);
        for (k, v) in &self.tags {
            line.push(',');
            line.push_str(&escape_tag(k));
            line.push('=');
            line.push_str(&escape_tag(v));
        }
        line.push(' ');
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", escape_tag(k), v.to_line_protocol()))
            .collect();
        line.push_str(&fields.join(","));
        line.push(' ');
        line.push_str(&self.truncated_timestamp().to_string());
        line
    }
}
