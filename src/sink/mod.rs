//! Time-series sink writers.
//!
//! The [`Sink`] trait is the narrow surface the harvester needs: batched
//! idempotent writes and a last-timestamp lookup for checkpoint resolution.
//! [`InfluxSink`] talks to InfluxDB v2 over HTTP; [`MemorySink`] backs
//! tests and dry runs.

mod influx;
mod memory;

pub use influx::InfluxSink;
pub use memory::MemorySink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{CanonicalPoint, SeriesKey};

/// Errors from sink operations.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Transport failure reaching the sink
    #[error("sink transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Sink rejected the request
    #[error("sink rejected request (status {status}): {message}")]
    Rejected {
        /// HTTP status of the rejection
        status: u16,
        /// Response body
        message: String,
    },

    /// A point failed validation before writing
    #[error("invalid point: {0}")]
    InvalidPoint(String),

    /// Checkpoint query result could not be interpreted
    #[error("malformed query result: {0}")]
    MalformedQueryResult(String),
}

/// A destination for canonical points.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Write a batch of points. Writes are idempotent: a point whose
    /// measurement, tags, and precision-truncated timestamp match a stored
    /// point replaces it.
    async fn write(&self, points: &[CanonicalPoint]) -> Result<(), SinkError>;

    /// Newest stored timestamp under `key`, or `None` for an empty series.
    async fn last_timestamp(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>, SinkError>;
}
