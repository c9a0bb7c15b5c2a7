//! Checkpoint resolution.
//!
//! The sink itself is the only durable record of progress: a series resumes
//! one precision unit past the newest timestamp already stored under its
//! key. A fresh series, or a sink that cannot answer the question, falls
//! back to the provider's default origin so a harvest run never dies on a
//! checkpoint lookup.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::sink::Sink;
use crate::{Precision, SeriesKey};

/// Resolve the instant from which `key` should resume.
///
/// Returns the last stored timestamp plus one unit of `precision`, so the
/// boundary point is never refetched, or `default_origin` when the series
/// has no stored points yet. Sink lookup failures degrade to the default
/// origin with a warning; idempotent writes make the resulting refetch
/// harmless.
pub async fn resolve<S: Sink + ?Sized>(
    sink: &S,
    key: &SeriesKey,
    default_origin: DateTime<Utc>,
    precision: Precision,
) -> DateTime<Utc> {
    match sink.last_timestamp(key).await {
        Ok(Some(last)) => {
            let checkpoint = last + precision.unit();
            debug!(series = %key, %checkpoint, "resuming from stored checkpoint");
            checkpoint
        }
        Ok(None) => {
            debug!(series = %key, origin = %default_origin, "no stored points, starting from origin");
            default_origin
        }
        Err(e) => {
            warn!(series = %key, error = %e, origin = %default_origin,
                "checkpoint lookup failed, falling back to origin");
            default_origin
        }
    }
}
