//! In-memory sink for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{Sink, SinkError};
use crate::{CanonicalPoint, SeriesKey};

/// Identity of a stored point: measurement, tags, truncated timestamp.
type PointIdentity = (String, Vec<(String, String)>, i64);

/// Sink that stores points in process memory with the same identity
/// semantics as InfluxDB: writing a point with an existing identity
/// replaces the stored one.
#[derive(Default)]
pub struct MemorySink {
    points: Mutex<BTreeMap<PointIdentity, CanonicalPoint>>,
    fail_lookups: AtomicBool,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn identity(point: &CanonicalPoint) -> PointIdentity {
        (
            point.measurement().to_string(),
            point
                .tags()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            point.truncated_timestamp(),
        )
    }

    /// Store a point directly, bypassing validation. Test setup helper.
    pub fn seed(&self, point: CanonicalPoint) {
        let mut points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        points.insert(Self::identity(&point), point);
    }

    /// Make subsequent `last_timestamp` calls fail, to exercise checkpoint
    /// fallback paths.
    pub fn fail_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    /// Number of stored points.
    pub fn point_count(&self) -> usize {
        self.points.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Snapshot of stored points matching `key` (same measurement, key's
    /// tags all present), sorted by timestamp.
    pub fn series_points(&self, key: &SeriesKey) -> Vec<CanonicalPoint> {
        let points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<CanonicalPoint> = points
            .values()
            .filter(|p| Self::matches(p, key))
            .cloned()
            .collect();
        matched.sort_by_key(|p| p.timestamp());
        matched
    }

    /// Tag-subset match: the key's tags must all appear on the point, but
    /// the point may carry extra tags, mirroring how a Flux filter on
    /// identity tags behaves.
    fn matches(point: &CanonicalPoint, key: &SeriesKey) -> bool {
        point.measurement() == key.measurement()
            && key
                .tags()
                .iter()
                .all(|(k, v)| point.tags().get(k) == Some(v))
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&self, batch: &[CanonicalPoint]) -> Result<(), SinkError> {
        for point in batch {
            point.validate().map_err(SinkError::InvalidPoint)?;
        }
        let mut points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        for point in batch {
            points.insert(Self::identity(point), point.clone());
        }
        Ok(())
    }

    async fn last_timestamp(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>, SinkError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(SinkError::MalformedQueryResult(
                "simulated lookup failure".to_string(),
            ));
        }
        let points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        Ok(points
            .values()
            .filter(|p| Self::matches(p, key))
            .map(|p| p.timestamp())
            .max())
    }
}
