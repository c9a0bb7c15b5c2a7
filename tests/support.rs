//! Shared test support: a scripted provider task backed by an in-memory
//! day-keyed dataset, recording every window it is asked for.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use energy_data_harvester::harvest::{
    Authenticator, FetchError, FetchExecutor, HorizonPolicy, MaxSpan, NoAuth, RetryPolicy,
    SeriesTask, SessionManager, TimeWindow,
};
use energy_data_harvester::{CanonicalPoint, Precision, SeriesKey};

/// Task that serves one value per calendar day from a fixed dataset.
pub struct ScriptedTask {
    key: SeriesKey,
    origin: DateTime<Utc>,
    horizon: DateTime<Utc>,
    data: BTreeMap<NaiveDate, f64>,
    requested: Arc<Mutex<Vec<TimeWindow>>>,
}

impl ScriptedTask {
    pub fn new(
        key: SeriesKey,
        origin: DateTime<Utc>,
        horizon: DateTime<Utc>,
        data: BTreeMap<NaiveDate, f64>,
    ) -> (Self, Arc<Mutex<Vec<TimeWindow>>>) {
        let requested = Arc::new(Mutex::new(Vec::new()));
        let task = Self {
            key,
            origin,
            horizon,
            data,
            requested: Arc::clone(&requested),
        };
        (task, requested)
    }
}

#[async_trait]
impl SeriesTask for ScriptedTask {
    fn series_key(&self) -> SeriesKey {
        self.key.clone()
    }

    fn precision(&self) -> Precision {
        Precision::Seconds
    }

    fn default_origin(&self) -> DateTime<Utc> {
        self.origin
    }

    fn max_span(&self) -> MaxSpan {
        MaxSpan::Day
    }

    fn horizon_policy(&self) -> HorizonPolicy {
        // Fixed bound keeps the tests independent of the wall clock
        HorizonPolicy::Until(self.horizon)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(StdDuration::from_millis(1), StdDuration::from_millis(1))
    }

    fn make_authenticator(&self) -> Box<dyn Authenticator> {
        Box::new(NoAuth)
    }

    async fn fetch_window(
        &self,
        _executor: &FetchExecutor,
        _session: &mut SessionManager,
        window: TimeWindow,
    ) -> Result<Vec<CanonicalPoint>, FetchError> {
        self.requested
            .lock()
            .expect("window log poisoned")
            .push(window);

        let mut points = Vec::new();
        for (day, value) in &self.data {
            let timestamp = chrono::TimeZone::from_utc_datetime(
                &Utc,
                &day.and_hms_opt(0, 0, 0).expect("valid midnight"),
            );
            if timestamp >= window.start && timestamp < window.end {
                let mut point = CanonicalPoint::new(self.key.measurement());
                for (k, v) in self.key.tags() {
                    point = point.tag(k.clone(), v.clone());
                }
                points.push(
                    point
                        .field("value", *value)
                        .at(timestamp, Precision::Seconds),
                );
            }
        }
        Ok(points)
    }
}

/// Midnight UTC of a calendar day.
pub fn midnight(date: NaiveDate) -> DateTime<Utc> {
    chrono::TimeZone::from_utc_datetime(&Utc, &date.and_hms_opt(0, 0, 0).expect("valid midnight"))
}

/// `days` consecutive days starting at `first`, valued by day index.
pub fn day_range(first: NaiveDate, days: i64) -> BTreeMap<NaiveDate, f64> {
    (0..days)
        .map(|i| (first + Duration::days(i), i as f64))
        .collect()
}
