//! Full harvest runs over the in-memory sink: seeded history, failure
//! isolation between series, and cooperative cancellation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;

use energy_data_harvester::harvest::{
    Authenticator, FetchError, FetchExecutor, Harvester, HorizonPolicy, MaxSpan, NoAuth,
    RetryPolicy, SeriesTask, SessionManager, TimeWindow,
};
use energy_data_harvester::shutdown::CancelToken;
use energy_data_harvester::sink::MemorySink;
use energy_data_harvester::{CanonicalPoint, FieldValue, Precision, SeriesKey};

use crate::support::{day_range, midnight, ScriptedTask};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 6, d).unwrap()
}

fn key() -> SeriesKey {
    SeriesKey::new("device_kpi_day").with_tag("device_id", "77")
}

#[tokio::test]
async fn seeded_history_is_extended_not_rewritten() {
    let sink = Arc::new(MemorySink::new());
    // Day 3 is already stored with a value the provider no longer reports
    sink.seed(
        CanonicalPoint::for_series(&key())
            .field("value", 999.0)
            .at(midnight(day(3)), Precision::Seconds),
    );

    // Provider still holds days 1 through 5
    let (task, requested) =
        ScriptedTask::new(key(), midnight(day(1)), midnight(day(6)), day_range(day(1), 5));
    let summary = Harvester::new(Arc::clone(&sink), CancelToken::new())
        .run(vec![Box::new(task)])
        .await;
    assert!(summary.failed.is_empty());

    // Only the days after the checkpoint were added
    let stored = sink.series_points(&key());
    let days: Vec<DateTime<Utc>> = stored.iter().map(|p| p.timestamp()).collect();
    assert_eq!(days, vec![midnight(day(3)), midnight(day(4)), midnight(day(5))]);

    // The seeded value survived untouched
    assert_eq!(
        stored[0].fields().get("value"),
        Some(&FieldValue::Float(999.0))
    );

    // And no request ever reached back past the checkpoint
    for window in requested.lock().unwrap().iter() {
        assert!(window.start > midnight(day(3)), "refetched {window:?}");
    }
}

/// Series that fails terminally on its first window.
struct BrokenTask;

#[async_trait]
impl SeriesTask for BrokenTask {
    fn series_key(&self) -> SeriesKey {
        SeriesKey::new("station_kpi_hour").with_tag("station_code", "NE=broken")
    }
    fn precision(&self) -> Precision {
        Precision::Seconds
    }
    fn default_origin(&self) -> DateTime<Utc> {
        midnight(day(1))
    }
    fn max_span(&self) -> MaxSpan {
        MaxSpan::Day
    }
    fn horizon_policy(&self) -> HorizonPolicy {
        HorizonPolicy::Until(midnight(day(3)))
    }
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1), Duration::from_millis(1))
    }
    fn make_authenticator(&self) -> Box<dyn Authenticator> {
        Box::new(NoAuth)
    }
    async fn fetch_window(
        &self,
        _executor: &FetchExecutor,
        _session: &mut SessionManager,
        _window: TimeWindow,
    ) -> Result<Vec<CanonicalPoint>, FetchError> {
        Err(FetchError::Contract {
            status: 200,
            message: "malformed body".to_string(),
        })
    }
}

#[tokio::test]
async fn one_failing_series_never_blocks_the_others() {
    let sink = Arc::new(MemorySink::new());
    let (good, _) =
        ScriptedTask::new(key(), midnight(day(1)), midnight(day(4)), day_range(day(1), 3));

    let summary = Harvester::new(Arc::clone(&sink), CancelToken::new())
        .with_concurrency(2)
        .run(vec![Box::new(BrokenTask), Box::new(good)])
        .await;

    assert_eq!(summary.completed.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert!(!summary.has_auth_failure());
    assert_eq!(sink.point_count(), 3);
    assert_eq!(
        summary.failed[0].0,
        SeriesKey::new("station_kpi_hour").with_tag("station_code", "NE=broken")
    );
}

#[tokio::test]
async fn cancelled_run_stops_before_fetching() {
    let sink = Arc::new(MemorySink::new());
    let cancel = CancelToken::new();
    cancel.cancel();

    let (task, requested) =
        ScriptedTask::new(key(), midnight(day(1)), midnight(day(6)), day_range(day(1), 5));
    let summary = Harvester::new(Arc::clone(&sink), cancel)
        .run(vec![Box::new(task)])
        .await;

    // The series ends cleanly as cancelled, not as failed
    assert!(summary.failed.is_empty());
    assert_eq!(summary.completed.len(), 1);
    assert!(summary.completed[0].cancelled);
    assert_eq!(summary.completed[0].windows_committed, 0);
    assert_eq!(sink.point_count(), 0);
    assert!(requested.lock().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_series_each_keep_their_own_checkpoint() {
    let sink = Arc::new(MemorySink::new());
    let key_a = SeriesKey::new("esios_indicator").with_tag("indicator", "1001");
    let key_b = SeriesKey::new("esios_indicator").with_tag("indicator", "1739");

    // Series B already has history; series A starts empty
    sink.seed(
        CanonicalPoint::for_series(&key_b)
            .field("value", 1.0)
            .at(midnight(day(2)), Precision::Seconds),
    );

    let (task_a, _) = ScriptedTask::new(
        key_a.clone(),
        midnight(day(1)),
        midnight(day(4)),
        day_range(day(1), 3),
    );
    let (task_b, requested_b) = ScriptedTask::new(
        key_b.clone(),
        midnight(day(1)),
        midnight(day(4)),
        day_range(day(1), 3),
    );

    let summary = Harvester::new(Arc::clone(&sink), CancelToken::new())
        .with_concurrency(2)
        .run(vec![Box::new(task_a), Box::new(task_b)])
        .await;
    assert!(summary.failed.is_empty());

    // A backfilled everything; B resumed past its seed
    assert_eq!(sink.series_points(&key_a).len(), 3);
    assert_eq!(sink.series_points(&key_b).len(), 2);
    for window in requested_b.lock().unwrap().iter() {
        assert!(window.start > midnight(day(2)));
    }
}
