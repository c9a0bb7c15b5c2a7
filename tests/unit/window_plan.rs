//! Window planning: the plan must partition [checkpoint, horizon) into
//! contiguous, non-overlapping windows regardless of span cap.

use chrono::{DateTime, TimeZone, Utc};
use energy_data_harvester::harvest::{HorizonPolicy, MaxSpan, TimeWindow, WindowPlan};

fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn assert_partition(windows: &[TimeWindow], from: DateTime<Utc>, horizon: DateTime<Utc>) {
    assert!(!windows.is_empty());
    assert_eq!(windows[0].start, from);
    assert_eq!(windows.last().unwrap().end, horizon);
    for pair in windows.windows(2) {
        assert_eq!(pair[0].end, pair[1].start, "gap or overlap between windows");
    }
    for w in windows {
        assert!(w.start < w.end, "empty or inverted window {w:?}");
    }
}

#[test]
fn day_span_partitions_a_multi_week_range() {
    let from = ts(2023, 5, 10, 7);
    let now = ts(2023, 6, 1, 15);
    let windows: Vec<TimeWindow> =
        WindowPlan::new(from, MaxSpan::Day, HorizonPolicy::Now, now).collect();

    assert_partition(&windows, from, now);
    for w in &windows {
        assert!(w.duration() <= chrono::Duration::days(1));
    }
    // 22 full days plus the clipped tail
    assert_eq!(windows.len(), 23);
}

#[test]
fn month_span_partitions_across_a_leap_february() {
    let from = ts(2024, 1, 30, 0);
    let now = ts(2024, 5, 1, 0);
    let windows: Vec<TimeWindow> =
        WindowPlan::new(from, MaxSpan::Month, HorizonPolicy::Now, now).collect();

    assert_partition(&windows, from, now);
    // Jan 30 + 1 month lands on Feb 29 in a leap year
    assert_eq!(windows[0].end, ts(2024, 2, 29, 0));
}

#[test]
fn year_span_partitions_a_multi_year_backfill() {
    let from = ts(2022, 1, 1, 1);
    let now = ts(2024, 6, 1, 0);
    let windows: Vec<TimeWindow> =
        WindowPlan::new(from, MaxSpan::Year, HorizonPolicy::Now, now).collect();

    assert_partition(&windows, from, now);
    assert_eq!(windows.len(), 3);
    assert_eq!(windows[1].start, ts(2023, 1, 1, 1));
}

#[test]
fn unbounded_span_is_one_window_to_the_horizon() {
    let from = ts(2022, 9, 1, 0);
    let now = ts(2023, 6, 1, 0);
    let windows: Vec<TimeWindow> =
        WindowPlan::new(from, MaxSpan::Unbounded, HorizonPolicy::Now, now).collect();
    assert_eq!(windows, vec![TimeWindow { start: from, end: now }]);
}

#[test]
fn forecast_horizon_reaches_one_day_past_now() {
    let now = ts(2023, 6, 1, 10);
    let plan = WindowPlan::new(ts(2023, 5, 31, 0), MaxSpan::Day, HorizonPolicy::NowPlusOneDay, now);
    let windows: Vec<TimeWindow> = plan.collect();
    assert_partition(&windows, ts(2023, 5, 31, 0), ts(2023, 6, 2, 10));
}

#[test]
fn current_series_plans_no_windows() {
    let now = ts(2023, 6, 1, 0);
    let plan = WindowPlan::new(now, MaxSpan::Day, HorizonPolicy::Now, now);
    assert!(plan.is_empty());

    let past_horizon = WindowPlan::new(
        ts(2023, 6, 2, 0),
        MaxSpan::Unbounded,
        HorizonPolicy::Until(now),
        now,
    );
    assert_eq!(past_horizon.count(), 0);
}
