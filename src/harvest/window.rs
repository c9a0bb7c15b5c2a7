//! Window scheduling for incremental fetches.
//!
//! A series resumes from its checkpoint and pages forward through
//! non-overlapping, half-open `[start, end)` windows until it reaches the
//! harvest horizon. Window length is capped by the provider's maximum
//! query span; calendar-length caps (month, year) follow calendar
//! arithmetic rather than fixed durations.

use chrono::{DateTime, Duration, Months, Utc};

/// A half-open time range `[start, end)` submitted to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Inclusive start of the window
    pub start: DateTime<Utc>,
    /// Exclusive end of the window
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window length.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Maximum span a provider accepts for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxSpan {
    /// One calendar day per request
    Day,
    /// One calendar month per request
    Month,
    /// One calendar year per request
    Year,
    /// No per-request cap; the whole remaining range goes in one window
    Unbounded,
}

impl MaxSpan {
    /// The window end that starts at `from`, capped at `horizon`.
    fn window_end(&self, from: DateTime<Utc>, horizon: DateTime<Utc>) -> DateTime<Utc> {
        let natural = match self {
            MaxSpan::Day => from + Duration::days(1),
            MaxSpan::Month => from + Months::new(1),
            MaxSpan::Year => from + Months::new(12),
            MaxSpan::Unbounded => horizon,
        };
        natural.min(horizon)
    }
}

/// How far into the future a series is harvested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizonPolicy {
    /// Up to the current instant
    Now,
    /// Up to 24 hours past the current instant, for forecast feeds
    NowPlusOneDay,
    /// Up to a provider-declared fixed bound
    Until(DateTime<Utc>),
}

impl HorizonPolicy {
    /// Resolve the policy against `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            HorizonPolicy::Now => now,
            HorizonPolicy::NowPlusOneDay => now + Duration::days(1),
            HorizonPolicy::Until(bound) => *bound,
        }
    }
}

/// Iterator over the windows needed to cover `[from, horizon)`.
///
/// The horizon is fixed when the plan is built; data arriving at the
/// provider during a long catch-up run is picked up by the next run rather
/// than by extending this one.
#[derive(Debug, Clone)]
pub struct WindowPlan {
    cursor: DateTime<Utc>,
    horizon: DateTime<Utc>,
    max_span: MaxSpan,
}

impl WindowPlan {
    /// Plan windows from `from` (typically the checkpoint) to the horizon
    /// resolved at `now`.
    pub fn new(
        from: DateTime<Utc>,
        max_span: MaxSpan,
        horizon: HorizonPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            cursor: from,
            horizon: horizon.resolve(now),
            max_span,
        }
    }

    /// The fixed horizon this plan runs to.
    pub fn horizon(&self) -> DateTime<Utc> {
        self.horizon
    }

    /// Whether the plan yields no windows at all (series already current).
    pub fn is_empty(&self) -> bool {
        self.cursor >= self.horizon
    }
}

impl Iterator for WindowPlan {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.cursor >= self.horizon {
            return None;
        }
        let end = self.max_span.window_end(self.cursor, self.horizon);
        let window = TimeWindow {
            start: self.cursor,
            end,
        };
        self.cursor = end;
        Some(window)
    }
}
