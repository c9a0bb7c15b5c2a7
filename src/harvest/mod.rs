//! Harvest orchestration.
//!
//! A harvest run turns a set of [`SeriesTask`]s into sink writes: each
//! series resolves its checkpoint, pages through its window plan, and
//! commits one window's points at a time. Series run concurrently up to a
//! bound; within a series, windows are strictly sequential so the
//! checkpoint invariant (no gaps behind the newest stored point) holds
//! even if the process dies mid-run.

pub mod checkpoint;
pub mod classify;
pub mod executor;
pub mod retry;
pub mod session;
pub mod window;

pub use classify::{classify, BodyProbe, BodySignal, FetchOutcome, Payload};
pub use executor::{FetchError, FetchExecutor, RawResponse};
pub use retry::{Backoff, RetryPolicy};
pub use session::{AuthError, Authenticator, NoAuth, SessionManager, SessionState};
pub use window::{HorizonPolicy, MaxSpan, TimeWindow, WindowPlan};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::shutdown::CancelToken;
use crate::sink::{Sink, SinkError};
use crate::{CanonicalPoint, Precision, SeriesKey};

/// Default number of series harvested concurrently.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Terminal failure of one series. Other series are unaffected.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Fetching gave up (auth failure or contract violation)
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Writing to the sink failed
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Provider discovery failed before any series work started
    #[error("discovery failed for {provider}: {message}")]
    Discovery {
        /// Provider name
        provider: String,
        /// Failure description
        message: String,
    },
}

impl HarvestError {
    /// Whether this failure means the provider's credentials are bad, which
    /// the process exit code must surface.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, HarvestError::Fetch(FetchError::Auth(_)))
    }
}

/// One harvestable series: identity, scheduling parameters, and the
/// provider-specific fetch for a single window.
#[async_trait]
pub trait SeriesTask: Send + Sync {
    /// Identity of the series in the sink.
    fn series_key(&self) -> SeriesKey;

    /// Timestamp precision of this series' points.
    fn precision(&self) -> Precision;

    /// Where a series with no stored points starts.
    fn default_origin(&self) -> DateTime<Utc>;

    /// Provider's per-request span cap.
    fn max_span(&self) -> MaxSpan;

    /// How far into the future this series harvests.
    fn horizon_policy(&self) -> HorizonPolicy;

    /// Retry pacing for this provider.
    fn retry_policy(&self) -> RetryPolicy;

    /// Fresh authenticator for this series' own session.
    fn make_authenticator(&self) -> Box<dyn Authenticator>;

    /// Fetch and map one window's points. Implementations drive their
    /// requests through `executor` so retry, throttle, and re-login
    /// handling stays uniform.
    async fn fetch_window(
        &self,
        executor: &FetchExecutor,
        session: &mut SessionManager,
        window: TimeWindow,
    ) -> Result<Vec<CanonicalPoint>, FetchError>;
}

/// Outcome of one series in a run.
#[derive(Debug)]
pub struct SeriesReport {
    /// Series identity
    pub key: SeriesKey,
    /// Windows fetched and committed
    pub windows_committed: usize,
    /// Points written across those windows
    pub points_written: usize,
    /// Whether the series was cut short by cancellation
    pub cancelled: bool,
}

/// Aggregate result of a harvest run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Series that finished (possibly short, if cancelled)
    pub completed: Vec<SeriesReport>,
    /// Series that failed terminally, with their errors
    pub failed: Vec<(SeriesKey, HarvestError)>,
}

impl RunSummary {
    /// Whether any series failed because its credentials were rejected.
    pub fn has_auth_failure(&self) -> bool {
        self.failed.iter().any(|(_, e)| e.is_auth_failure())
    }

    /// Total points written across all series.
    pub fn total_points(&self) -> usize {
        self.completed.iter().map(|r| r.points_written).sum()
    }
}

/// Runs series tasks against one sink with bounded concurrency.
pub struct Harvester<S: Sink + ?Sized> {
    sink: Arc<S>,
    client: Client,
    cancel: CancelToken,
    concurrency: usize,
}

impl<S: Sink + ?Sized + 'static> Harvester<S> {
    /// Build a harvester over a sink and cancellation token.
    pub fn new(sink: Arc<S>, cancel: CancelToken) -> Self {
        Self {
            sink,
            client: Client::new(),
            cancel,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Override the concurrency bound (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Share an externally configured HTTP client.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Harvest every task, collecting per-series outcomes. A failed series
    /// never aborts the others.
    pub async fn run(&self, tasks: Vec<Box<dyn SeriesTask>>) -> RunSummary {
        let results: Vec<(SeriesKey, Result<SeriesReport, HarvestError>)> =
            stream::iter(tasks.into_iter().map(|task| {
                let sink = Arc::clone(&self.sink);
                let client = self.client.clone();
                let cancel = self.cancel.clone();
                async move {
                    let key = task.series_key();
                    let span = info_span!("series", series = %key);
                    let result = harvest_series(task.as_ref(), sink, client, cancel)
                        .instrument(span)
                        .await;
                    (key, result)
                }
            }))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = RunSummary::default();
        for (key, result) in results {
            match result {
                Ok(report) => summary.completed.push(report),
                Err(e) => {
                    warn!(series = %key, error = %e, "series failed");
                    summary.failed.push((key, e));
                }
            }
        }
        summary
    }
}

/// Harvest one series: checkpoint, window plan, fetch-then-commit loop.
async fn harvest_series<S: Sink + ?Sized>(
    task: &dyn SeriesTask,
    sink: Arc<S>,
    client: Client,
    cancel: CancelToken,
) -> Result<SeriesReport, HarvestError> {
    let key = task.series_key();
    let precision = task.precision();
    let from = checkpoint::resolve(sink.as_ref(), &key, task.default_origin(), precision).await;
    let plan = WindowPlan::new(from, task.max_span(), task.horizon_policy(), Utc::now());

    // Session is owned by this series; re-login here never disturbs others
    let mut session = SessionManager::new(task.make_authenticator());
    let executor = FetchExecutor::new(client, task.retry_policy(), cancel.clone());

    let mut report = SeriesReport {
        key: key.clone(),
        windows_committed: 0,
        points_written: 0,
        cancelled: false,
    };

    for window in plan {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        // Fetch fully before writing so a failure mid-window leaves the
        // sink exactly as the previous checkpoint described it
        let points = match task.fetch_window(&executor, &mut session, window).await {
            Ok(points) => points,
            Err(FetchError::Cancelled) => {
                report.cancelled = true;
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if !points.is_empty() {
            sink.write(&points).await?;
            report.points_written += points.len();
        }
        report.windows_committed += 1;
    }

    info!(
        windows = report.windows_committed,
        points = report.points_written,
        cancelled = report.cancelled,
        "series done"
    );
    Ok(report)
}
