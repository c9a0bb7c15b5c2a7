//! Grid indicator feed provider (ESIOS).
//!
//! Keyless sessions: a personal token rides as the `X-API-KEY` header on
//! every request. One series per configured indicator, fetched one day per
//! window. The solar generation forecast indicator (1295) publishes a day
//! ahead, so its horizon extends past now; all other indicators are
//! queried with hourly truncation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::EsiosConfig;
use crate::harvest::{
    Authenticator, BodySignal, FetchError, FetchExecutor, HorizonPolicy, MaxSpan, NoAuth, Payload,
    RawResponse, RetryPolicy, SeriesTask, SessionManager, TimeWindow,
};
use crate::{CanonicalPoint, FieldValue, Precision, SeriesKey};

/// Solar generation forecast, published one day into the future.
const FORECAST_INDICATOR: u32 = 1295;

/// Timestamps and geography live in the point's identity, not its fields.
const DENY_LIST: &[&str] = &["datetime", "datetime_utc", "tz_time", "geo_ids"];

const RETRY: RetryPolicy = RetryPolicy {
    rate_limit_pause: Duration::from_secs(20),
    transient_backoff: crate::harvest::Backoff::Fixed(Duration::from_secs(20)),
};

/// One task per configured indicator.
pub fn indicator_tasks(config: &EsiosConfig) -> Vec<Box<dyn SeriesTask>> {
    let config = Arc::new(config.clone());
    config
        .indicators
        .iter()
        .map(|&indicator| {
            Box::new(IndicatorTask {
                config: Arc::clone(&config),
                indicator,
            }) as Box<dyn SeriesTask>
        })
        .collect()
}

fn probe(payload: &Payload) -> BodySignal {
    match payload.as_json() {
        Some(body) if body.get("indicator").and_then(Value::as_object).is_some() => {
            BodySignal::WellFormed
        }
        Some(other) => BodySignal::Malformed(format!("expected indicator object, got {other}")),
        None => BodySignal::Malformed("indicator body is not JSON".to_string()),
    }
}

/// Hourly values of one grid indicator.
pub struct IndicatorTask {
    config: Arc<EsiosConfig>,
    indicator: u32,
}

#[async_trait]
impl SeriesTask for IndicatorTask {
    fn series_key(&self) -> SeriesKey {
        SeriesKey::new("esios_indicator").with_tag("indicator", self.indicator.to_string())
    }

    fn precision(&self) -> Precision {
        Precision::Seconds
    }

    fn default_origin(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 9, 1, 0, 0, 0).unwrap()
    }

    fn max_span(&self) -> MaxSpan {
        MaxSpan::Day
    }

    fn horizon_policy(&self) -> HorizonPolicy {
        if self.indicator == FORECAST_INDICATOR {
            HorizonPolicy::NowPlusOneDay
        } else {
            HorizonPolicy::Now
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RETRY
    }

    fn make_authenticator(&self) -> Box<dyn Authenticator> {
        Box::new(NoAuth)
    }

    async fn fetch_window(
        &self,
        executor: &FetchExecutor,
        session: &mut SessionManager,
        window: TimeWindow,
    ) -> Result<Vec<CanonicalPoint>, FetchError> {
        let url = format!("{}/indicators/{}", self.config.base_url, self.indicator);
        let token = self.config.token.clone();
        let mut params = vec![
            (
                "start_date",
                window.start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            ),
            (
                "end_date",
                (window.end - chrono::Duration::seconds(1))
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string(),
            ),
            ("locale", "es".to_string()),
            ("geo_agg", "sum".to_string()),
        ];
        // The forecast feed rejects hourly truncation
        if self.indicator != FORECAST_INDICATOR {
            params.push(("time_trunc", "hour".to_string()));
        }
        debug!(indicator = self.indicator, start = %window.start, "fetching indicator window");

        let payload = executor
            .execute(session, probe, move |client, _state| {
                let url = url.clone();
                let token = token.clone();
                let params = params.clone();
                async move {
                    let response = client
                        .get(&url)
                        .query(&params)
                        .header("X-API-KEY", token)
                        .header(
                            "Accept",
                            "application/json; application/vnd.esios-api-v1+json",
                        )
                        .send()
                        .await?;
                    RawResponse::from_response(response).await
                }
            })
            .await?;
        map_indicator_values(&payload).map_err(|message| FetchError::Contract {
            status: 200,
            message,
        })
    }
}

/// Map an indicator response: one point per value entry, tagged with the
/// indicator's id and names, timestamped from `datetime_utc`.
pub fn map_indicator_values(payload: &Payload) -> Result<Vec<CanonicalPoint>, String> {
    let indicator = payload
        .as_json()
        .and_then(|b| b.get("indicator"))
        .ok_or("response has no 'indicator' object")?;
    let id = indicator
        .get("id")
        .and_then(Value::as_i64)
        .ok_or("indicator missing id")?;
    let name = indicator.get("name").and_then(Value::as_str).unwrap_or("");
    let short_name = indicator
        .get("short_name")
        .and_then(Value::as_str)
        .unwrap_or("");
    let values = indicator
        .get("values")
        .and_then(Value::as_array)
        .ok_or("indicator missing values array")?;

    let mut points = Vec::new();
    for entry in values {
        let datetime_utc = entry
            .get("datetime_utc")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("value entry missing datetime_utc: {entry}"))?;
        let timestamp = NaiveDateTime::parse_from_str(datetime_utc, "%Y-%m-%dT%H:%M:%SZ")
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(|e| format!("bad datetime_utc '{datetime_utc}': {e}"))?;

        let mut point = CanonicalPoint::new("esios_indicator")
            .tag("indicator", id.to_string())
            .tag("name", name)
            .tag("short_name", short_name);
        let object = entry
            .as_object()
            .ok_or_else(|| format!("value entry is not an object: {entry}"))?;
        for (key, value) in object {
            if DENY_LIST.contains(&key.as_str()) {
                continue;
            }
            if let Some(field) = FieldValue::from_json(value) {
                point = point.field(key, field);
            }
        }
        let point = point.at(timestamp, Precision::Seconds);
        point.validate()?;
        points.push(point);
    }
    Ok(points)
}
