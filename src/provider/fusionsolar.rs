//! Inverter telemetry provider (FusionSolar third-party API).
//!
//! Login-based JSON API. The login response sets a cookie jar including an
//! `XSRF-TOKEN` cookie whose value must also be replayed as a header on
//! every data request. Application-level failures ride inside 200
//! responses: `failCode == 407` is throttling, `failCode == 305` with
//! `USER_MUST_RELOGIN` means the session was evicted (logging in from two
//! places kicks the older session).
//!
//! Four series families per station: hourly station KPIs (day windows),
//! yearly station KPIs (year windows), per-device daily KPIs (day
//! windows), and a real-time station KPI snapshot taken once per run. All
//! carry millisecond timestamps, historical feeds from the entry's
//! `collectTime` and the snapshot from the response's `params.currentTime`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{collect_cookies, extract_cookie};
use crate::config::FusionSolarConfig;
use crate::harvest::{
    AuthError, Authenticator, BodySignal, FetchError, FetchExecutor, HarvestError, HorizonPolicy,
    MaxSpan, Payload, RawResponse, RetryPolicy, SeriesTask, SessionManager, SessionState,
    TimeWindow,
};
use crate::shutdown::CancelToken;
use crate::{CanonicalPoint, FieldValue, Precision, SeriesKey};

/// Device type ids the daily KPI endpoint supports.
const SUPPORTED_DEVICE_TYPES: &[i64] = &[1, 10, 17, 38, 39, 41, 47];

/// Station endpoints throttle aggressively; the feed recovers after ~30 s.
const STATION_RETRY: RetryPolicy = RetryPolicy {
    rate_limit_pause: Duration::from_secs(30),
    transient_backoff: crate::harvest::Backoff::Fixed(Duration::from_secs(30)),
};

/// Device endpoints tolerate a faster cadence.
const DEVICE_RETRY: RetryPolicy = RetryPolicy {
    rate_limit_pause: Duration::from_secs(10),
    transient_backoff: crate::harvest::Backoff::Fixed(Duration::from_secs(10)),
};

/// The real-time endpoint is polled rarely; a long pause is fine.
const REALTIME_RETRY: RetryPolicy = RetryPolicy {
    rate_limit_pause: Duration::from_secs(60),
    transient_backoff: crate::harvest::Backoff::Fixed(Duration::from_secs(60)),
};

/// Body probe shared by every endpoint of this provider.
pub fn probe(payload: &Payload) -> BodySignal {
    let Some(body) = payload.as_json() else {
        return BodySignal::Malformed("expected JSON body".to_string());
    };
    match body.get("failCode").and_then(Value::as_i64) {
        Some(407) => return BodySignal::RateLimited,
        Some(305) => return BodySignal::SessionExpired,
        _ => {}
    }
    if body.get("data").is_some() {
        BodySignal::WellFormed
    } else {
        BodySignal::Malformed("response has no 'data' key".to_string())
    }
}

/// Login exchange: POST credentials, capture the cookie jar. The
/// `XSRF-TOKEN` cookie value doubles as a request header.
#[derive(Clone)]
pub struct FusionSolarAuth {
    config: Arc<FusionSolarConfig>,
}

impl FusionSolarAuth {
    /// Authenticator for one credential block.
    pub fn new(config: Arc<FusionSolarConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Authenticator for FusionSolarAuth {
    async fn login(&self, client: &Client) -> Result<SessionState, AuthError> {
        let response = client
            .post(format!("{}/login", self.config.base_url))
            .json(&json!({
                "userName": self.config.username,
                "systemCode": self.config.system_code,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Malformed(format!(
                "login returned status {status}"
            )));
        }
        let cookies = collect_cookies(response.headers());
        let xsrf = extract_cookie(response.headers(), "XSRF-TOKEN");
        let body: Value = response.json().await?;
        if body.get("success").and_then(Value::as_bool) != Some(true) {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            return Err(AuthError::CredentialsRejected(message));
        }
        let cookies = cookies
            .ok_or_else(|| AuthError::Malformed("login set no cookies".to_string()))?;
        if xsrf.is_none() {
            return Err(AuthError::Malformed(
                "login response missing XSRF-TOKEN cookie".to_string(),
            ));
        }
        Ok(SessionState::with_token(cookies))
    }
}

/// Pull the XSRF token value out of the stored cookie string.
fn xsrf_token(cookies: &str) -> Option<&str> {
    cookies
        .split("; ")
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "XSRF-TOKEN")
        .map(|(_, v)| v)
}

/// POST an authenticated request to a provider endpoint.
async fn post_endpoint(
    client: Client,
    state: SessionState,
    url: String,
    body: Value,
) -> Result<RawResponse, reqwest::Error> {
    let mut request = client.post(url).json(&body);
    if let Some(cookies) = &state.token {
        request = request.header("Cookie", cookies.clone());
        if let Some(xsrf) = xsrf_token(cookies) {
            request = request.header("XSRF-TOKEN", xsrf.to_string());
        }
    }
    RawResponse::from_response(request.send().await?).await
}

/// Enumerate stations and their supported devices, producing one task per
/// station KPI family plus one per device.
pub async fn discover(
    config: &FusionSolarConfig,
    client: &Client,
    cancel: &CancelToken,
) -> Result<Vec<Box<dyn SeriesTask>>, HarvestError> {
    let config = Arc::new(config.clone());
    let mut session = SessionManager::new(Box::new(FusionSolarAuth::new(Arc::clone(&config))));
    let executor = FetchExecutor::new(client.clone(), STATION_RETRY, cancel.clone());

    let url = format!("{}/getStationList", config.base_url);
    let stations = executor
        .execute(&mut session, probe, |client, state| {
            post_endpoint(client, state, url.clone(), json!({}))
        })
        .await?;
    let station_codes = extract_station_codes(&stations)
        .map_err(|message| HarvestError::Discovery {
            provider: "fusionsolar".to_string(),
            message,
        })?;
    info!(stations = station_codes.len(), "discovered stations");

    let mut tasks: Vec<Box<dyn SeriesTask>> = Vec::new();
    for code in &station_codes {
        tasks.push(Box::new(StationKpiTask {
            config: Arc::clone(&config),
            station_code: code.clone(),
            kind: StationKpiKind::Hour,
        }));
        tasks.push(Box::new(StationKpiTask {
            config: Arc::clone(&config),
            station_code: code.clone(),
            kind: StationKpiKind::Year,
        }));
        tasks.push(Box::new(StationRealtimeTask {
            config: Arc::clone(&config),
            station_code: code.clone(),
        }));

        let url = format!("{}/getDevList", config.base_url);
        let body = json!({ "stationCodes": code });
        let devices = executor
            .execute(&mut session, probe, |client, state| {
                post_endpoint(client, state, url.clone(), body.clone())
            })
            .await?;
        for (device_id, station_code) in
            extract_devices(&devices).map_err(|message| HarvestError::Discovery {
                provider: "fusionsolar".to_string(),
                message,
            })?
        {
            tasks.push(Box::new(DeviceKpiTask {
                config: Arc::clone(&config),
                station_code,
                device_id,
            }));
        }
    }
    Ok(tasks)
}

fn extract_station_codes(payload: &Payload) -> Result<Vec<String>, String> {
    let data = payload
        .as_json()
        .and_then(|b| b.get("data"))
        .and_then(Value::as_array)
        .ok_or("station list 'data' is not an array")?;
    data.iter()
        .map(|station| {
            station
                .get("stationCode")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| format!("station entry missing stationCode: {station}"))
        })
        .collect()
}

fn extract_devices(payload: &Payload) -> Result<Vec<(i64, String)>, String> {
    let data = payload
        .as_json()
        .and_then(|b| b.get("data"))
        .and_then(Value::as_array)
        .ok_or("device list 'data' is not an array")?;
    let mut devices = Vec::new();
    for device in data {
        let type_id = device
            .get("devTypeId")
            .and_then(Value::as_i64)
            .ok_or_else(|| format!("device entry missing devTypeId: {device}"))?;
        if !SUPPORTED_DEVICE_TYPES.contains(&type_id) {
            continue;
        }
        let id = device
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| format!("device entry missing id: {device}"))?;
        let station = device
            .get("stationCode")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("device entry missing stationCode: {device}"))?;
        devices.push((id, station.to_string()));
    }
    Ok(devices)
}

/// Which station KPI family a task covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationKpiKind {
    /// Hourly KPIs, fetched one day per request
    Hour,
    /// Yearly KPIs, fetched one year per request
    Year,
}

/// Station KPI series (hourly or yearly).
pub struct StationKpiTask {
    config: Arc<FusionSolarConfig>,
    station_code: String,
    kind: StationKpiKind,
}

impl StationKpiTask {
    fn endpoint(&self) -> &'static str {
        match self.kind {
            StationKpiKind::Hour => "getKpiStationHour",
            StationKpiKind::Year => "getKpiStationYear",
        }
    }

    fn measurement(&self) -> &'static str {
        match self.kind {
            StationKpiKind::Hour => "station_kpi_hour",
            StationKpiKind::Year => "station_kpi_year",
        }
    }
}

#[async_trait]
impl SeriesTask for StationKpiTask {
    fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.measurement()).with_tag("station_code", &self.station_code)
    }

    fn precision(&self) -> Precision {
        Precision::Milliseconds
    }

    fn default_origin(&self) -> DateTime<Utc> {
        match self.kind {
            // First instants the feed holds data for
            StationKpiKind::Hour => Utc.with_ymd_and_hms(2022, 9, 14, 22, 0, 0).unwrap(),
            StationKpiKind::Year => Utc.with_ymd_and_hms(2022, 1, 1, 1, 0, 0).unwrap(),
        }
    }

    fn max_span(&self) -> MaxSpan {
        match self.kind {
            StationKpiKind::Hour => MaxSpan::Day,
            StationKpiKind::Year => MaxSpan::Year,
        }
    }

    fn horizon_policy(&self) -> HorizonPolicy {
        HorizonPolicy::Now
    }

    fn retry_policy(&self) -> RetryPolicy {
        STATION_RETRY
    }

    fn make_authenticator(&self) -> Box<dyn Authenticator> {
        Box::new(FusionSolarAuth::new(Arc::clone(&self.config)))
    }

    async fn fetch_window(
        &self,
        executor: &FetchExecutor,
        session: &mut SessionManager,
        window: TimeWindow,
    ) -> Result<Vec<CanonicalPoint>, FetchError> {
        let url = format!("{}/{}", self.config.base_url, self.endpoint());
        let body = json!({
            "stationCodes": self.station_code,
            "collectTime": window.start.timestamp_millis(),
        });
        let payload = executor
            .execute(session, probe, |client, state| {
                post_endpoint(client, state, url.clone(), body.clone())
            })
            .await?;
        map_station_entries(&payload, self.measurement()).map_err(|message| {
            FetchError::Contract {
                status: 200,
                message,
            }
        })
    }
}

/// Per-device daily KPI series.
pub struct DeviceKpiTask {
    config: Arc<FusionSolarConfig>,
    station_code: String,
    device_id: i64,
}

#[async_trait]
impl SeriesTask for DeviceKpiTask {
    fn series_key(&self) -> SeriesKey {
        SeriesKey::new("device_kpi_day")
            .with_tag("station_code", &self.station_code)
            .with_tag("device_id", self.device_id.to_string())
    }

    fn precision(&self) -> Precision {
        Precision::Milliseconds
    }

    fn default_origin(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 9, 1, 22, 0, 0).unwrap()
    }

    fn max_span(&self) -> MaxSpan {
        MaxSpan::Day
    }

    fn horizon_policy(&self) -> HorizonPolicy {
        HorizonPolicy::Now
    }

    fn retry_policy(&self) -> RetryPolicy {
        DEVICE_RETRY
    }

    fn make_authenticator(&self) -> Box<dyn Authenticator> {
        Box::new(FusionSolarAuth::new(Arc::clone(&self.config)))
    }

    async fn fetch_window(
        &self,
        executor: &FetchExecutor,
        session: &mut SessionManager,
        window: TimeWindow,
    ) -> Result<Vec<CanonicalPoint>, FetchError> {
        let url = format!("{}/getDevKpiDay", self.config.base_url);
        let body = json!({
            "devIds": self.device_id,
            "collectTime": window.start.timestamp_millis(),
        });
        let payload = executor
            .execute(session, probe, |client, state| {
                post_endpoint(client, state, url.clone(), body.clone())
            })
            .await?;
        map_device_entries(&payload, &self.station_code, self.device_id).map_err(|message| {
            FetchError::Contract {
                status: 200,
                message,
            }
        })
    }
}

/// Real-time station KPI snapshot (income, power, health state).
///
/// The endpoint has no history: every request answers with the current
/// values, timestamped by the feed in `params.currentTime`. One snapshot
/// is taken per run; the checkpoint keeps a run that restarts within the
/// same millisecond from writing twice.
pub struct StationRealtimeTask {
    config: Arc<FusionSolarConfig>,
    station_code: String,
}

#[async_trait]
impl SeriesTask for StationRealtimeTask {
    fn series_key(&self) -> SeriesKey {
        SeriesKey::new("station_kpi_realtime").with_tag("station_code", &self.station_code)
    }

    fn precision(&self) -> Precision {
        Precision::Milliseconds
    }

    fn default_origin(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 9, 14, 22, 0, 0).unwrap()
    }

    fn max_span(&self) -> MaxSpan {
        // One window per run; the request ignores the window bounds
        MaxSpan::Unbounded
    }

    fn horizon_policy(&self) -> HorizonPolicy {
        HorizonPolicy::Now
    }

    fn retry_policy(&self) -> RetryPolicy {
        REALTIME_RETRY
    }

    fn make_authenticator(&self) -> Box<dyn Authenticator> {
        Box::new(FusionSolarAuth::new(Arc::clone(&self.config)))
    }

    async fn fetch_window(
        &self,
        executor: &FetchExecutor,
        session: &mut SessionManager,
        window: TimeWindow,
    ) -> Result<Vec<CanonicalPoint>, FetchError> {
        let url = format!("{}/getStationRealKpi", self.config.base_url);
        let body = json!({
            "stationCodes": self.station_code,
            "currentTime": window.end.timestamp_millis(),
        });
        let payload = executor
            .execute(session, probe, |client, state| {
                post_endpoint(client, state, url.clone(), body.clone())
            })
            .await?;
        map_realtime_entries(&payload).map_err(|message| FetchError::Contract {
            status: 200,
            message,
        })
    }
}

/// Map station KPI entries. Each entry carries its station code, a
/// millisecond `collectTime`, and a `dataItemMap` of scalar KPI fields.
pub fn map_station_entries(
    payload: &Payload,
    measurement: &str,
) -> Result<Vec<CanonicalPoint>, String> {
    entries(payload)?
        .iter()
        .map(|entry| {
            let station = entry
                .get("stationCode")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("entry missing stationCode: {entry}"))?;
            let point = CanonicalPoint::new(measurement).tag("station_code", station);
            finish_kpi_point(point, entry)
        })
        .collect()
}

/// Map device KPI entries. Station and device identity come from the task
/// (the feed echoes only the device serial number).
pub fn map_device_entries(
    payload: &Payload,
    station_code: &str,
    device_id: i64,
) -> Result<Vec<CanonicalPoint>, String> {
    entries(payload)?
        .iter()
        .map(|entry| {
            let mut point = CanonicalPoint::new("device_kpi_day")
                .tag("station_code", station_code)
                .tag("device_id", device_id.to_string());
            if let Some(sn) = entry.get("sn").and_then(Value::as_str) {
                point = point.tag("sn", sn);
            }
            finish_kpi_point(point, entry)
        })
        .collect()
}

/// Map real-time KPI entries. Snapshot entries carry no `collectTime`;
/// the response timestamps them all at once through `params.currentTime`.
pub fn map_realtime_entries(payload: &Payload) -> Result<Vec<CanonicalPoint>, String> {
    let current_time = payload
        .as_json()
        .and_then(|b| b.get("params"))
        .and_then(|p| p.get("currentTime"))
        .and_then(Value::as_i64)
        .ok_or("response missing params.currentTime")?;
    let timestamp = Utc
        .timestamp_millis_opt(current_time)
        .single()
        .ok_or_else(|| format!("currentTime {current_time} out of range"))?;

    entries(payload)?
        .iter()
        .map(|entry| {
            let station = entry
                .get("stationCode")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("entry missing stationCode: {entry}"))?;
            let mut point =
                CanonicalPoint::new("station_kpi_realtime").tag("station_code", station);
            let items = entry
                .get("dataItemMap")
                .and_then(Value::as_object)
                .ok_or_else(|| format!("entry missing dataItemMap: {entry}"))?;
            for (key, value) in items {
                if let Some(field) = FieldValue::from_json(value) {
                    point = point.field(key, field);
                }
            }
            let point = point.at(timestamp, Precision::Milliseconds);
            point.validate()?;
            Ok(point)
        })
        .collect()
}

/// The `data` array, tolerating `null` for windows the feed has nothing
/// for.
fn entries(payload: &Payload) -> Result<&[Value], String> {
    let data = payload
        .as_json()
        .and_then(|b| b.get("data"))
        .ok_or("response has no 'data' key")?;
    match data {
        Value::Array(entries) => Ok(entries),
        Value::Null => Ok(&[]),
        other => Err(format!("'data' is neither array nor null: {other}")),
    }
}

fn finish_kpi_point(mut point: CanonicalPoint, entry: &Value) -> Result<CanonicalPoint, String> {
    let collect_time = entry
        .get("collectTime")
        .and_then(Value::as_i64)
        .ok_or_else(|| format!("entry missing collectTime: {entry}"))?;
    let timestamp = Utc
        .timestamp_millis_opt(collect_time)
        .single()
        .ok_or_else(|| format!("collectTime {collect_time} out of range"))?;

    let items = entry
        .get("dataItemMap")
        .and_then(Value::as_object)
        .ok_or_else(|| format!("entry missing dataItemMap: {entry}"))?;
    for (key, value) in items {
        if let Some(field) = FieldValue::from_json(value) {
            point = point.field(key, field);
        }
    }
    let point = point.at(timestamp, Precision::Milliseconds);
    point.validate()?;
    Ok(point)
}
