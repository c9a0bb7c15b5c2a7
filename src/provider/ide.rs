//! Consumption portal provider (i-DE).
//!
//! Browser-style REST portal: login is a JSON array of credentials plus
//! client fingerprint strings, and authentication lives entirely in the
//! response cookies, which are replayed on every call. Requests are
//! stateful per contract: a contract must be re-selected before asking for
//! its data, so the selection call rides inside every fetch (a re-login
//! resets the selection).
//!
//! The portal reports the harvestable range itself (`fechaMinima` /
//! `fechaMaxima`); each harvested day yields one daily summary point plus
//! one point per hourly breakdown entry.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::info;

use super::collect_cookies;
use crate::config::IdeConfig;
use crate::harvest::{
    AuthError, Authenticator, BodySignal, FetchError, FetchExecutor, HarvestError, HorizonPolicy,
    MaxSpan, Payload, RawResponse, RetryPolicy, SeriesTask, SessionManager, SessionState,
    TimeWindow,
};
use crate::shutdown::CancelToken;
use crate::{CanonicalPoint, FieldValue, Precision, SeriesKey};

/// Keys that never become fields: breakdown arrays are expanded instead,
/// date bounds are the timestamp, and `cups` is an identity tag.
const DENY_LIST: &[&str] = &[
    "valoresPeriodosTarifarios",
    "totalesPeriodosTarifarios",
    "fechaDesde",
    "fechaHasta",
    "periodos",
    "valores",
    "cups",
];

/// Static cookies the portal expects alongside the session ones.
const BASE_COOKIES: &str = "COOKIE_SUPPORT=true; GUEST_LANGUAGE_ID=es_ES; leyAnticookies=true";

const RETRY: RetryPolicy = RetryPolicy {
    rate_limit_pause: StdDuration::from_secs(60),
    transient_backoff: crate::harvest::Backoff::Fixed(StdDuration::from_secs(5)),
};

/// Portal request with the headers and cookies every call needs.
fn portal_request(builder: RequestBuilder, state: &SessionState) -> RequestBuilder {
    let cookies = match &state.token {
        Some(session) => format!("{BASE_COOKIES}; {session}"),
        None => BASE_COOKIES.to_string(),
    };
    builder
        .header("dispositivo", "desktop")
        .header("AppVersion", "v2")
        .header("Cookie", cookies)
}

/// Login: JSON array of credentials and client fingerprint; the session is
/// the cookie jar of the response.
pub struct IdeAuth {
    config: Arc<IdeConfig>,
}

impl IdeAuth {
    /// Authenticator for one portal account.
    pub fn new(config: Arc<IdeConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Authenticator for IdeAuth {
    async fn login(&self, client: &Client) -> Result<SessionState, AuthError> {
        let body = json!([
            self.config.username,
            self.config.password,
            "null",
            "Windows 10",
            "PC",
            "Firefox 112.0",
            "0",
            "",
            "n"
        ]);
        let response = portal_request(
            client.post(format!("{}/loginNew/login", self.config.base_url)),
            &SessionState::anonymous(),
        )
        .json(&body)
        .send()
        .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::CredentialsRejected(format!(
                "portal login returned status {status}"
            )));
        }
        let cookies = collect_cookies(response.headers()).ok_or_else(|| {
            AuthError::Malformed("portal login set no session cookies".to_string())
        })?;
        Ok(SessionState::with_token(cookies))
    }
}

fn array_probe(payload: &Payload) -> BodySignal {
    match payload.as_json() {
        Some(Value::Array(_)) => BodySignal::WellFormed,
        // The portal answers expired sessions with an HTML login page
        None => BodySignal::SessionExpired,
        Some(other) => BodySignal::Malformed(format!("expected array, got {other}")),
    }
}

fn contracts_probe(payload: &Payload) -> BodySignal {
    match payload.as_json() {
        Some(body) if body.get("contratos").and_then(Value::as_array).is_some() => {
            BodySignal::WellFormed
        }
        None => BodySignal::SessionExpired,
        Some(other) => BodySignal::Malformed(format!("expected contract list, got {other}")),
    }
}

fn range_probe(payload: &Payload) -> BodySignal {
    match payload.as_json() {
        Some(body)
            if body.get("fechaMinima").is_some() && body.get("fechaMaxima").is_some() =>
        {
            BodySignal::WellFormed
        }
        None => BodySignal::SessionExpired,
        Some(other) => BodySignal::Malformed(format!("expected date range, got {other}")),
    }
}

/// Portal dates look like `27-06-202300:00:00`.
fn parse_portal_datetime(raw: &str) -> Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(raw, "%d-%m-%Y%H:%M:%S")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| format!("bad portal date '{raw}': {e}"))
}

/// GET through the executor with portal headers and the session cookies.
async fn portal_get(
    executor: &FetchExecutor,
    session: &mut SessionManager,
    url: String,
    probe: crate::harvest::BodyProbe,
) -> Result<Payload, FetchError> {
    executor
        .execute(session, probe, move |client, state| {
            let url = url.clone();
            async move {
                let response = portal_request(client.get(&url), &state).send().await?;
                RawResponse::from_response(response).await
            }
        })
        .await
}

/// Select a contract, then GET `url` in the same closure so a mid-flight
/// re-login cannot leave the selection stale.
async fn portal_get_selected(
    executor: &FetchExecutor,
    session: &mut SessionManager,
    base_url: &str,
    cod_contrato: &str,
    url: String,
    probe: crate::harvest::BodyProbe,
) -> Result<Payload, FetchError> {
    let select_url = format!("{base_url}/cto/seleccion/{cod_contrato}");
    executor
        .execute(session, probe, move |client, state| {
            let select_url = select_url.clone();
            let url = url.clone();
            async move {
                portal_request(client.get(&select_url), &state)
                    .send()
                    .await?;
                let response = portal_request(client.get(&url), &state).send().await?;
                RawResponse::from_response(response).await
            }
        })
        .await
}

/// Enumerate self-consumption contracts and their harvestable ranges.
/// Contracts whose newest day shows zero generation are skipped for the
/// run.
pub async fn discover(
    config: &IdeConfig,
    client: &Client,
    cancel: &CancelToken,
) -> Result<Vec<Box<dyn SeriesTask>>, HarvestError> {
    let config = Arc::new(config.clone());
    let mut session = SessionManager::new(Box::new(IdeAuth::new(Arc::clone(&config))));
    let executor = FetchExecutor::new(client.clone(), RETRY, cancel.clone());

    let contracts = portal_get(
        &executor,
        &mut session,
        format!("{}/cto/listaCtos/", config.base_url),
        contracts_probe,
    )
    .await?;
    let contracts = contracts
        .as_json()
        .and_then(|b| b.get("contratos"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut tasks: Vec<Box<dyn SeriesTask>> = Vec::new();
    for contract in &contracts {
        let (Some(cod_contrato), Some(cups)) = (
            contract.get("codContrato").and_then(Value::as_str),
            contract.get("cups").and_then(Value::as_str),
        ) else {
            return Err(HarvestError::Discovery {
                provider: "ide".to_string(),
                message: format!("contract entry missing codContrato/cups: {contract}"),
            });
        };
        // Only self-consumption contracts expose production data
        if contract.get("tipUsoEnergiaCorto").and_then(Value::as_str) == Some("-") {
            continue;
        }

        let range = portal_get_selected(
            &executor,
            &mut session,
            &config.base_url,
            cod_contrato,
            format!("{}/consumoNew/obtenerLimiteFechasConsumo", config.base_url),
            range_probe,
        )
        .await?;
        let parse_bound = |key: &str| -> Result<DateTime<Utc>, HarvestError> {
            range
                .as_json()
                .and_then(|b| b.get(key))
                .and_then(Value::as_str)
                .ok_or_else(|| HarvestError::Discovery {
                    provider: "ide".to_string(),
                    message: format!("range response missing {key}"),
                })
                .and_then(|raw| {
                    parse_portal_datetime(raw).map_err(|message| HarvestError::Discovery {
                        provider: "ide".to_string(),
                        message,
                    })
                })
        };
        let fecha_minima = parse_bound("fechaMinima")?;
        let fecha_maxima = parse_bound("fechaMaxima")?;

        // Generation check against the newest available day
        let latest = portal_get_selected(
            &executor,
            &mut session,
            &config.base_url,
            cod_contrato,
            production_url(&config.base_url, fecha_maxima),
            array_probe,
        )
        .await?;
        let latest_total = latest
            .as_json()
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get("total"))
            .and_then(Value::as_f64);
        if latest_total == Some(0.0) {
            info!(cups, "no generation on newest day, skipping contract");
            continue;
        }

        tasks.push(Box::new(IdeContractTask {
            config: Arc::clone(&config),
            cod_contrato: cod_contrato.to_string(),
            cups: cups.to_string(),
            fecha_minima,
            fecha_maxima,
        }));
    }
    info!(contracts = tasks.len(), "discovered contracts");
    Ok(tasks)
}

fn production_url(base_url: &str, day: DateTime<Utc>) -> String {
    let date = day.format("%d-%m-%Y");
    format!("{base_url}/consumoNew/obtenerDatosProduccionDH/{date}/{date}/horas/")
}

/// Daily production/consumption series for one contract.
pub struct IdeContractTask {
    config: Arc<IdeConfig>,
    cod_contrato: String,
    cups: String,
    fecha_minima: DateTime<Utc>,
    fecha_maxima: DateTime<Utc>,
}

#[async_trait]
impl SeriesTask for IdeContractTask {
    fn series_key(&self) -> SeriesKey {
        // Checkpoint rides on the daily summary series
        SeriesKey::new("energy_consumption")
            .with_tag("cups", &self.cups)
            .with_tag("frequency", "day")
    }

    fn precision(&self) -> Precision {
        Precision::Seconds
    }

    fn default_origin(&self) -> DateTime<Utc> {
        self.fecha_minima
    }

    fn max_span(&self) -> MaxSpan {
        MaxSpan::Day
    }

    fn horizon_policy(&self) -> HorizonPolicy {
        // fechaMaxima is midnight of the newest day; cover that whole day
        HorizonPolicy::Until(self.fecha_maxima + Duration::days(1))
    }

    fn retry_policy(&self) -> RetryPolicy {
        RETRY
    }

    fn make_authenticator(&self) -> Box<dyn Authenticator> {
        Box::new(IdeAuth::new(Arc::clone(&self.config)))
    }

    async fn fetch_window(
        &self,
        executor: &FetchExecutor,
        session: &mut SessionManager,
        window: TimeWindow,
    ) -> Result<Vec<CanonicalPoint>, FetchError> {
        let payload = portal_get_selected(
            executor,
            session,
            &self.config.base_url,
            &self.cod_contrato,
            production_url(&self.config.base_url, window.start),
            array_probe,
        )
        .await?;
        map_production_day(&payload, &self.cups).map_err(|message| FetchError::Contract {
            status: 200,
            message,
        })
    }
}

/// Map one day's production records into 1 daily point + N hourly points
/// per record.
///
/// Tariff-period totals expand into per-period fields (the period name
/// becomes the field key). Each hourly point carries its hour's measured
/// value plus the period it fell in.
pub fn map_production_day(payload: &Payload, cups: &str) -> Result<Vec<CanonicalPoint>, String> {
    let entries = payload
        .as_json()
        .and_then(Value::as_array)
        .ok_or("production response is not an array")?;

    let mut points = Vec::new();
    for entry in entries {
        let cups = entry
            .get("cups")
            .and_then(Value::as_str)
            .unwrap_or(cups);
        let fecha = entry
            .get("fechaDesde")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("entry missing fechaDesde: {entry}"))?;
        let day = NaiveDate::parse_from_str(fecha, "%d-%m-%Y")
            .map_err(|e| format!("bad fechaDesde '{fecha}': {e}"))?;
        let midnight = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap_or_default());

        let periodos: Vec<&str> = entry
            .get("periodos")
            .and_then(Value::as_array)
            .map(|p| p.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let base = shared_fields(entry, &periodos)?;
        let tagged = |frequency: &str| {
            CanonicalPoint::new("energy_consumption")
                .tag("cups", cups)
                .tag("apiUrl", "obtenerDatosProduccionDH")
                .tag("frequency", frequency)
        };

        // Daily summary
        let mut daily = tagged("day");
        for (key, value) in &base {
            daily = daily.field(key.clone(), value.clone());
        }
        let daily = daily.at(midnight, Precision::Seconds);
        daily.validate()?;
        points.push(daily);

        // Hourly breakdown: each row holds one value in the column of its
        // tariff period
        let hours = entry
            .get("valoresPeriodosTarifarios")
            .and_then(Value::as_array)
            .ok_or_else(|| format!("entry missing valoresPeriodosTarifarios: {entry}"))?;
        for (hour_index, row) in hours.iter().enumerate() {
            let row = row
                .as_array()
                .ok_or_else(|| format!("hourly row {hour_index} is not an array"))?;
            let Some((period_index, value)) = row
                .iter()
                .enumerate()
                .find_map(|(j, v)| v.as_f64().map(|value| (j, value)))
            else {
                continue;
            };
            let periodo = periodos
                .get(period_index)
                .copied()
                .ok_or_else(|| format!("hourly row {hour_index} period out of range"))?;

            let mut hourly = tagged("hour");
            for (key, field) in &base {
                hourly = hourly.field(key.clone(), field.clone());
            }
            hourly = hourly
                .field("periodos", periodo)
                .field("value", value);
            let timestamp = midnight + Duration::hours(hour_index as i64 + 1);
            points.push(hourly.at(timestamp, Precision::Seconds));
        }
    }
    Ok(points)
}

/// Fields shared by the daily and hourly points: every scalar outside the
/// deny-list, plus the expanded tariff-period totals.
fn shared_fields(
    entry: &Value,
    periodos: &[&str],
) -> Result<Vec<(String, FieldValue)>, String> {
    let object = entry
        .as_object()
        .ok_or_else(|| format!("entry is not an object: {entry}"))?;
    let mut fields = Vec::new();
    for (key, value) in object {
        if key == "totalesPeriodosTarifarios" {
            let totals = value
                .as_array()
                .ok_or("totalesPeriodosTarifarios is not an array")?;
            for (i, total) in totals.iter().enumerate() {
                let periodo = periodos
                    .get(i)
                    .ok_or("more tariff totals than period names")?;
                if let Some(field) = FieldValue::from_json(total) {
                    fields.push((periodo.to_string(), field));
                }
            }
        } else if !DENY_LIST.contains(&key.as_str()) {
            if let Some(field) = FieldValue::from_json(value) {
                fields.push((key.clone(), field));
            }
        }
    }
    Ok(fields)
}
