//! Meteorological open-data provider (AEMET).
//!
//! Every fetch is a two-step exchange: the API answers with a small JSON
//! envelope whose `datos` field points at the real data URL. Two feeds are
//! harvested together, the way the upstream publishes them:
//!
//! - the special radiation network, a semicolon CSV whose value columns
//!   are labelled with *solar hours* (timestamped here through the solar
//!   normalizer using each station's position), and
//! - the conventional observation JSON, mapped for exactly the stations
//!   that appeared in the radiation file.
//!
//! The radiation CSV only ever holds the latest published day, so the
//! series runs a single unbounded window per harvest; idempotent writes
//! absorb the overlap between runs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::AemetConfig;
use crate::harvest::{
    Authenticator, BodySignal, FetchError, FetchExecutor, HorizonPolicy, MaxSpan, NoAuth, Payload,
    RawResponse, RetryPolicy, SeriesTask, SessionManager, TimeWindow,
};
use crate::solar::{solar_to_epoch, StationPosition};
use crate::{CanonicalPoint, FieldValue, Precision, SeriesKey};

const RETRY: RetryPolicy = RetryPolicy {
    rate_limit_pause: Duration::from_secs(60),
    transient_backoff: crate::harvest::Backoff::Exponential {
        base: Duration::from_secs(5),
        cap: Duration::from_secs(60),
    },
};

/// Build the radiation series task. `input_file` replaces the remote CSV
/// with a previously archived one for reprocessing.
pub fn radiation_task(config: &AemetConfig, input_file: Option<PathBuf>) -> Box<dyn SeriesTask> {
    Box::new(RadiationTask {
        config: Arc::new(config.clone()),
        input_file,
    })
}

/// Envelope step: a JSON object carrying the data URL.
fn envelope_probe(payload: &Payload) -> BodySignal {
    match payload.as_json() {
        Some(body) if body.get("datos").and_then(Value::as_str).is_some() => {
            BodySignal::WellFormed
        }
        Some(body) => BodySignal::Malformed(format!("envelope missing 'datos': {body}")),
        None => BodySignal::Malformed("envelope is not JSON".to_string()),
    }
}

/// Observation data step: a JSON array of station records.
fn observations_probe(payload: &Payload) -> BodySignal {
    match payload.as_json() {
        Some(Value::Array(_)) => BodySignal::WellFormed,
        Some(other) => BodySignal::Malformed(format!("expected observation array, got {other}")),
        None => BodySignal::Malformed("observation body is not JSON".to_string()),
    }
}

/// Radiation data step: raw CSV text (a JSON body here means the API
/// answered with an error envelope instead of the file).
fn csv_probe(payload: &Payload) -> BodySignal {
    match payload {
        Payload::Text(_) => BodySignal::WellFormed,
        Payload::Json(body) => BodySignal::Malformed(format!("expected CSV, got JSON: {body}")),
    }
}

struct RadiationTask {
    config: Arc<AemetConfig>,
    input_file: Option<PathBuf>,
}

impl RadiationTask {
    /// One keyed GET driven through the executor.
    async fn fetch_url(
        &self,
        executor: &FetchExecutor,
        session: &mut SessionManager,
        url: String,
        probe: crate::harvest::BodyProbe,
    ) -> Result<Payload, FetchError> {
        let api_key = self.config.api_key.clone();
        executor
            .execute(session, probe, move |client, _state| {
                let url = url.clone();
                let api_key = api_key.clone();
                async move {
                    let response = client
                        .get(&url)
                        .query(&[("api_key", api_key.as_str())])
                        .send()
                        .await?;
                    RawResponse::from_response(response).await
                }
            })
            .await
    }

    /// Envelope then data.
    async fn fetch_two_step(
        &self,
        executor: &FetchExecutor,
        session: &mut SessionManager,
        endpoint: &str,
        data_probe: crate::harvest::BodyProbe,
    ) -> Result<Payload, FetchError> {
        let envelope = self
            .fetch_url(
                executor,
                session,
                format!("{}/{}", self.config.base_url, endpoint),
                envelope_probe,
            )
            .await?;
        let datos = envelope
            .as_json()
            .and_then(|b| b.get("datos"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| FetchError::Contract {
                status: 200,
                message: "envelope lost 'datos' after classification".to_string(),
            })?;
        self.fetch_url(executor, session, datos, data_probe).await
    }
}

#[async_trait]
impl SeriesTask for RadiationTask {
    fn series_key(&self) -> SeriesKey {
        SeriesKey::new("sun_radiation")
    }

    fn precision(&self) -> Precision {
        Precision::Seconds
    }

    fn default_origin(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 9, 1, 0, 0, 0).unwrap()
    }

    fn max_span(&self) -> MaxSpan {
        MaxSpan::Unbounded
    }

    fn horizon_policy(&self) -> HorizonPolicy {
        HorizonPolicy::Now
    }

    fn retry_policy(&self) -> RetryPolicy {
        RETRY
    }

    fn make_authenticator(&self) -> Box<dyn Authenticator> {
        // Per-request API key, no session
        Box::new(NoAuth)
    }

    async fn fetch_window(
        &self,
        executor: &FetchExecutor,
        session: &mut SessionManager,
        _window: TimeWindow,
    ) -> Result<Vec<CanonicalPoint>, FetchError> {
        // Station positions come from the observation feed; it is also the
        // source of the observation points themselves
        let observations = self
            .fetch_two_step(executor, session, "observacion/convencional/todas", observations_probe)
            .await?;
        let stations = observations
            .as_json()
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let csv_text = match &self.input_file {
            Some(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                FetchError::Contract {
                    status: 0,
                    message: format!("cannot read input file '{}': {e}", path.display()),
                }
            })?,
            None => {
                let payload = self
                    .fetch_two_step(executor, session, "red/especial/radiacion/", csv_probe)
                    .await?;
                match payload {
                    Payload::Text(text) => text,
                    Payload::Json(body) => {
                        return Err(FetchError::Contract {
                            status: 200,
                            message: format!("radiation endpoint returned JSON: {body}"),
                        })
                    }
                }
            }
        };

        let (mut points, identifiers) =
            map_radiation_csv(&csv_text, &stations).map_err(|message| FetchError::Contract {
                status: 200,
                message,
            })?;
        info!(
            radiation_points = points.len(),
            stations = identifiers.len(),
            "mapped radiation file"
        );
        points.extend(map_observations(&stations, &identifiers));
        Ok(points)
    }
}

/// Position and display name of a station found in the observation feed.
fn station_info(stations: &[Value], identifier: &str) -> Option<StationPosition> {
    stations
        .iter()
        .find(|s| s.get("idema").and_then(Value::as_str) == Some(identifier))
        .and_then(|s| {
            Some(StationPosition {
                latitude: s.get("lat")?.as_f64()?,
                longitude: s.get("lon")?.as_f64()?,
                altitude: s.get("alt")?.as_f64()?,
            })
        })
}

/// Parse the radiation CSV into points, returning also the identifiers of
/// the stations that contributed data.
///
/// File layout: a one-column title row, a one-column date row
/// (`dd-mm-yy`), then blocks of a `Tipo` header row labelling each value
/// column with its solar hour, followed by station rows
/// (`name;identifier;type;v;v;...`). Non-numeric cells in a station row
/// switch the current radiation type; columns whose `Tipo` label is not a
/// number (totals) are skipped.
pub fn map_radiation_csv(
    csv_text: &str,
    stations: &[Value],
) -> Result<(Vec<CanonicalPoint>, BTreeSet<String>), String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .has_headers(false)
        .from_reader(csv_text.as_bytes());

    let mut date: Option<NaiveDate> = None;
    let mut tipo_row: Vec<String> = Vec::new();
    let mut points = Vec::new();
    let mut identifiers = BTreeSet::new();

    for record in reader.records() {
        let record = record.map_err(|e| format!("radiation CSV parse error: {e}"))?;
        let cells: Vec<&str> = record.iter().map(str::trim).collect();
        match cells.as_slice() {
            [] | [""] => continue,
            [single] if single.contains("RADIACION") => continue,
            [single] => {
                date = Some(
                    NaiveDate::parse_from_str(single, "%d-%m-%y")
                        .map_err(|e| format!("bad radiation date '{single}': {e}"))?,
                );
            }
            _ if cells.get(2) == Some(&"Tipo") => {
                tipo_row = cells.iter().map(|c| c.to_string()).collect();
            }
            [station, identifier, rest @ ..] => {
                let Some(date) = date else {
                    return Err("radiation data row before date row".to_string());
                };
                if tipo_row.is_empty() {
                    return Err("radiation data row before Tipo header row".to_string());
                }
                let Some(position) = station_info(stations, identifier) else {
                    warn!(
                        station, identifier,
                        "station absent from observation feed, radiation rows dropped"
                    );
                    continue;
                };
                identifiers.insert(identifier.to_string());

                let mut radiation_type = String::new();
                for (offset, cell) in rest.iter().enumerate() {
                    if cell.is_empty() {
                        continue;
                    }
                    let column = offset + 2;
                    match cell.parse::<f64>() {
                        Err(_) => radiation_type = cell.to_string(),
                        Ok(value) => {
                            let Some(solar_hour) =
                                tipo_row.get(column).and_then(|t| t.parse::<f64>().ok())
                            else {
                                // Totals column ("SUMA"), no solar hour
                                continue;
                            };
                            let epoch = solar_to_epoch(position, date, solar_hour)
                                .map_err(|e| format!("station {identifier}: {e}"))?;
                            let timestamp = Utc
                                .timestamp_opt(epoch, 0)
                                .single()
                                .ok_or_else(|| format!("epoch {epoch} out of range"))?;
                            points.push(
                                CanonicalPoint::new("sun_radiation")
                                    .tag("estation", *station)
                                    .tag("identifier", *identifier)
                                    .tag("radiation_type", radiation_type.clone())
                                    .field("value", value)
                                    .at(timestamp, Precision::Seconds),
                            );
                        }
                    }
                }
            }
        }
    }
    Ok((points, identifiers))
}

/// Map observation records for the given stations. Deny-listed keys
/// (`idema`, `fint`) never become fields; the nested `geo850` object is
/// flattened to its `value`.
pub fn map_observations(stations: &[Value], wanted: &BTreeSet<String>) -> Vec<CanonicalPoint> {
    let mut points = Vec::new();
    for entry in stations {
        let Some(idema) = entry.get("idema").and_then(Value::as_str) else {
            continue;
        };
        if !wanted.contains(idema) {
            continue;
        }
        let Some(fint) = entry.get("fint").and_then(Value::as_str) else {
            warn!(idema, "observation without 'fint' timestamp dropped");
            continue;
        };
        let Some(timestamp) = parse_fint(fint) else {
            warn!(idema, fint, "unparseable observation timestamp dropped");
            continue;
        };

        let mut point = CanonicalPoint::new("weather_observation").tag("idema", idema);
        if let Some(ubi) = entry.get("ubi").and_then(Value::as_str) {
            point = point.tag("ubi", ubi);
        }
        let Some(object) = entry.as_object() else {
            continue;
        };
        for (key, value) in object {
            if key == "idema" || key == "fint" {
                continue;
            }
            let field = if key == "geo850" {
                value.get("value").and_then(FieldValue::from_json)
            } else {
                FieldValue::from_json(value)
            };
            if let Some(field) = field {
                point = point.field(key, field);
            }
        }
        let point = point.at(timestamp, Precision::Seconds);
        if point.validate().is_ok() {
            points.push(point);
        }
    }
    points
}

/// Observation timestamps come with or without an offset; offset-less ones
/// are taken as UTC.
fn parse_fint(fint: &str) -> Option<DateTime<Utc>> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(fint) {
        return Some(with_offset.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(fint, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
