//! InfluxDB v2 HTTP sink.
//!
//! Writes use the line-protocol endpoint; checkpoint lookups run a Flux
//! last-point query and parse the annotated CSV response. Both paths go
//! through one authenticated client configured at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, trace};

use super::{Sink, SinkError};
use crate::{CanonicalPoint, Precision, SeriesKey};

/// InfluxDB v2 sink over HTTP.
pub struct InfluxSink {
    client: Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxSink {
    /// Build a sink for one org/bucket.
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            org: org.into(),
            bucket: bucket.into(),
        }
    }

    /// Use a shared HTTP client instead of a dedicated one.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    async fn write_lines(&self, precision: Precision, lines: String) -> Result<(), SinkError> {
        let response = self
            .client
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", precision.as_str()),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(lines)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Flux last-point query for a series identity. The tag filter is a
    /// subset match, so series that gained extra tags still resolve.
    fn last_point_flux(&self, key: &SeriesKey) -> String {
        let mut predicate = format!(
            "r._measurement == \"{}\"",
            escape_flux_string(key.measurement())
        );
        for (tag, value) in key.tags() {
            predicate.push_str(&format!(
                " and r.{} == \"{}\"",
                tag,
                escape_flux_string(value)
            ));
        }
        format!(
            "from(bucket: \"{}\")\n  |> range(start: 0)\n  |> filter(fn: (r) => {})\n  |> group()\n  |> keep(columns: [\"_time\"])\n  |> sort(columns: [\"_time\"], desc: true)\n  |> limit(n: 1)",
            escape_flux_string(&self.bucket),
            predicate
        )
    }
}

fn escape_flux_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Pull the newest `_time` value out of an annotated-CSV query result.
///
/// Annotation rows start with `#` and are skipped as comments; the first
/// remaining row is the header naming the columns, then at most one data
/// row follows (the query limits to one point).
fn parse_last_time(csv_body: &str) -> Result<Option<DateTime<Utc>>, SinkError> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .flexible(true)
        .has_headers(true)
        .from_reader(csv_body.as_bytes());

    let time_index = match reader.headers() {
        Ok(headers) => headers.iter().position(|h| h == "_time"),
        Err(e) => return Err(SinkError::MalformedQueryResult(e.to_string())),
    };
    let Some(time_index) = time_index else {
        // No _time column at all means the query matched nothing
        return Ok(None);
    };

    for record in reader.records() {
        let record = record.map_err(|e| SinkError::MalformedQueryResult(e.to_string()))?;
        let Some(raw) = record.get(time_index) else {
            continue;
        };
        if raw.is_empty() {
            continue;
        }
        let parsed = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| SinkError::MalformedQueryResult(format!("bad _time '{raw}': {e}")))?;
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    Ok(None)
}

#[async_trait]
impl Sink for InfluxSink {
    async fn write(&self, points: &[CanonicalPoint]) -> Result<(), SinkError> {
        if points.is_empty() {
            return Ok(());
        }
        for point in points {
            point.validate().map_err(SinkError::InvalidPoint)?;
        }

        // Precision is a request-level parameter, so split the batch
        for precision in [Precision::Seconds, Precision::Milliseconds] {
            let lines: Vec<String> = points
                .iter()
                .filter(|p| p.precision() == precision)
                .map(CanonicalPoint::to_line_protocol)
                .collect();
            if lines.is_empty() {
                continue;
            }
            trace!(count = lines.len(), precision = precision.as_str(), "writing batch");
            self.write_lines(precision, lines.join("\n")).await?;
        }
        Ok(())
    }

    async fn last_timestamp(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>, SinkError> {
        let flux = self.last_point_flux(key);
        debug!(series = %key, "querying last stored point");

        let response = self
            .client
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(flux)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }
        parse_last_time(&body)
    }
}
