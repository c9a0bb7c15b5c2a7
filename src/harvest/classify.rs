//! Response classification.
//!
//! Providers report throttling and session expiry in inconsistent places:
//! some in the HTTP status, some behind a 200 with an application-level
//! failure code in the body. Classification funnels every response into one
//! [`FetchOutcome`] so the executor's handling is uniform across providers.

use serde_json::Value;

/// Response body as received, JSON-decoded when possible.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Body parsed as JSON
    Json(Value),
    /// Body kept as raw text (CSV feeds, HTML error pages)
    Text(String),
}

impl Payload {
    /// Decode a response body: JSON when it parses, raw text otherwise.
    pub fn from_text(body: String) -> Payload {
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(body),
        }
    }

    /// JSON view of the payload, if it decoded as JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    /// Render the payload for diagnostics, truncated to keep log lines
    /// bounded.
    pub fn preview(&self, max_len: usize) -> String {
        let full = match self {
            Payload::Json(value) => value.to_string(),
            Payload::Text(text) => text.clone(),
        };
        if full.len() <= max_len {
            full
        } else {
            let cut = full
                .char_indices()
                .take_while(|(i, _)| *i < max_len)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            format!("{}...", &full[..cut])
        }
    }
}

/// What a provider-specific probe read out of a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum BodySignal {
    /// Body matches the provider's success contract
    WellFormed,
    /// Provider-level throttle signal (e.g. an in-band failure code)
    RateLimited,
    /// Provider-level session expiry signal
    SessionExpired,
    /// Body does not match the expected shape
    Malformed(String),
}

/// Provider-specific inspection of a response body.
pub type BodyProbe = fn(&Payload) -> BodySignal;

/// Classified response, the only shape the executor acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Well-formed response ready for mapping
    Success(Payload),
    /// Throttled; retry after the provider's rate-limit pause
    RateLimited,
    /// Session no longer valid; re-authenticate and retry
    SessionExpired,
    /// Transient failure (server error, timeout-class status); retry
    TransientError(u16),
    /// Response violates the provider contract; not retryable
    FatalError {
        /// HTTP status of the offending response
        status: u16,
        /// Body preview for diagnostics
        message: String,
    },
}

/// Classify a response from its HTTP status, decoded body, and the
/// provider's body probe.
///
/// In-band signals win over the HTTP status: a throttle or expiry code in
/// the body is authoritative even under a 200, and a throttling provider
/// that also returns 429 must classify as rate-limited, not transient.
pub fn classify(status: u16, payload: Payload, probe: BodyProbe) -> FetchOutcome {
    let signal = probe(&payload);
    match signal {
        BodySignal::RateLimited => FetchOutcome::RateLimited,
        BodySignal::SessionExpired => FetchOutcome::SessionExpired,
        _ if !(200..300).contains(&status) => FetchOutcome::TransientError(status),
        BodySignal::WellFormed => FetchOutcome::Success(payload),
        BodySignal::Malformed(reason) => FetchOutcome::FatalError {
            status,
            message: format!("{reason}: {}", payload.preview(512)),
        },
    }
}
