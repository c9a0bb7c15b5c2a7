//! Provider integrations.
//!
//! Each provider module packages its authenticator, body-signal probe,
//! discovery (enumerating the concrete series behind one credential block),
//! [`SeriesTask`] implementations, and pure mapper functions. Discovery
//! failures are isolated per provider so one broken feed never blocks the
//! others.

pub mod aemet;
pub mod esios;
pub mod fusionsolar;
pub mod ide;

use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::Client;
use std::path::PathBuf;
use tracing::warn;

use crate::config::HarvesterConfig;
use crate::harvest::{HarvestError, SeriesTask};
use crate::shutdown::CancelToken;

/// Tasks discovered for a run, plus the providers that failed to
/// enumerate.
#[derive(Default)]
pub struct DiscoveryOutcome {
    /// Runnable series tasks
    pub tasks: Vec<Box<dyn SeriesTask>>,
    /// Providers whose discovery failed
    pub failures: Vec<HarvestError>,
}

/// Run discovery for every enabled provider, honoring an optional name
/// filter (`--provider`). `input_file` reroutes the radiation feed to a
/// local CSV.
pub async fn discover_tasks(
    config: &HarvesterConfig,
    client: &Client,
    cancel: &CancelToken,
    filter: &[String],
    input_file: Option<PathBuf>,
) -> DiscoveryOutcome {
    let wants = |name: &str| filter.is_empty() || filter.iter().any(|f| f == name);
    let mut outcome = DiscoveryOutcome::default();

    if let Some(fusionsolar) = config.fusionsolar.as_ref().filter(|_| wants("fusionsolar")) {
        match fusionsolar::discover(fusionsolar, client, cancel).await {
            Ok(mut tasks) => outcome.tasks.append(&mut tasks),
            Err(e) => {
                warn!(provider = "fusionsolar", error = %e, "discovery failed");
                outcome.failures.push(e);
            }
        }
    }

    if let Some(aemet) = config.aemet.as_ref().filter(|_| wants("aemet")) {
        outcome.tasks.push(aemet::radiation_task(aemet, input_file));
    }

    if let Some(ide) = config.ide.as_ref().filter(|_| wants("ide")) {
        match ide::discover(ide, client, cancel).await {
            Ok(mut tasks) => outcome.tasks.append(&mut tasks),
            Err(e) => {
                warn!(provider = "ide", error = %e, "discovery failed");
                outcome.failures.push(e);
            }
        }
    }

    if let Some(esios) = config.esios.as_ref().filter(|_| wants("esios")) {
        outcome.tasks.append(&mut esios::indicator_tasks(esios));
    }

    outcome
}

/// All `Set-Cookie` name=value pairs from a response, joined into a single
/// `Cookie` header value. Attribute parts (Path, Expires, ...) are
/// dropped.
pub(crate) fn collect_cookies(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<String> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .map(|pair| pair.trim().to_string())
        .filter(|pair| !pair.is_empty())
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

/// Value of one named cookie from a response's `Set-Cookie` headers.
pub(crate) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}
