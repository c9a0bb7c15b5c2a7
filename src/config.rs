//! Startup configuration.
//!
//! One JSON file read once at startup: sink connection, optional
//! per-provider credential blocks, and the worker-pool bound. A provider
//! block that is absent simply disables that provider for the run.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::harvest::DEFAULT_CONCURRENCY;

/// Errors loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the file
    #[error("cannot read config file '{path}': {source}")]
    Io {
        /// Path that failed to read
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid JSON or misses required keys
    #[error("invalid config file '{path}': {source}")]
    Parse {
        /// Path that failed to parse
        path: String,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Sink connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    /// Base URL of the InfluxDB v2 instance
    pub url: String,
    /// API token
    pub token: String,
    /// Organization
    pub org: String,
    /// Target bucket
    pub bucket: String,
}

/// Inverter telemetry provider credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct FusionSolarConfig {
    /// API base URL
    #[serde(default = "default_fusionsolar_url")]
    pub base_url: String,
    /// Account user name
    pub username: String,
    /// Account system code
    pub system_code: String,
}

fn default_fusionsolar_url() -> String {
    "https://eu5.fusionsolar.huawei.com/thirdData".to_string()
}

/// Meteorological open-data provider credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct AemetConfig {
    /// API base URL
    #[serde(default = "default_aemet_url")]
    pub base_url: String,
    /// Open-data API key
    pub api_key: String,
}

fn default_aemet_url() -> String {
    "https://opendata.aemet.es/opendata/api".to_string()
}

/// Consumption portal credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct IdeConfig {
    /// Portal base URL
    #[serde(default = "default_ide_url")]
    pub base_url: String,
    /// Portal user name
    pub username: String,
    /// Portal password
    pub password: String,
}

fn default_ide_url() -> String {
    "https://www.i-de.es/consumidores/rest".to_string()
}

/// Grid indicator feed credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct EsiosConfig {
    /// API base URL
    #[serde(default = "default_esios_url")]
    pub base_url: String,
    /// Personal API token
    pub token: String,
    /// Indicator ids to harvest
    #[serde(default = "default_indicators")]
    pub indicators: Vec<u32>,
}

fn default_esios_url() -> String {
    "https://api.esios.ree.es".to_string()
}

fn default_indicators() -> Vec<u32> {
    vec![1001, 1295, 1739]
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HarvesterConfig {
    /// Sink connection
    pub influxdb: InfluxConfig,
    /// Inverter telemetry provider, if enabled
    #[serde(default)]
    pub fusionsolar: Option<FusionSolarConfig>,
    /// Meteorological provider, if enabled
    #[serde(default)]
    pub aemet: Option<AemetConfig>,
    /// Consumption portal provider, if enabled
    #[serde(default)]
    pub ide: Option<IdeConfig>,
    /// Grid indicator provider, if enabled
    #[serde(default)]
    pub esios: Option<EsiosConfig>,
    /// Concurrent series bound
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl HarvesterConfig {
    /// Load and parse the configuration file at `path`.
    pub fn load(path: &Path) -> Result<HarvesterConfig, ConfigError> {
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Names of the providers this config enables.
    pub fn enabled_providers(&self) -> Vec<&'static str> {
        let mut enabled = Vec::new();
        if self.fusionsolar.is_some() {
            enabled.push("fusionsolar");
        }
        if self.aemet.is_some() {
            enabled.push("aemet");
        }
        if self.ide.is_some() {
            enabled.push("ide");
        }
        if self.esios.is_some() {
            enabled.push("esios");
        }
        enabled
    }
}
