//! `harvest` command: run one harvest pass over the configured providers.

use clap::{Args, Parser, Subcommand};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::cli::CliError;
use crate::config::HarvesterConfig;
use crate::harvest::Harvester;
use crate::provider::discover_tasks;
use crate::shutdown::CancelToken;
use crate::sink::InfluxSink;

const KNOWN_PROVIDERS: &[&str] = &["fusionsolar", "aemet", "ide", "esios"];

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(
    name = "energy-data-harvester",
    about = "Resilient incremental harvester for energy and weather telemetry feeds",
    version
)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Harvest all configured providers up to their horizons
    Harvest(HarvestArgs),
}

/// Arguments for the `harvest` command.
#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "local.json")]
    pub config: PathBuf,

    /// Only harvest the named providers (repeatable)
    #[arg(long = "provider")]
    pub providers: Vec<String>,

    /// Reprocess a locally archived radiation CSV instead of fetching it
    #[arg(long)]
    pub input_file: Option<PathBuf>,

    /// Override the configured number of concurrently harvested series
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Cancel the run after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

impl HarvestArgs {
    /// Validate the provider filter against the known names and the
    /// loaded configuration.
    fn validate_filter(&self, config: &HarvesterConfig) -> Result<(), CliError> {
        let enabled = config.enabled_providers();
        for name in &self.providers {
            if !KNOWN_PROVIDERS.contains(&name.as_str()) {
                return Err(CliError::UnknownProvider(name.clone()));
            }
            if !enabled.contains(&name.as_str()) {
                return Err(CliError::ProviderNotConfigured(name.clone()));
            }
        }
        Ok(())
    }

    /// Run the harvest to completion.
    pub async fn execute(&self, cancel: CancelToken) -> Result<(), CliError> {
        let config = HarvesterConfig::load(&self.config)?;
        self.validate_filter(&config)?;

        if let Some(deadline) = self.deadline_secs {
            cancel.cancel_after(Duration::from_secs(deadline));
        }

        let client = Client::new();
        let sink = Arc::new(
            InfluxSink::new(
                &config.influxdb.url,
                &config.influxdb.token,
                &config.influxdb.org,
                &config.influxdb.bucket,
            )
            .with_client(client.clone()),
        );

        let discovery = discover_tasks(
            &config,
            &client,
            &cancel,
            &self.providers,
            self.input_file.clone(),
        )
        .await;
        info!(
            tasks = discovery.tasks.len(),
            discovery_failures = discovery.failures.len(),
            "discovery complete"
        );

        let concurrency = self.concurrency.unwrap_or(config.concurrency);
        let harvester = Harvester::new(sink, cancel)
            .with_concurrency(concurrency)
            .with_client(client);
        let summary = harvester.run(discovery.tasks).await;

        info!(
            series_completed = summary.completed.len(),
            series_failed = summary.failed.len(),
            points_written = summary.total_points(),
            "harvest run finished"
        );
        for (key, e) in &summary.failed {
            error!(series = %key, error = %e, "series ended in error");
        }

        let auth_failed = summary.has_auth_failure()
            || discovery.failures.iter().any(|e| e.is_auth_failure());
        if auth_failed {
            return Err(CliError::AuthenticationFailed);
        }
        Ok(())
    }
}
