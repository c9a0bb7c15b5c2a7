//! CLI error type.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced at the command level.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A `--provider` filter named a provider that does not exist
    #[error("unknown provider '{0}' (expected one of: fusionsolar, aemet, ide, esios)")]
    UnknownProvider(String),

    /// A `--provider` filter named a provider the config does not enable
    #[error("provider '{0}' is not configured")]
    ProviderNotConfigured(String),

    /// At least one provider rejected its credentials during the run
    #[error("one or more providers rejected their credentials")]
    AuthenticationFailed,
}
