use std::io;

use flatsync_core::sync::SyncError;
use thiserror::Error;

use crate::config_profiles::ProfileConfigError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] flatsync_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Profiles(#[from] ProfileConfigError),
    #[error("{0} cannot be empty")]
    EmptyInput(&'static str),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("No {0} found for id/prefix: {1}")]
    NotFound(&'static str, String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("No household selected. Pass --household or run `flatsync household use <id>`.")]
    HouseholdNotConfigured,
    #[error(
        "Sync is not configured. Run `flatsync config init --api-base-url <URL>` and `flatsync auth set-token`."
    )]
    SyncNotConfigured,
}
