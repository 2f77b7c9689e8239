use engine_config::settings::error::SettingsError;
use engine_core::error::StateStoreError;
use thiserror::Error;

/// Errors that stop a batch before any unit is attempted. Everything that
/// goes wrong for a single unit lands in the report instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// The configuration failed validation.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("State store error: {0}")]
    StateStore(#[from] StateStoreError),
}
