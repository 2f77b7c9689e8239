use connectors::error::InferenceError;
use engine_config::settings::error::SettingsError;
use engine_core::error::{ProgressError, StateStoreError};
use engine_processing::error::{CatalogError, NormalizeError};
use engine_runtime::error::PipelineError;
use model::core::identifiers::UnrecognizedUnitId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read input file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to load the pipeline configuration: {0}")]
    Settings(#[from] SettingsError),

    #[error("No JSON object found in '{}'", .0.display())]
    Unparseable(PathBuf),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(serde_json::Error),

    #[error("Failed to run the batch: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Failed to scan work units: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Failed to normalize output: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("State store error: {0}")]
    StateStore(#[from] StateStoreError),

    #[error("Failed to load progress: {0}")]
    Progress(#[from] ProgressError),

    #[error("Failed to create inference client: {0}")]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    UnitId(#[from] UnrecognizedUnitId),

    #[error("Phase '{0}' is not declared in the configuration")]
    UnknownPhase(String),

    #[error("Environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("Shutdown requested")]
    ShutdownRequested,
}
