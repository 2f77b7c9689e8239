use engine_core::error::StateStoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to scan '{path}': {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read registry '{path}': {message}")]
    Registry { path: PathBuf, message: String },

    #[error("State store operation failed: {0}")]
    StateStore(#[from] StateStoreError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Phase '{phase}' has no token budget left for content")]
    NoBudget { phase: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Expected a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("Unrecognized shape under '{key}': {found}")]
    UnrecognizedShape { key: String, found: String },

    #[error("Record has schema version {found}, newer than supported version {current}")]
    FutureSchemaVersion { found: u32, current: u32 },

    #[error("Record belongs to phase '{found}', expected '{expected}'")]
    PhaseMismatch { expected: String, found: String },
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Checkpoint operation failed: {0}")]
    Checkpoint(#[source] StateStoreError),

    #[error("WAL operation failed: {0}")]
    WalOperation(#[source] StateStoreError),
}
