use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("State store I/O failed: {0}")]
    Storage(#[from] sled::Error),

    #[error("Failed to encode state entry: {0}")]
    Encode(#[from] bincode::Error),

    #[error("Failed to encode record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("Failed to save checkpoint: {0}")]
    SaveCheckpoint(String),

    #[error("Failed to commit phase: {0}")]
    CommitPhase(String),
}

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Failed to read WAL entries: {0}")]
    Wal(String),

    #[error("Failed to load checkpoint: {0}")]
    LoadCheckpoint(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error exporting record: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}
