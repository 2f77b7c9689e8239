use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    /// HTTP 429 from the service.
    #[error("Rate limited by inference service: {0}")]
    RateLimited(String),

    /// 5xx or overloaded responses.
    #[error("Inference service unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Inference call timed out")]
    Timeout,

    /// Connection reset, DNS failure and similar.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Invalid inference request: {0}")]
    InvalidRequest(String),

    /// The service answered, but not in a shape the client understands.
    #[error("Failed to decode inference response: {0}")]
    Decode(String),

    #[error("Batch job '{0}' not found")]
    JobNotFound(String),

    #[error("Batch job '{0}' has no results available")]
    ResultsUnavailable(String),
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            InferenceError::Timeout
        } else if err.is_decode() {
            InferenceError::Decode(err.to_string())
        } else {
            InferenceError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("No transcript found in {0}")]
    NotFound(PathBuf),

    #[error("I/O error reading transcript: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed transcript {path} at line {line}: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },
}
