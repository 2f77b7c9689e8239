use crate::report::finding::Finding;
use thiserror::Error;

/// Errors raised when loading or validating the pipeline configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    /// The configuration file is not valid JSON for the expected schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// One or more fatal configuration problems; the batch must not start.
    #[error("Invalid pipeline configuration: {}", summarize(.0))]
    ValidationFailed(Vec<Finding>),
}

fn summarize(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| format!("[{}] {}", f.code, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}
