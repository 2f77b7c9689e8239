use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse failure categories surfaced in batch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientExternal,
    /// The service refused the request outright (auth, invalid request).
    RejectedExternal,
    MalformedOutput,
    SchemaViolation,
    DuplicateWorkUnit,
    FatalConfiguration,
    /// In-flight work cut short by cancellation; recoverable on resume.
    Abandoned,
    Storage,
    Source,
    /// The unit's task died without reporting, e.g. on a panic.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::TransientExternal => "transient_external",
            FailureKind::RejectedExternal => "rejected_external",
            FailureKind::MalformedOutput => "malformed_output",
            FailureKind::SchemaViolation => "schema_violation",
            FailureKind::DuplicateWorkUnit => "duplicate_work_unit",
            FailureKind::FatalConfiguration => "fatal_configuration",
            FailureKind::Abandoned => "abandoned",
            FailureKind::Storage => "storage",
            FailureKind::Source => "source",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
