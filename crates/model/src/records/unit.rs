use crate::core::identifiers::{NamingConvention, UnitId};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

/// One independently checkpointable transcript, located on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: UnitId,
    pub locator: PathBuf,
    pub convention: NamingConvention,
    /// Other directories that resolved to the same id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<PathBuf>,
    pub size_estimate: u64,
}

impl WorkUnit {
    pub fn new(id: UnitId, locator: impl Into<PathBuf>, convention: NamingConvention) -> Self {
        Self {
            id,
            locator: locator.into(),
            convention,
            aliases: Vec::new(),
            size_estimate: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Discovered,
    Queued,
    Processing,
    Completed,
    Failed,
    SkippedDuplicate,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Discovered => "discovered",
            UnitStatus::Queued => "queued",
            UnitStatus::Processing => "processing",
            UnitStatus::Completed => "completed",
            UnitStatus::Failed => "failed",
            UnitStatus::SkippedDuplicate => "skipped_duplicate",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitStatus::Completed | UnitStatus::Failed | UnitStatus::SkippedDuplicate
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
