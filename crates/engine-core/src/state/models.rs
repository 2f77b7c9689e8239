use chrono::{DateTime, Utc};
use model::core::identifiers::{PhaseId, UnitId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Pending => "pending",
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Done => "done",
            CheckpointStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted batch job, kept so a restarted process polls it instead of
/// submitting the same work twice.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BatchJobRef {
    pub job_id: String,
    pub custom_ids: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Durable progress of one phase for one unit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CheckpointEntry {
    pub unit_id: UnitId,
    pub phase: PhaseId,
    pub status: CheckpointStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub job: Option<BatchJobRef>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointEntry {
    pub fn new(unit_id: UnitId, phase: PhaseId, status: CheckpointStatus) -> Self {
        Self {
            unit_id,
            phase,
            status,
            attempts: 0,
            last_error: None,
            job: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == CheckpointStatus::Done
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum WalEntry {
    RunStart {
        run_id: String,
        config_hash: String,
        at: DateTime<Utc>,
    },
    UnitStart {
        run_id: String,
        unit_id: UnitId,
    },
    UnitSkipped {
        run_id: String,
        unit_id: UnitId,
        reason: String,
    },
    PhaseBegin {
        run_id: String,
        unit_id: UnitId,
        phase: PhaseId,
    },
    JobSubmitted {
        run_id: String,
        unit_id: UnitId,
        phase: PhaseId,
        job_id: String,
    },
    PhaseCommit {
        run_id: String,
        unit_id: UnitId,
        phase: PhaseId,
    },
    PhaseFailed {
        run_id: String,
        unit_id: UnitId,
        phase: PhaseId,
        reason: String,
    },
    UnitDone {
        run_id: String,
        unit_id: UnitId,
    },
    RunDone {
        run_id: String,
        cancelled: bool,
    },
}

impl WalEntry {
    pub fn run_id(&self) -> &str {
        match self {
            WalEntry::RunStart { run_id, .. } => run_id,
            WalEntry::UnitStart { run_id, .. } => run_id,
            WalEntry::UnitSkipped { run_id, .. } => run_id,
            WalEntry::PhaseBegin { run_id, .. } => run_id,
            WalEntry::JobSubmitted { run_id, .. } => run_id,
            WalEntry::PhaseCommit { run_id, .. } => run_id,
            WalEntry::PhaseFailed { run_id, .. } => run_id,
            WalEntry::UnitDone { run_id, .. } => run_id,
            WalEntry::RunDone { run_id, .. } => run_id,
        }
    }

    pub fn unit_id(&self) -> Option<&UnitId> {
        match self {
            WalEntry::UnitStart { unit_id, .. }
            | WalEntry::UnitSkipped { unit_id, .. }
            | WalEntry::PhaseBegin { unit_id, .. }
            | WalEntry::JobSubmitted { unit_id, .. }
            | WalEntry::PhaseCommit { unit_id, .. }
            | WalEntry::PhaseFailed { unit_id, .. }
            | WalEntry::UnitDone { unit_id, .. } => Some(unit_id),
            WalEntry::RunStart { .. } | WalEntry::RunDone { .. } => None,
        }
    }
}
