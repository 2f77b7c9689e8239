use crate::{
    error::ProgressError,
    state::{
        StateStore,
        models::{CheckpointEntry, CheckpointStatus, WalEntry},
    },
};
use chrono::{DateTime, Utc};
use model::core::identifiers::{PhaseId, UnitId};
use serde::Serialize;
use std::{collections::BTreeSet, fmt, sync::Arc};

#[derive(Clone)]
pub struct ProgressService {
    pub store: Arc<dyn StateStore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProgressStage {
    Idle,
    Running,
    Done,
    Failed,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Idle => "Idle",
            ProgressStage::Running => "Running",
            ProgressStage::Done => "Done",
            ProgressStage::Failed => "Failed",
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseProgress {
    pub phase: PhaseId,
    pub status: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub job_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&CheckpointEntry> for PhaseProgress {
    fn from(cp: &CheckpointEntry) -> Self {
        PhaseProgress {
            phase: cp.phase.clone(),
            status: cp.status.to_string(),
            attempts: cp.attempts,
            last_error: cp.last_error.clone(),
            job_id: cp.job.as_ref().map(|j| j.job_id.clone()),
            updated_at: cp.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitProgress {
    pub unit_id: UnitId,
    pub stage: ProgressStage,
    pub phases: Vec<PhaseProgress>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunProgress {
    pub run_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished: bool,
    pub cancelled: bool,
    pub units_started: usize,
    pub units_done: usize,
    pub units_skipped: usize,
    pub phases_committed: usize,
    pub phases_failed: usize,
    pub jobs_submitted: usize,
}

impl ProgressService {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        ProgressService { store }
    }

    /// Derives a unit's stage from its checkpoints alone. `expected_phases`
    /// is the configured phase count; a unit is done only when all of them are.
    pub async fn unit_status(
        &self,
        unit_id: &UnitId,
        expected_phases: usize,
    ) -> Result<UnitProgress, ProgressError> {
        let checkpoints = self
            .store
            .unit_checkpoints(unit_id)
            .await
            .map_err(|err| ProgressError::LoadCheckpoint(err.to_string()))?;

        let done = checkpoints.iter().filter(|cp| cp.is_done()).count();
        let failed = checkpoints
            .iter()
            .any(|cp| cp.status == CheckpointStatus::Failed);

        let stage = if checkpoints.is_empty() {
            ProgressStage::Idle
        } else if expected_phases > 0 && done >= expected_phases {
            ProgressStage::Done
        } else if failed {
            ProgressStage::Failed
        } else {
            ProgressStage::Running
        };

        let mut phases: Vec<PhaseProgress> = checkpoints.iter().map(PhaseProgress::from).collect();
        phases.sort_by_key(|p| p.updated_at);

        Ok(UnitProgress {
            unit_id: unit_id.clone(),
            stage,
            phases,
        })
    }

    /// Summarizes a run from its journal.
    pub async fn run_status(&self, run_id: &str) -> Result<RunProgress, ProgressError> {
        let entries = self
            .store
            .iter_wal(run_id)
            .await
            .map_err(|e| ProgressError::Wal(e.to_string()))?;

        let mut progress = RunProgress {
            run_id: run_id.to_string(),
            ..Default::default()
        };
        let mut started = BTreeSet::new();
        let mut done = BTreeSet::new();
        let mut skipped = BTreeSet::new();

        for entry in &entries {
            match entry {
                WalEntry::RunStart { at, .. } => {
                    // Later restarts of the same run keep the first start time.
                    progress.started_at.get_or_insert(*at);
                    progress.finished = false;
                }
                WalEntry::UnitStart { unit_id, .. } => {
                    started.insert(unit_id.clone());
                }
                WalEntry::UnitSkipped { unit_id, .. } => {
                    skipped.insert(unit_id.clone());
                }
                WalEntry::UnitDone { unit_id, .. } => {
                    done.insert(unit_id.clone());
                }
                WalEntry::PhaseCommit { .. } => progress.phases_committed += 1,
                WalEntry::PhaseFailed { .. } => progress.phases_failed += 1,
                WalEntry::JobSubmitted { .. } => progress.jobs_submitted += 1,
                WalEntry::RunDone { cancelled, .. } => {
                    progress.finished = true;
                    progress.cancelled = *cancelled;
                }
                WalEntry::PhaseBegin { .. } => {}
            }
        }

        progress.units_started = started.len();
        progress.units_done = done.len();
        progress.units_skipped = skipped.len();
        Ok(progress)
    }
}
