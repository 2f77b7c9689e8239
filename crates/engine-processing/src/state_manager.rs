use crate::{error::StateError, retry::classify_state_error};
use engine_core::{
    retry::RetryPolicy,
    state::{
        StateStore,
        models::{BatchJobRef, CheckpointEntry, CheckpointStatus, WalEntry},
    },
};
use model::{
    core::identifiers::{PhaseId, RunId, UnitId},
    schema::canonical::CanonicalRecord,
};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

/// Checkpoint and WAL bookkeeping for one unit within one run.
pub struct UnitStateManager {
    run_id: RunId,
    unit_id: UnitId,
    store: Arc<dyn StateStore>,
    commit_policy: RetryPolicy,
}

impl UnitStateManager {
    pub fn new(run_id: RunId, unit_id: UnitId, store: Arc<dyn StateStore>) -> Self {
        Self {
            run_id,
            unit_id,
            store,
            commit_policy: RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2)),
        }
    }

    pub fn unit_id(&self) -> &UnitId {
        &self.unit_id
    }

    fn run(&self) -> String {
        self.run_id.as_str().to_string()
    }

    pub async fn checkpoint(&self, phase: &PhaseId) -> Result<Option<CheckpointEntry>, StateError> {
        self.store
            .load_checkpoint(&self.unit_id, phase)
            .await
            .map_err(StateError::Checkpoint)
    }

    pub async fn is_done(&self, phase: &PhaseId) -> Result<bool, StateError> {
        Ok(self
            .checkpoint(phase)
            .await?
            .is_some_and(|entry| entry.is_done()))
    }

    /// A batch job submitted by an earlier process and not yet collected.
    pub async fn pending_job(&self, phase: &PhaseId) -> Result<Option<BatchJobRef>, StateError> {
        Ok(self
            .checkpoint(phase)
            .await?
            .filter(|entry| !entry.is_done())
            .and_then(|entry| entry.job))
    }

    pub async fn start_unit(&self) -> Result<(), StateError> {
        self.wal(WalEntry::UnitStart {
            run_id: self.run(),
            unit_id: self.unit_id.clone(),
        })
        .await
    }

    pub async fn skip_unit(&self, reason: &str) -> Result<(), StateError> {
        info!(unit = %self.unit_id, reason, "Skipping unit");
        self.wal(WalEntry::UnitSkipped {
            run_id: self.run(),
            unit_id: self.unit_id.clone(),
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn finish_unit(&self) -> Result<(), StateError> {
        self.wal(WalEntry::UnitDone {
            run_id: self.run(),
            unit_id: self.unit_id.clone(),
        })
        .await
    }

    /// Marks a phase in progress, bumping its attempt count. A pending batch
    /// job reference survives so it can still be polled.
    pub async fn begin_phase(&self, phase: &PhaseId) -> Result<CheckpointEntry, StateError> {
        let mut entry = self
            .checkpoint(phase)
            .await?
            .unwrap_or_else(|| {
                CheckpointEntry::new(self.unit_id.clone(), phase.clone(), CheckpointStatus::Pending)
            });
        entry.status = CheckpointStatus::InProgress;
        entry.attempts += 1;
        entry.updated_at = chrono::Utc::now();

        self.wal(WalEntry::PhaseBegin {
            run_id: self.run(),
            unit_id: self.unit_id.clone(),
            phase: phase.clone(),
        })
        .await?;
        self.save(&entry).await?;

        info!(
            unit = %self.unit_id,
            phase = %phase,
            attempt = entry.attempts,
            "Phase started"
        );
        Ok(entry)
    }

    pub async fn record_job(
        &self,
        entry: &mut CheckpointEntry,
        job: BatchJobRef,
    ) -> Result<(), StateError> {
        self.wal(WalEntry::JobSubmitted {
            run_id: self.run(),
            unit_id: self.unit_id.clone(),
            phase: entry.phase.clone(),
            job_id: job.job_id.clone(),
        })
        .await?;

        entry.job = Some(job);
        entry.updated_at = chrono::Utc::now();
        self.save(entry).await
    }

    /// Clears a job reference once its results are in hand (or it is dead).
    pub async fn clear_job(&self, entry: &mut CheckpointEntry) -> Result<(), StateError> {
        if entry.job.take().is_some() {
            entry.updated_at = chrono::Utc::now();
            self.save(entry).await?;
        }
        Ok(())
    }

    /// Stores the record and marks the phase done in one transaction.
    pub async fn commit_phase(
        &self,
        entry: &CheckpointEntry,
        record: &CanonicalRecord,
    ) -> Result<(), StateError> {
        let mut done = entry.clone();
        done.status = CheckpointStatus::Done;
        done.last_error = None;
        done.job = None;
        done.updated_at = chrono::Utc::now();

        self.commit_policy
            .run(
                || self.store.commit_phase(&done, record),
                classify_state_error,
            )
            .await
            .map_err(|e| StateError::Checkpoint(e.into_inner()))?;

        self.wal(WalEntry::PhaseCommit {
            run_id: self.run(),
            unit_id: self.unit_id.clone(),
            phase: entry.phase.clone(),
        })
        .await?;

        info!(unit = %self.unit_id, phase = %entry.phase, "Phase committed");
        Ok(())
    }

    pub async fn fail_phase(&self, entry: &CheckpointEntry, reason: &str) -> Result<(), StateError> {
        let mut failed = entry.clone();
        failed.status = CheckpointStatus::Failed;
        failed.last_error = Some(reason.to_string());
        failed.updated_at = chrono::Utc::now();

        self.save(&failed).await?;
        self.wal(WalEntry::PhaseFailed {
            run_id: self.run(),
            unit_id: self.unit_id.clone(),
            phase: entry.phase.clone(),
            reason: reason.to_string(),
        })
        .await?;

        warn!(unit = %self.unit_id, phase = %entry.phase, reason, "Phase failed");
        Ok(())
    }

    async fn save(&self, entry: &CheckpointEntry) -> Result<(), StateError> {
        self.store
            .save_checkpoint(entry)
            .await
            .map_err(StateError::Checkpoint)
    }

    async fn wal(&self, entry: WalEntry) -> Result<(), StateError> {
        self.store
            .append_wal(&entry)
            .await
            .map_err(StateError::WalOperation)
    }
}
