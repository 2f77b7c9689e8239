use crate::{
    error::StateStoreError,
    state::{
        StateStore,
        models::{CheckpointEntry, CheckpointStatus, WalEntry},
    },
};
use async_trait::async_trait;
use model::{
    core::identifiers::{PhaseId, UnitId},
    schema::canonical::CanonicalRecord,
};
use sled::{
    Transactional,
    transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError},
};
use std::path::Path;

const CHECKPOINTS_TREE: &str = "checkpoints";
const RECORDS_TREE: &str = "records";
const WAL_TREE: &str = "wal";

pub struct SledStateStore {
    db: sled::Db,
    checkpoints: sled::Tree,
    records: sled::Tree,
    wal: sled::Tree,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self {
            checkpoints: db.open_tree(CHECKPOINTS_TREE)?,
            records: db.open_tree(RECORDS_TREE)?,
            wal: db.open_tree(WAL_TREE)?,
            db,
        })
    }

    /// Helper to generate consistent keys for per-phase entries
    #[inline]
    fn key(unit_id: &UnitId, phase: &PhaseId) -> String {
        format!("{}:{}", unit_id, phase)
    }

    fn transaction_result(
        result: Result<(), TransactionError<StateStoreError>>,
    ) -> Result<(), StateStoreError> {
        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StateStoreError::Storage(e)),
        }
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn save_checkpoint(&self, entry: &CheckpointEntry) -> Result<(), StateStoreError> {
        let key = Self::key(&entry.unit_id, &entry.phase);
        let new_bytes = bincode::serialize(entry)?;

        // Check-then-set inside a transaction so a stale writer can never
        // demote a phase another task already finished.
        let result = self
            .checkpoints
            .transaction(|tx| -> ConflictableTransactionResult<(), StateStoreError> {
                if let Some(existing_bytes) = tx.get(key.as_bytes())? {
                    let existing: CheckpointEntry = bincode::deserialize(&existing_bytes)
                        .map_err(|e| ConflictableTransactionError::Abort(e.into()))?;

                    if existing.status == CheckpointStatus::Done
                        && entry.status != CheckpointStatus::Done
                    {
                        // Intentionally skip update, not an error.
                        return Ok(());
                    }
                }

                tx.insert(key.as_bytes(), new_bytes.as_slice())?;
                Ok(())
            });

        Self::transaction_result(result)
    }

    async fn load_checkpoint(
        &self,
        unit_id: &UnitId,
        phase: &PhaseId,
    ) -> Result<Option<CheckpointEntry>, StateStoreError> {
        match self.checkpoints.get(Self::key(unit_id, phase))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn unit_checkpoints(
        &self,
        unit_id: &UnitId,
    ) -> Result<Vec<CheckpointEntry>, StateStoreError> {
        let prefix = format!("{}:", unit_id);
        let mut entries = Vec::new();
        for item in self.checkpoints.scan_prefix(prefix) {
            let (_key, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    async fn commit_phase(
        &self,
        entry: &CheckpointEntry,
        record: &CanonicalRecord,
    ) -> Result<(), StateStoreError> {
        if entry.status != CheckpointStatus::Done {
            return Err(StateStoreError::CommitPhase(format!(
                "refusing to commit {}:{} with status {}",
                entry.unit_id, entry.phase, entry.status
            )));
        }

        let key = Self::key(&entry.unit_id, &entry.phase);
        let chk_bytes = bincode::serialize(entry)?;
        let rec_bytes = serde_json::to_vec(record)?;

        // Record and status land together or not at all.
        let result = (&self.checkpoints, &self.records).transaction(
            |(chk, rec)| -> ConflictableTransactionResult<(), StateStoreError> {
                rec.insert(key.as_bytes(), rec_bytes.as_slice())?;
                chk.insert(key.as_bytes(), chk_bytes.as_slice())?;
                Ok(())
            },
        );
        Self::transaction_result(result)?;

        self.db.flush_async().await?;
        Ok(())
    }

    async fn load_record(
        &self,
        unit_id: &UnitId,
        phase: &PhaseId,
    ) -> Result<Option<CanonicalRecord>, StateStoreError> {
        match self.records.get(Self::key(unit_id, phase))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn append_wal(&self, entry: &WalEntry) -> Result<(), StateStoreError> {
        // generate_id is monotonic across restarts, which keeps the journal ordered.
        let seq = self.db.generate_id()?;
        let mut key = format!("{}:", entry.run_id()).into_bytes();
        key.extend_from_slice(&seq.to_be_bytes());
        let value = bincode::serialize(entry)?;

        self.wal.insert(key, value)?;
        Ok(())
    }

    async fn iter_wal(&self, run_id: &str) -> Result<Vec<WalEntry>, StateStoreError> {
        let prefix = format!("{}:", run_id);
        let mut entries = Vec::new();

        for item in self.wal.scan_prefix(prefix) {
            let (_key, value) = item?;
            let entry: WalEntry = bincode::deserialize(&value)?;
            entries.push(entry);
        }

        Ok(entries)
    }
}
