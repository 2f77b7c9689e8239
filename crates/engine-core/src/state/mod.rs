use crate::{
    error::StateStoreError,
    state::models::{CheckpointEntry, WalEntry},
};
use async_trait::async_trait;
use model::{
    core::identifiers::{PhaseId, UnitId},
    schema::canonical::CanonicalRecord,
};

pub mod export;
pub mod lock;
pub mod models;
pub mod sled_store;

/// Durable per-(unit, phase) progress, canonical records and the run journal.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Writes `entry` unless it would move a `Done` entry backwards.
    async fn save_checkpoint(&self, entry: &CheckpointEntry) -> Result<(), StateStoreError>;

    async fn load_checkpoint(
        &self,
        unit_id: &UnitId,
        phase: &PhaseId,
    ) -> Result<Option<CheckpointEntry>, StateStoreError>;

    async fn unit_checkpoints(
        &self,
        unit_id: &UnitId,
    ) -> Result<Vec<CheckpointEntry>, StateStoreError>;

    /// Marks a phase done and stores its record atomically.
    async fn commit_phase(
        &self,
        entry: &CheckpointEntry,
        record: &CanonicalRecord,
    ) -> Result<(), StateStoreError>;

    async fn load_record(
        &self,
        unit_id: &UnitId,
        phase: &PhaseId,
    ) -> Result<Option<CanonicalRecord>, StateStoreError>;

    async fn append_wal(&self, entry: &WalEntry) -> Result<(), StateStoreError>;

    async fn iter_wal(&self, run_id: &str) -> Result<Vec<WalEntry>, StateStoreError>;
}
