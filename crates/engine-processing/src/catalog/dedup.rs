use crate::catalog::registry::ProcessedRegistry;
use engine_core::{error::StateStoreError, state::StateStore};
use model::records::unit::WorkUnit;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    Unique,
    /// Listed as processed elsewhere and untouched locally; skip it.
    Duplicate,
    /// Listed as processed elsewhere, yet this store holds progress for it.
    /// Processed anyway and flagged for review.
    Disputed,
}

impl DedupVerdict {
    pub fn should_skip(&self) -> bool {
        matches!(self, DedupVerdict::Duplicate)
    }
}

/// Decides whether a unit was already handled elsewhere. Reads only; a
/// verdict never changes the store or the registry.
pub async fn is_duplicate(
    unit: &WorkUnit,
    store: &dyn StateStore,
    registry: &ProcessedRegistry,
) -> Result<DedupVerdict, StateStoreError> {
    if !registry.contains(&unit.id) {
        return Ok(DedupVerdict::Unique);
    }

    let local = store.unit_checkpoints(&unit.id).await?;
    let verdict = if local.is_empty() {
        DedupVerdict::Duplicate
    } else {
        DedupVerdict::Disputed
    };
    debug!(unit = %unit.id, ?verdict, local_phases = local.len(), "Dedup verdict");
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::state::{
        models::{CheckpointEntry, CheckpointStatus},
        sled_store::SledStateStore,
    };
    use model::core::identifiers::{PhaseId, canonicalize};
    use tempfile::tempdir;

    fn unit(name: &str) -> WorkUnit {
        let (id, convention) = canonicalize(name).unwrap();
        WorkUnit::new(id, name, convention)
    }

    #[tokio::test]
    async fn registry_and_store_together_decide() {
        let dir = tempdir().unwrap();
        let store = SledStateStore::open(dir.path()).unwrap();
        let registry = ProcessedRegistry::from_entries(["aaaaaaaa", "bbbbbbbb"]);

        let progressed = unit("session_bbbbbbbb");
        store
            .save_checkpoint(&CheckpointEntry::new(
                progressed.id.clone(),
                PhaseId::from("threads"),
                CheckpointStatus::InProgress,
            ))
            .await
            .unwrap();

        let verdict = |u: WorkUnit| {
            let store = &store;
            let registry = &registry;
            async move { is_duplicate(&u, store, registry).await.unwrap() }
        };

        assert_eq!(verdict(unit("cccccccc")).await, DedupVerdict::Unique);
        assert_eq!(verdict(unit("aaaaaaaa")).await, DedupVerdict::Duplicate);
        assert_eq!(verdict(progressed).await, DedupVerdict::Disputed);
    }

    #[tokio::test]
    async fn verdict_is_read_only() {
        let dir = tempdir().unwrap();
        let store = SledStateStore::open(dir.path()).unwrap();
        let registry = ProcessedRegistry::from_entries(["aaaaaaaa"]);
        let u = unit("aaaaaaaa");

        is_duplicate(&u, &store, &registry).await.unwrap();
        is_duplicate(&u, &store, &registry).await.unwrap();
        assert!(store.unit_checkpoints(&u.id).await.unwrap().is_empty());
    }
}
