use model::core::identifiers::UnitId;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::{Mutex as UnitMutex, OwnedMutexGuard};

type LockMap = HashMap<UnitId, Arc<UnitMutex<()>>>;

/// Per-unit exclusive locks. A unit's phase progression holds its guard for
/// the whole run of that unit; dropping the guard (including on cancellation
/// or panic unwinding) releases it.
///
/// Entries live only while someone holds or waits on them, so the map stays
/// as large as the number of units in flight.
#[derive(Default)]
pub struct UnitLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// Exclusive hold on one unit.
pub struct UnitGuard {
    unit_id: UnitId,
    guard: Option<OwnedMutexGuard<()>>,
    map: Arc<Mutex<LockMap>>,
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        // Release first so the entry's only remaining owner is the map.
        self.guard.take();
        let mut map = lock_map(&self.map);
        if map
            .get(&self.unit_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.unit_id);
        }
    }
}

// The map is only touched in short, non-panicking sections.
fn lock_map(map: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

impl UnitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, unit_id: &UnitId) -> Arc<UnitMutex<()>> {
        lock_map(&self.inner)
            .entry(unit_id.clone())
            .or_insert_with(|| Arc::new(UnitMutex::new(())))
            .clone()
    }

    fn guard(&self, unit_id: &UnitId, guard: OwnedMutexGuard<()>) -> UnitGuard {
        UnitGuard {
            unit_id: unit_id.clone(),
            guard: Some(guard),
            map: self.inner.clone(),
        }
    }

    pub async fn acquire(&self, unit_id: &UnitId) -> UnitGuard {
        let guard = self.entry(unit_id).lock_owned().await;
        self.guard(unit_id, guard)
    }

    /// Non-blocking variant; `None` if another task holds the unit.
    pub async fn try_acquire(&self, unit_id: &UnitId) -> Option<UnitGuard> {
        match self.entry(unit_id).try_lock_owned() {
            Ok(guard) => Some(self.guard(unit_id, guard)),
            Err(_) => {
                // A failed attempt must not leave a fresh entry behind.
                let mut map = lock_map(&self.inner);
                if map.get(unit_id).is_some_and(|l| Arc::strong_count(l) == 1) {
                    map.remove(unit_id);
                }
                None
            }
        }
    }

    /// Units currently held or waited on.
    pub fn tracked(&self) -> usize {
        lock_map(&self.inner).len()
    }
}
