//! Previous-snapshot cache backing money-flow delta computation.
//!
//! Process-local and bounded: capacity overflow evicts the least recently
//! polled race, which simply means that race's next sample carries no
//! deltas. Terminal races are invalidated explicitly.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use raceday_schemas::MoneyFlowTotals;

pub const DEFAULT_CAPACITY: usize = 1024;

pub struct SnapshotCache {
    inner: Mutex<LruCache<String, MoneyFlowTotals>>,
}

impl SnapshotCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, race_id: &str) -> Option<MoneyFlowTotals> {
        self.inner
            .lock()
            .expect("snapshot cache lock poisoned")
            .get(race_id)
            .cloned()
    }

    pub fn put(&self, race_id: &str, totals: MoneyFlowTotals) {
        self.inner
            .lock()
            .expect("snapshot cache lock poisoned")
            .put(race_id.to_string(), totals);
    }

    pub fn invalidate(&self, race_id: &str) {
        self.inner
            .lock()
            .expect("snapshot cache lock poisoned")
            .pop(race_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("snapshot cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
