use crate::state::{Position, SymbolicState};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Computed states per line, one map for "before" and one for "after".
///
/// Every entry belongs to one version of the control flow model. Lookups never block on a
/// running computation; a state computed against an older model is neither stored nor returned.
#[derive(Debug, Default)]
pub struct StateCache {
    before: DashMap<usize, Arc<SymbolicState>>,
    after: DashMap<usize, Arc<SymbolicState>>,
    version: AtomicU64,
    // held for reading while inserting so an invalidation cannot interleave with a put
    epoch: RwLock<()>,
}

impl StateCache {
    pub fn new(version: u64) -> Self {
        Self {
            version: AtomicU64::new(version),
            ..Default::default()
        }
    }

    fn map(&self, which: Position) -> &DashMap<usize, Arc<SymbolicState>> {
        match which {
            Position::Before => &self.before,
            Position::After => &self.after,
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn get(&self, line: usize, which: Position) -> Option<Arc<SymbolicState>> {
        let version = self.version();
        self.map(which)
            .get(&line)
            .map(|entry| entry.value().clone())
            .filter(|state| state.version() == version)
    }

    pub fn contains(&self, line: usize, which: Position) -> bool {
        self.get(line, which).is_some()
    }

    /// Returns `false` if the state was computed against a different model version than the
    /// current one.
    pub fn put(&self, line: usize, which: Position, state: Arc<SymbolicState>) -> bool {
        let _epoch = self.epoch.read().unwrap_or_else(|e| e.into_inner());
        if state.version() != self.version() {
            tracing::debug!(
                "discarding state for line {} computed against version {}",
                state.line(),
                state.version()
            );
            return false;
        }
        self.map(which).insert(line, state);
        true
    }

    pub fn remove(&self, line: usize, which: Position) -> Option<Arc<SymbolicState>> {
        self.map(which).remove(&line).map(|(_, state)| state)
    }

    /// Drop every entry and move on to a new model version
    pub fn invalidate_all(&self, version: u64) {
        let _epoch = self.epoch.write().unwrap_or_else(|e| e.into_inner());
        self.version.store(version, Ordering::Release);
        self.before.clear();
        self.after.clear();
        tracing::debug!("state cache invalidated, now at version {version}");
    }

    pub fn len(&self, which: Position) -> usize {
        self.map(which).len()
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(line: usize, position: Position, version: u64) -> Arc<SymbolicState> {
        Arc::new(SymbolicState::undefined(line, position, version))
    }

    #[test]
    fn stores_before_and_after_separately() {
        let cache = StateCache::new(1);
        assert!(cache.put(3, Position::After, state(3, Position::After, 1)));
        assert!(cache.contains(3, Position::After));
        assert!(!cache.contains(3, Position::Before));
        assert!(cache.put(3, Position::Before, state(3, Position::Before, 1)));
        assert_eq!(cache.len(Position::Before), 1);
        assert_eq!(cache.len(Position::After), 1);
    }

    #[test]
    fn rejects_stale_states() {
        let cache = StateCache::new(2);
        assert!(!cache.put(0, Position::After, state(0, Position::After, 1)));
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidation_clears_everything() {
        let cache = StateCache::new(1);
        for line in 0..4 {
            cache.put(line, Position::After, state(line, Position::After, 1));
            cache.put(line, Position::Before, state(line, Position::Before, 1));
        }
        cache.invalidate_all(2);
        assert_eq!(cache.version(), 2);
        for line in 0..4 {
            assert!(cache.get(line, Position::After).is_none());
            assert!(cache.get(line, Position::Before).is_none());
        }
        assert!(!cache.put(0, Position::After, state(0, Position::After, 1)));
        assert!(cache.put(0, Position::After, state(0, Position::After, 2)));
    }

    #[test]
    fn remove_returns_the_entry() {
        let cache = StateCache::new(1);
        cache.put(5, Position::After, state(5, Position::After, 1));
        assert!(cache.remove(5, Position::After).is_some());
        assert!(cache.remove(5, Position::After).is_none());
    }
}
