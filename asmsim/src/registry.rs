use crate::config::SimulatorConfig;
use crate::simulator::AsmSimulator;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Simulation sessions keyed by whatever the host uses to identify a buffer
pub struct SimulatorRegistry<K: Eq + Hash> {
    config: SimulatorConfig,
    sessions: DashMap<K, Arc<AsmSimulator>>,
}

impl<K: Eq + Hash> SimulatorRegistry<K> {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
        }
    }

    /// The session for `key`, created with the registry's configuration on first use
    pub fn get_or_create(&self, key: K) -> Arc<AsmSimulator> {
        self.sessions
            .entry(key)
            .or_insert_with(|| Arc::new(AsmSimulator::new(self.config.clone())))
            .value()
            .clone()
    }

    pub fn get(&self, key: &K) -> Option<Arc<AsmSimulator>> {
        self.sessions.get(key).map(|s| s.value().clone())
    }

    pub fn remove(&self, key: &K) -> Option<Arc<AsmSimulator>> {
        self.sessions.remove(key).map(|(_, s)| s)
    }

    /// Flips the enablement switch of every session
    pub fn set_enabled(&self, enabled: bool) {
        for session in self.sessions.iter() {
            session.value().set_enabled(enabled);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
