//! Engine Slot
//!
//! Late-bound holder for the engine client and the agent identity. Hosts
//! usually construct the conductor before the agent is provisioned, so both
//! halves can be attached (or detached) at any time.

use std::sync::Arc;

use parking_lot::RwLock;

use super::traits::Agent;

/// Engine client plus agent identity, either of which may be absent
pub struct EngineSlot<E> {
    engine: RwLock<Option<Arc<E>>>,
    agent: RwLock<Option<Agent>>,
}

impl<E> Default for EngineSlot<E> {
    fn default() -> Self {
        Self {
            engine: RwLock::new(None),
            agent: RwLock::new(None),
        }
    }
}

impl<E> EngineSlot<E> {
    /// Create an empty slot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot with both halves attached
    #[must_use]
    pub fn bound(engine: Arc<E>, agent: Agent) -> Self {
        Self {
            engine: RwLock::new(Some(engine)),
            agent: RwLock::new(Some(agent)),
        }
    }

    /// Attach (or replace) the engine client
    pub fn attach_engine(&self, engine: Arc<E>) {
        *self.engine.write() = Some(engine);
    }

    /// Attach (or replace) the agent identity
    pub fn attach_agent(&self, agent: Agent) {
        tracing::info!(agent_id = %agent.id, "Agent attached");
        *self.agent.write() = Some(agent);
    }

    /// Remove both halves
    pub fn detach(&self) {
        *self.engine.write() = None;
        *self.agent.write() = None;
    }

    /// Current engine client
    #[must_use]
    pub fn engine(&self) -> Option<Arc<E>> {
        self.engine.read().clone()
    }

    /// Current agent identity
    #[must_use]
    pub fn agent(&self) -> Option<Agent> {
        self.agent.read().clone()
    }

    /// Both halves, when both are attached
    #[must_use]
    pub fn binding(&self) -> Option<(Arc<E>, Agent)> {
        Some((self.engine()?, self.agent()?))
    }

    /// Whether both halves are attached
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.engine.read().is_some() && self.agent.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_lifecycle() {
        let slot: EngineSlot<u8> = EngineSlot::new();
        assert!(!slot.is_initialized());
        assert!(slot.binding().is_none());

        slot.attach_engine(Arc::new(7));
        assert!(!slot.is_initialized());
        assert!(slot.engine().is_some());

        slot.attach_agent(Agent::new("asst_1"));
        assert!(slot.is_initialized());
        let (engine, agent) = slot.binding().unwrap();
        assert_eq!(*engine, 7);
        assert_eq!(agent.id.as_str(), "asst_1");

        slot.detach();
        assert!(!slot.is_initialized());
        assert!(slot.agent().is_none());
    }

    #[test]
    fn test_bound_constructor() {
        let slot = EngineSlot::bound(Arc::new("engine"), Agent::new("a").with_name("Sales"));
        assert!(slot.is_initialized());
        assert_eq!(slot.agent().unwrap().name.as_deref(), Some("Sales"));
    }
}
