//! Per-tick joint-state snapshot assembly and publication.

use std::sync::Arc;

use chrono::Utc;
use simbridge_hal::{JointRegistry, PhysicsEngine};
use simbridge_middleware::{EventBus, Topic};
use simbridge_types::{BridgeError, Event, EventPayload, JointStateSnapshot};

const SOURCE: &str = "simbridge-runtime::joint_states";

/// Reads every registered joint and publishes one
/// [`JointStateSnapshot`] per call on [`Topic::JointStates`].
pub struct JointStatePublisher {
    registry: Arc<JointRegistry>,
    bus: Arc<EventBus>,
}

impl JointStatePublisher {
    pub fn new(registry: Arc<JointRegistry>, bus: Arc<EventBus>) -> Self {
        Self { registry, bus }
    }

    /// Query the engine for every registered joint, in registry order, and
    /// stamp the result with the current wall-clock time.
    ///
    /// # Errors
    ///
    /// The first failing per-joint query aborts the whole snapshot.
    pub fn assemble<E: PhysicsEngine + ?Sized>(&self, engine: &E) -> Result<JointStateSnapshot, BridgeError> {
        let mut snapshot = JointStateSnapshot::with_capacity(Utc::now(), self.registry.len());
        for joint in self.registry.iter() {
            let reading = engine.joint_state(self.registry.body(), joint.index)?;
            snapshot.push(joint.name.as_str(), reading);
        }
        Ok(snapshot)
    }

    /// Publish a snapshot.  Returns the number of subscribers reached; zero
    /// listeners is not an error.
    pub fn publish(&self, snapshot: JointStateSnapshot) -> usize {
        self.bus
            .publish_to(Topic::JointStates, Event::new(SOURCE, EventPayload::JointStates(snapshot)))
    }
}
