//! [`CommandIngestor`] – moves joint commands from the event bus into the
//! command buffers.
//!
//! Ingestion never touches the physics engine; it only overwrites the
//! matching [`JointCommandBuffer`][crate::command_buffer::JointCommandBuffer].
//! The simulation loop picks the values up on its next running tick.

use std::sync::Arc;

use simbridge_hal::JointRegistry;
use simbridge_middleware::TopicReceiver;
use simbridge_types::{BridgeError, Event, EventPayload, JointMode};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::command_buffer::CommandBuffers;

/// Routes `(joint name, mode, value)` commands to the right buffer.
#[derive(Clone)]
pub struct CommandIngestor {
    registry: Arc<JointRegistry>,
    buffers: Arc<CommandBuffers>,
}

impl CommandIngestor {
    pub fn new(registry: Arc<JointRegistry>, buffers: Arc<CommandBuffers>) -> Self {
        Self { registry, buffers }
    }

    /// Overwrite the command buffer of `joint` in `mode`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownJoint`] if `joint` is not in the registry.
    pub fn ingest(&self, joint: &str, mode: JointMode, value: f64) -> Result<(), BridgeError> {
        let buffer = self
            .registry
            .slot_of(joint)
            .and_then(|slot| self.buffers.get(slot, mode))
            .ok_or_else(|| BridgeError::UnknownJoint(joint.to_string()))?;
        buffer.write(value);
        debug!(joint, %mode, value, "joint command buffered");
        Ok(())
    }

    /// Apply one bus event.  Anything other than a joint command is ignored.
    pub fn handle_event(&self, event: &Event) -> Result<(), BridgeError> {
        match &event.payload {
            EventPayload::JointCommand { joint, mode, value } => self.ingest(joint, *mode, *value),
            _ => Ok(()),
        }
    }

    /// Drain `commands` until the bus closes.
    ///
    /// Commands for unknown joints are logged and dropped.  A lagging
    /// receiver only loses superseded values, so lag is logged and skipped.
    pub async fn run(self, mut commands: TopicReceiver) {
        info!(joints = self.registry.len(), "command ingestion started");
        loop {
            match commands.recv().await {
                Ok(event) => {
                    if let Err(e) = self.handle_event(&event) {
                        warn!(source = %event.source, error = %e, "joint command dropped");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "command ingestion lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("command ingestion stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_hal::JointRegistry;
    use simbridge_middleware::{EventBus, Topic};
    use simbridge_types::BodyId;
    use std::time::Duration;

    fn ingestor() -> (CommandIngestor, Arc<CommandBuffers>) {
        let registry = Arc::new(JointRegistry::from_joints(
            BodyId(0),
            [(0, "hip".to_string()), (2, "knee".to_string())],
        ));
        let buffers = Arc::new(CommandBuffers::new(registry.len()));
        (CommandIngestor::new(registry, Arc::clone(&buffers)), buffers)
    }

    #[test]
    fn ingest_writes_the_matching_buffer_only() {
        let (ingestor, buffers) = ingestor();
        ingestor.ingest("knee", JointMode::Velocity, -0.5).unwrap();

        assert_eq!(buffers.get(1, JointMode::Velocity).unwrap().drain().fresh(), Some(-0.5));
        assert!(!buffers.any_pending());
    }

    #[test]
    fn unknown_joint_is_rejected() {
        let (ingestor, buffers) = ingestor();
        let err = ingestor.ingest("ankle", JointMode::Position, 1.0).unwrap_err();
        assert_eq!(err, BridgeError::UnknownJoint("ankle".to_string()));
        assert!(!buffers.any_pending());
    }

    #[test]
    fn non_command_events_are_ignored() {
        let (ingestor, buffers) = ingestor();
        let event = Event::new(
            "test",
            EventPayload::SimulationFault {
                component: "engine".to_string(),
                message: "boom".to_string(),
            },
        );
        ingestor.handle_event(&event).unwrap();
        assert!(!buffers.any_pending());
    }

    #[tokio::test]
    async fn run_consumes_bus_commands() {
        let (ingestor, buffers) = ingestor();
        let bus = EventBus::default();
        let task = tokio::spawn(ingestor.run(bus.subscribe_to(Topic::JointCommands)));

        for (joint, value) in [("ankle", 9.0), ("hip", 0.1), ("hip", 0.3)] {
            bus.publish_to(
                Topic::JointCommands,
                Event::new(
                    "test",
                    EventPayload::JointCommand {
                        joint: joint.to_string(),
                        mode: JointMode::Position,
                        value,
                    },
                ),
            );
        }

        let hip = buffers.get(0, JointMode::Position).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while hip.drain().value != Some(0.3) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("hip command never arrived");

        drop(bus);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("ingestion did not stop after the bus closed")
            .unwrap();
    }
}
