//! [`CommandRouter`] – per-tick command arbitration.
//!
//! Once per running tick the router drains every [`JointCommandBuffer`] of
//! every mode, in registry order, and issues at most one batched actuation
//! call to the physics engine.
//!
//! # Priority
//!
//! The decision is global for the whole tick, not per joint:
//!
//! 1. any pending **position** command → position actuation only;
//! 2. else any pending **velocity** command → velocity actuation only;
//! 3. else any pending **effort** command → effort (torque) actuation only;
//! 4. else no actuation call at all.
//!
//! Buffers of the losing modes are drained all the same and their values are
//! discarded.  Only joints with a fresh command in the winning mode appear in
//! the batch; every other joint keeps whatever target the engine already had.
//! Position and velocity batches carry the shared effort limit for every
//! joint; effort batches carry the commanded values as the forces.
//!
//! [`JointCommandBuffer`]: crate::command_buffer::JointCommandBuffer

use std::sync::Arc;

use simbridge_hal::{JointRegistry, PhysicsEngine};
use simbridge_types::{BridgeError, JointIndex, JointMode};
use tracing::{debug, trace};

use crate::command_buffer::CommandBuffers;

/// Joints with a fresh command in one mode, collected during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFrame {
    mode: JointMode,
    indices: Vec<JointIndex>,
    targets: Vec<f64>,
}

impl ControlFrame {
    pub fn mode(&self) -> JointMode {
        self.mode
    }

    /// Engine joint indices, in registry order.
    pub fn indices(&self) -> &[JointIndex] {
        &self.indices
    }

    /// Commanded values, parallel to [`indices`][Self::indices].
    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    /// `(joint index, value)` pairs.
    pub fn entries(&self) -> impl Iterator<Item = (JointIndex, f64)> + '_ {
        self.indices.iter().copied().zip(self.targets.iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Drains the command buffers and actuates the engine.
pub struct CommandRouter {
    registry: Arc<JointRegistry>,
    buffers: Arc<CommandBuffers>,
    max_effort: f64,
}

impl CommandRouter {
    /// `max_effort` is the effort limit applied to every joint in position and
    /// velocity mode.
    pub fn new(registry: Arc<JointRegistry>, buffers: Arc<CommandBuffers>, max_effort: f64) -> Self {
        Self {
            registry,
            buffers,
            max_effort,
        }
    }

    /// Drain every buffer of `mode` and collect the fresh commands.
    pub fn collect(&self, mode: JointMode) -> ControlFrame {
        let mut frame = ControlFrame {
            mode,
            indices: Vec::new(),
            targets: Vec::new(),
        };
        for (joint, buffer) in self.registry.iter().zip(self.buffers.mode(mode)) {
            if let Some(value) = buffer.drain().fresh() {
                frame.indices.push(joint.index);
                frame.targets.push(value);
            }
        }
        frame
    }

    /// Drain all modes and issue at most one actuation call.
    ///
    /// Returns the frame that was applied, or `None` when nothing was
    /// pending.
    ///
    /// # Errors
    ///
    /// Propagates the engine's actuation failure unchanged; the call is not
    /// retried.
    pub fn dispatch<E: PhysicsEngine + ?Sized>(&self, engine: &mut E) -> Result<Option<ControlFrame>, BridgeError> {
        // All three modes are drained every tick, winners and losers alike.
        let frames = JointMode::ALL.map(|mode| self.collect(mode));
        let Some(frame) = frames.into_iter().find(|frame| !frame.is_empty()) else {
            trace!("no pending joint commands");
            return Ok(None);
        };

        let effort_limits = match frame.mode {
            JointMode::Position | JointMode::Velocity => vec![self.max_effort; frame.indices.len()],
            JointMode::Effort => frame.targets.clone(),
        };
        engine.set_joint_targets(
            self.registry.body(),
            &frame.indices,
            frame.mode,
            &frame.targets,
            &effort_limits,
        )?;
        debug!(mode = %frame.mode, joints = frame.indices.len(), "joint commands dispatched");
        Ok(Some(frame))
    }
}
