//! [`JointRegistry`] – fixed joint table of the loaded robot.
//!
//! Built once after the robot model is loaded.  Only revolute joints are
//! tracked; every other joint type is excluded permanently.  The order of the
//! registry (ascending engine joint index) is the iteration order used for
//! command draining and for every joint-state message.

use std::collections::HashMap;

use simbridge_types::{BodyId, BridgeError, JointIndex};
use tracing::debug;

use crate::engine::{JointType, PhysicsEngine};

/// One tracked joint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredJoint {
    pub index: JointIndex,
    pub name: String,
}

/// Immutable joint index → joint name table.
#[derive(Debug, Clone)]
pub struct JointRegistry {
    body: BodyId,
    joints: Vec<RegisteredJoint>,
    by_name: HashMap<String, usize>,
}

impl JointRegistry {
    /// Query `engine` for every joint of `body` and keep the revolute ones.
    ///
    /// # Errors
    ///
    /// Propagates any engine query failure.
    pub fn from_engine<E: PhysicsEngine + ?Sized>(engine: &E, body: BodyId) -> Result<Self, BridgeError> {
        let count = engine.joint_count(body)?;
        let mut joints = Vec::with_capacity(count);
        for index in 0..count {
            let info = engine.joint_info(body, index)?;
            if info.joint_type == JointType::Revolute {
                joints.push((index, info.name));
            } else {
                debug!(index, name = %info.name, joint_type = ?info.joint_type, "joint not tracked");
            }
        }
        Ok(Self::from_joints(body, joints))
    }

    /// Build a registry from an explicit `(index, name)` list, kept in the
    /// given order.
    pub fn from_joints(body: BodyId, joints: impl IntoIterator<Item = (JointIndex, String)>) -> Self {
        let joints: Vec<RegisteredJoint> = joints
            .into_iter()
            .map(|(index, name)| RegisteredJoint { index, name })
            .collect();
        let by_name = joints
            .iter()
            .enumerate()
            .map(|(slot, joint)| (joint.name.clone(), slot))
            .collect();
        Self { body, joints, by_name }
    }

    /// Body the joints belong to.
    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Joints in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredJoint> {
        self.joints.iter()
    }

    /// Joint at registry position `slot`.
    pub fn get(&self, slot: usize) -> Option<&RegisteredJoint> {
        self.joints.get(slot)
    }

    /// Registry position of the joint called `name`.
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Name of the joint with engine index `index`, if tracked.
    pub fn name_of(&self, index: JointIndex) -> Option<&str> {
        self.joints
            .iter()
            .find(|joint| joint.index == index)
            .map(|joint| joint.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{JointInfo, PresentationMode};
    use crate::sim::SimEngine;
    use std::path::Path;

    fn engine_with(joints: Vec<JointInfo>) -> (SimEngine, BodyId) {
        let mut engine = SimEngine::new().with_model("arm.urdf", joints);
        engine.connect(PresentationMode::Headless).unwrap();
        let body = engine.load_model(Path::new("arm.urdf"), true).unwrap();
        (engine, body)
    }

    fn joint(name: &str, joint_type: JointType) -> JointInfo {
        JointInfo {
            name: name.to_string(),
            joint_type,
        }
    }

    #[test]
    fn keeps_only_revolute_joints_in_index_order() {
        let (engine, body) = engine_with(vec![
            joint("base_to_torso", JointType::Fixed),
            joint("hip", JointType::Revolute),
            joint("slider", JointType::Prismatic),
            joint("knee", JointType::Revolute),
        ]);
        let registry = JointRegistry::from_engine(&engine, body).unwrap();

        let table: Vec<(JointIndex, &str)> =
            registry.iter().map(|j| (j.index, j.name.as_str())).collect();
        assert_eq!(table, vec![(1, "hip"), (3, "knee")]);
        assert_eq!(registry.body(), body);
    }

    #[test]
    fn lookup_by_name_and_index() {
        let registry = JointRegistry::from_joints(
            BodyId(0),
            vec![(0, "hip".to_string()), (1, "knee".to_string())],
        );
        assert_eq!(registry.slot_of("knee"), Some(1));
        assert_eq!(registry.slot_of("ankle"), None);
        assert_eq!(registry.name_of(0), Some("hip"));
        assert_eq!(registry.name_of(7), None);
        assert_eq!(registry.get(1).map(|j| j.index), Some(1));
    }

    #[test]
    fn model_without_revolute_joints_yields_empty_registry() {
        let (engine, body) = engine_with(vec![joint("weld", JointType::Fixed)]);
        let registry = JointRegistry::from_engine(&engine, body).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn engine_failure_propagates() {
        let engine = SimEngine::new();
        assert!(JointRegistry::from_engine(&engine, BodyId(3)).is_err());
    }
}
