//! In-process kinematic engine for headless runs and CI without an external
//! simulator.
//!
//! [`SimEngine`] implements [`PhysicsEngine`] with a deliberately simple joint
//! model: every revolute joint is a unit-inertia, frictionless rotor.  It is
//! good enough to close the command → step → joint-state loop end to end and
//! records every actuation call so tests can inspect exactly what the bridge
//! asked for.
//!
//! # Joint model
//!
//! | Control | Per-step behaviour |
//! |---|---|
//! | none | velocity held, zero applied effort |
//! | position | proportional velocity demand toward the target, effort clamped to the limit |
//! | velocity | velocity demand = target, effort clamped to the limit |
//! | effort | the commanded torque is applied as-is |
//!
//! # Models
//!
//! Models are either registered in memory with
//! [`with_model`][SimEngine::with_model] or read from disk.  Only the joint
//! table of a URDF document is read (`<joint name=".." type="..">`); links,
//! geometry and inertia are ignored.  The file name `plane.urdf` resolves to a
//! built-in joint-less floor when no such file exists.
//!
//! # Example
//!
//! ```rust
//! use std::path::Path;
//! use simbridge_hal::{JointInfo, JointType, PhysicsEngine, PresentationMode, SimEngine};
//! use simbridge_types::JointMode;
//!
//! let mut engine = SimEngine::new().with_model(
//!     "pendulum.urdf",
//!     vec![JointInfo { name: "swing".into(), joint_type: JointType::Revolute }],
//! );
//! engine.connect(PresentationMode::Headless).unwrap();
//! let body = engine.load_model(Path::new("pendulum.urdf"), true).unwrap();
//! engine.set_joint_targets(body, &[0], JointMode::Velocity, &[1.0], &[50.0]).unwrap();
//! engine.step().unwrap();
//! assert!(engine.joint_state(body, 0).unwrap().velocity > 0.0);
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use simbridge_types::{BodyId, BridgeError, JointIndex, JointMode, JointReading};
use tracing::{debug, info};

use crate::engine::{JointInfo, JointType, PhysicsEngine, PresentationMode};

/// Fixed simulation time increment (seconds).
pub const SIM_TIME_STEP: f64 = 1.0 / 240.0;

/// Proportional gain of the position controller (1/s).
const POSITION_GAIN: f64 = 10.0;

const BUILTIN_PLANE: &str = "plane.urdf";

// ────────────────────────────────────────────────────────────────────────────
// Recorded actuation
// ────────────────────────────────────────────────────────────────────────────

/// One `set_joint_targets` call as received by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuationRecord {
    pub body: BodyId,
    pub mode: JointMode,
    pub indices: Vec<JointIndex>,
    pub targets: Vec<f64>,
    pub effort_limits: Vec<f64>,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal world state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum JointControl {
    Idle,
    Position { target: f64, max_effort: f64 },
    Velocity { target: f64, max_effort: f64 },
    Effort(f64),
}

#[derive(Debug, Clone)]
struct SimJoint {
    info: JointInfo,
    reading: JointReading,
    control: JointControl,
}

impl SimJoint {
    fn new(info: JointInfo) -> Self {
        Self {
            info,
            reading: JointReading::default(),
            control: JointControl::Idle,
        }
    }

    fn advance(&mut self, dt: f64) {
        if self.info.joint_type != JointType::Revolute {
            return;
        }
        let JointReading { position, velocity, .. } = self.reading;
        let effort = match self.control {
            JointControl::Idle => 0.0,
            JointControl::Position { target, max_effort } => {
                let demand = POSITION_GAIN * (target - position);
                ((demand - velocity) / dt).clamp(-max_effort.abs(), max_effort.abs())
            }
            JointControl::Velocity { target, max_effort } => {
                ((target - velocity) / dt).clamp(-max_effort.abs(), max_effort.abs())
            }
            JointControl::Effort(torque) => torque,
        };
        let velocity = velocity + effort * dt;
        self.reading = JointReading {
            position: position + velocity * dt,
            velocity,
            applied_effort: effort,
        };
    }
}

#[derive(Debug, Clone)]
struct SimBody {
    joints: Vec<SimJoint>,
}

// ────────────────────────────────────────────────────────────────────────────
// SimEngine
// ────────────────────────────────────────────────────────────────────────────

/// Headless kinematic [`PhysicsEngine`].
#[derive(Debug, Default)]
pub struct SimEngine {
    presentation: Option<PresentationMode>,
    models: HashMap<PathBuf, Vec<JointInfo>>,
    bodies: Vec<SimBody>,
    gravity: [f64; 3],
    steps: u64,
    resets: u64,
    actuations: Vec<ActuationRecord>,
    failing_operation: Option<&'static str>,
}

impl SimEngine {
    /// Create a disconnected engine with an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-memory model under `path`; `load_model(path)` will use
    /// it instead of reading the file system.
    pub fn with_model(mut self, path: impl Into<PathBuf>, joints: Vec<JointInfo>) -> Self {
        self.models.insert(path.into(), joints);
        self
    }

    /// Make every subsequent call of `operation` (`"step"`, `"joint_state"`,
    /// `"set_joint_targets"`, `"reset_world"`, …) fail.
    pub fn fail_on(&mut self, operation: &'static str) {
        self.failing_operation = Some(operation);
    }

    /// Clear a failure set with [`fail_on`][Self::fail_on].
    pub fn clear_failure(&mut self) {
        self.failing_operation = None;
    }

    /// Number of completed `step` calls.
    pub fn step_count(&self) -> u64 {
        self.steps
    }

    /// Number of completed `reset_world` calls.
    pub fn reset_count(&self) -> u64 {
        self.resets
    }

    /// Every accepted `set_joint_targets` call, oldest first.
    pub fn actuations(&self) -> &[ActuationRecord] {
        &self.actuations
    }

    pub fn gravity(&self) -> [f64; 3] {
        self.gravity
    }

    pub fn presentation(&self) -> Option<PresentationMode> {
        self.presentation
    }

    /// Read the joint table out of a URDF document.
    ///
    /// Joints are returned in document order, which is also the index order
    /// the engine assigns.  `<joint>` references without a `type` attribute
    /// (as found inside `<transmission>` blocks) are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Engine`] for malformed XML or an unsupported
    /// joint type.
    pub fn parse_joint_table(xml: &str) -> Result<Vec<JointInfo>, BridgeError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        let mut joints = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) if e.name().as_ref() == b"joint" => {
                    if let Some(joint) = joint_from_element(e)? {
                        joints.push(joint);
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(BridgeError::engine("load_model", e.to_string())),
            }
        }

        Ok(joints)
    }

    fn check(&self, operation: &'static str) -> Result<(), BridgeError> {
        if self.presentation.is_none() {
            return Err(BridgeError::engine(operation, "engine is not connected"));
        }
        if self.failing_operation == Some(operation) {
            return Err(BridgeError::engine(operation, "injected failure"));
        }
        Ok(())
    }

    fn body(&self, body: BodyId, operation: &'static str) -> Result<&SimBody, BridgeError> {
        self.bodies
            .get(body.0 as usize)
            .ok_or_else(|| BridgeError::engine(operation, format!("unknown body {}", body.0)))
    }

    fn resolve_model(&self, path: &Path) -> Result<Vec<JointInfo>, BridgeError> {
        if let Some(joints) = self.models.get(path) {
            return Ok(joints.clone());
        }
        match fs::read_to_string(path) {
            Ok(xml) => Self::parse_joint_table(&xml),
            Err(_) if path.file_name().is_some_and(|name| name == BUILTIN_PLANE) => Ok(Vec::new()),
            Err(e) => Err(BridgeError::engine(
                "load_model",
                format!("cannot read {}: {e}", path.display()),
            )),
        }
    }
}

fn joint_from_element(element: &BytesStart<'_>) -> Result<Option<JointInfo>, BridgeError> {
    let attribute = |key: &str| -> Result<Option<String>, BridgeError> {
        element
            .try_get_attribute(key)
            .map_err(|e| BridgeError::engine("load_model", e.to_string()))
            .map(|attr| attr.map(|a| String::from_utf8_lossy(&a.value).into_owned()))
    };

    let (Some(name), Some(kind)) = (attribute("name")?, attribute("type")?) else {
        return Ok(None);
    };
    let joint_type = match kind.as_str() {
        // A continuous joint is a revolute joint without limits.
        "revolute" | "continuous" => JointType::Revolute,
        "prismatic" => JointType::Prismatic,
        "spherical" | "floating" => JointType::Spherical,
        "planar" => JointType::Planar,
        "fixed" => JointType::Fixed,
        other => {
            return Err(BridgeError::engine(
                "load_model",
                format!("joint '{name}' has unsupported type '{other}'"),
            ));
        }
    };
    Ok(Some(JointInfo { name, joint_type }))
}

impl PhysicsEngine for SimEngine {
    fn connect(&mut self, mode: PresentationMode) -> Result<(), BridgeError> {
        if self.presentation.is_some() {
            return Err(BridgeError::engine("connect", "already connected"));
        }
        if mode == PresentationMode::Graphical {
            info!("sim engine has no graphical client; running headless");
        }
        self.presentation = Some(mode);
        Ok(())
    }

    fn load_model(&mut self, path: &Path, fixed_base: bool) -> Result<BodyId, BridgeError> {
        self.check("load_model")?;
        let joints = self.resolve_model(path)?;
        let id = BodyId(self.bodies.len() as u32);
        info!(path = %path.display(), fixed_base, joints = joints.len(), body = id.0, "model loaded");
        self.bodies.push(SimBody {
            joints: joints.into_iter().map(SimJoint::new).collect(),
        });
        Ok(id)
    }

    fn joint_count(&self, body: BodyId) -> Result<usize, BridgeError> {
        self.check("joint_count")?;
        Ok(self.body(body, "joint_count")?.joints.len())
    }

    fn joint_info(&self, body: BodyId, index: JointIndex) -> Result<JointInfo, BridgeError> {
        self.check("joint_info")?;
        self.body(body, "joint_info")?
            .joints
            .get(index)
            .map(|joint| joint.info.clone())
            .ok_or_else(|| BridgeError::engine("joint_info", format!("no joint {index}")))
    }

    fn set_gravity(&mut self, gravity: [f64; 3]) -> Result<(), BridgeError> {
        self.check("set_gravity")?;
        self.gravity = gravity;
        Ok(())
    }

    fn step(&mut self) -> Result<(), BridgeError> {
        self.check("step")?;
        for joint in self.bodies.iter_mut().flat_map(|body| body.joints.iter_mut()) {
            joint.advance(SIM_TIME_STEP);
        }
        self.steps += 1;
        Ok(())
    }

    fn joint_state(&self, body: BodyId, index: JointIndex) -> Result<JointReading, BridgeError> {
        self.check("joint_state")?;
        self.body(body, "joint_state")?
            .joints
            .get(index)
            .map(|joint| joint.reading)
            .ok_or_else(|| BridgeError::engine("joint_state", format!("no joint {index}")))
    }

    fn set_joint_targets(
        &mut self,
        body: BodyId,
        indices: &[JointIndex],
        mode: JointMode,
        targets: &[f64],
        effort_limits: &[f64],
    ) -> Result<(), BridgeError> {
        self.check("set_joint_targets")?;
        if indices.len() != targets.len() || indices.len() != effort_limits.len() {
            return Err(BridgeError::engine(
                "set_joint_targets",
                format!(
                    "length mismatch: {} indices, {} targets, {} effort limits",
                    indices.len(),
                    targets.len(),
                    effort_limits.len()
                ),
            ));
        }
        let joint_count = self.body(body, "set_joint_targets")?.joints.len();
        if let Some(bad) = indices.iter().find(|&&index| index >= joint_count) {
            return Err(BridgeError::engine("set_joint_targets", format!("no joint {bad}")));
        }

        let sim_body = &mut self.bodies[body.0 as usize];
        for ((&index, &target), &max_effort) in indices.iter().zip(targets).zip(effort_limits) {
            sim_body.joints[index].control = match mode {
                JointMode::Position => JointControl::Position { target, max_effort },
                JointMode::Velocity => JointControl::Velocity { target, max_effort },
                JointMode::Effort => JointControl::Effort(target),
            };
        }
        debug!(?mode, ?indices, "joint targets set");
        self.actuations.push(ActuationRecord {
            body,
            mode,
            indices: indices.to_vec(),
            targets: targets.to_vec(),
            effort_limits: effort_limits.to_vec(),
        });
        Ok(())
    }

    fn reset_world(&mut self) -> Result<(), BridgeError> {
        self.check("reset_world")?;
        for joint in self.bodies.iter_mut().flat_map(|body| body.joints.iter_mut()) {
            joint.reading = JointReading::default();
            joint.control = JointControl::Idle;
        }
        self.resets += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), BridgeError> {
        if self.presentation.take().is_none() {
            return Err(BridgeError::engine("disconnect", "engine is not connected"));
        }
        Ok(())
    }
}
