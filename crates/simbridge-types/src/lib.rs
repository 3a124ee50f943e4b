use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Index of a joint inside a loaded body, as assigned by the physics engine.
pub type JointIndex = usize;

/// Handle of a body (robot, floor, …) loaded into the physics engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BodyId(pub u32);

/// Actuation strategy for a joint command.  Exactly one mode is applied per
/// tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JointMode {
    Position,
    Velocity,
    Effort,
}

impl JointMode {
    /// Every mode in priority order: position wins over velocity, velocity
    /// wins over effort.
    pub const ALL: [JointMode; 3] = [JointMode::Position, JointMode::Velocity, JointMode::Effort];

    pub fn as_str(self) -> &'static str {
        match self {
            JointMode::Position => "position",
            JointMode::Velocity => "velocity",
            JointMode::Effort => "effort",
        }
    }
}

impl fmt::Display for JointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JointMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "position" => Ok(JointMode::Position),
            "velocity" => Ok(JointMode::Velocity),
            "effort" => Ok(JointMode::Effort),
            other => Err(BridgeError::Serialization(format!("unknown joint mode '{other}'"))),
        }
    }
}

const COMMAND_TOPIC_SUFFIX: &str = "_controller/command";

/// Name of the inbound command channel for one joint in one mode, e.g.
/// `"knee_velocity_controller/command"`.
pub fn command_topic(joint_name: &str, mode: JointMode) -> String {
    format!("{joint_name}_{mode}{COMMAND_TOPIC_SUFFIX}")
}

/// Split a command channel name back into `(joint_name, mode)`.
///
/// Returns `None` for anything that is not a per-joint command topic.  A
/// leading `/` is accepted.
pub fn parse_command_topic(topic: &str) -> Option<(&str, JointMode)> {
    let topic = topic.strip_prefix('/').unwrap_or(topic);
    let stem = topic.strip_suffix(COMMAND_TOPIC_SUFFIX)?;
    let (joint, mode) = stem.rsplit_once('_')?;
    if joint.is_empty() {
        return None;
    }
    mode.parse().ok().map(|mode| (joint, mode))
}

/// One joint reading as returned by the physics engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointReading {
    pub position: f64,
    pub velocity: f64,
    /// Effort applied by the joint motor during the last simulation step.
    pub applied_effort: f64,
}

/// Joint-state message: one entry per registered joint, in registry order.
///
/// Laid out as parallel arrays so it maps one-to-one onto the outbound
/// `/joint_states` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointStateSnapshot {
    pub stamp: DateTime<Utc>,
    pub name: Vec<String>,
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    pub effort: Vec<f64>,
}

impl JointStateSnapshot {
    /// An empty snapshot stamped at `stamp`.
    pub fn with_capacity(stamp: DateTime<Utc>, capacity: usize) -> Self {
        Self {
            stamp,
            name: Vec::with_capacity(capacity),
            position: Vec::with_capacity(capacity),
            velocity: Vec::with_capacity(capacity),
            effort: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, reading: JointReading) {
        self.name.push(name.into());
        self.position.push(reading.position);
        self.velocity.push(reading.velocity);
        self.effort.push(reading.applied_effort);
    }

    pub fn len(&self) -> usize {
        self.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

/// Scheduling state of the simulation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Running,
    Paused,
}

/// No-argument control request applied by the simulation loop between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlRequest {
    Pause,
    Resume,
    Reset,
}

impl ControlRequest {
    /// Service name under which the request is exposed to external clients.
    pub fn service_name(self) -> &'static str {
        match self {
            ControlRequest::Pause => "pause_physics",
            ControlRequest::Resume => "unpause_physics",
            ControlRequest::Reset => "reset_simulation",
        }
    }

    /// Resolve a service name.  Any namespace prefix (`~/`, `/simbridge/`)
    /// is ignored.
    pub fn from_service_name(name: &str) -> Option<Self> {
        match name.rsplit('/').next().unwrap_or(name) {
            "pause_physics" => Some(ControlRequest::Pause),
            "unpause_physics" => Some(ControlRequest::Resume),
            "reset_simulation" => Some(ControlRequest::Reset),
            _ => None,
        }
    }
}

/// Unified event wrapper for the bridge event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "simbridge-middleware::ws"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the bridge event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A single numeric command for one joint in one mode.
    JointCommand {
        joint: String,
        mode: JointMode,
        value: f64,
    },
    JointStates(JointStateSnapshot),
    SimulationFault {
        component: String,
        message: String,
    },
    LoopStateChanged(LoopState),
}

/// Error type shared by every simbridge crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("mandatory robot model path is not set")]
    MissingModelPath,

    #[error("Physics engine failure during {operation}: {details}")]
    Engine { operation: String, details: String },

    #[error("Unknown joint '{0}'")]
    UnknownJoint(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("simulation loop is no longer running")]
    LoopStopped,
}

impl BridgeError {
    /// Shorthand for [`BridgeError::Engine`].
    pub fn engine(operation: impl Into<String>, details: impl Into<String>) -> Self {
        BridgeError::Engine {
            operation: operation.into(),
            details: details.into(),
        }
    }
}
