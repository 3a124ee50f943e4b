//! `simbridge-hal` – Physics Engine Boundary
//!
//! Everything the bridge knows about the simulator goes through this crate.
//!
//! # Modules
//!
//! - [`engine`] – the [`PhysicsEngine`] trait (step/read/write primitives)
//!   and [`EngineHandle`], the scoped connection that always disconnects.
//! - [`joint_registry`] – [`JointRegistry`]: the fixed joint index → name
//!   table built once from a loaded robot model.
//! - [`sim`] – [`SimEngine`]: a headless in-process kinematic engine used by
//!   the CLI and by tests in place of an external simulator.

pub mod engine;
pub mod joint_registry;
pub mod sim;

pub use engine::{EngineHandle, JointInfo, JointType, PhysicsEngine, PresentationMode};
pub use joint_registry::{JointRegistry, RegisteredJoint};
pub use sim::{ActuationRecord, SimEngine};
