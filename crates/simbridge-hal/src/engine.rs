//! Generic `PhysicsEngine` trait for any stepped simulator the bridge can
//! drive.
//!
//! The rest of the bridge only ever talks to the trait, so the bundled
//! [`SimEngine`][crate::sim::SimEngine] can be swapped for a binding to an
//! external simulator without touching the command or scheduling logic.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use simbridge_types::{BodyId, BridgeError, JointIndex, JointMode, JointReading};
use tracing::{info, warn};

/// How the engine presents itself to a human, if at all.  Opaque to the
/// bridge; it is forwarded to the engine on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationMode {
    Graphical,
    Headless,
}

impl PresentationMode {
    pub fn from_gui_flag(gui: bool) -> Self {
        if gui {
            PresentationMode::Graphical
        } else {
            PresentationMode::Headless
        }
    }
}

/// Kinematic type of a joint as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointType {
    Revolute,
    Prismatic,
    Spherical,
    Planar,
    Fixed,
}

/// Static description of one joint of a loaded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointInfo {
    pub name: String,
    pub joint_type: JointType,
}

/// A stepped physics simulator.
///
/// Every method is fallible; the bridge treats any error returned after
/// start-up as fatal to the running tick.
pub trait PhysicsEngine: Send {
    /// Open the engine client.
    fn connect(&mut self, mode: PresentationMode) -> Result<(), BridgeError>;

    /// Load a robot (or scenery) model and return its body handle.
    fn load_model(&mut self, path: &Path, fixed_base: bool) -> Result<BodyId, BridgeError>;

    fn joint_count(&self, body: BodyId) -> Result<usize, BridgeError>;

    fn joint_info(&self, body: BodyId, index: JointIndex) -> Result<JointInfo, BridgeError>;

    /// Set the world gravity vector (m/s²).
    fn set_gravity(&mut self, gravity: [f64; 3]) -> Result<(), BridgeError>;

    /// Advance the world by one fixed time increment.
    fn step(&mut self) -> Result<(), BridgeError>;

    fn joint_state(&self, body: BodyId, index: JointIndex) -> Result<JointReading, BridgeError>;

    /// Apply one batched actuation call.
    ///
    /// `indices`, `targets` and `effort_limits` are parallel slices.  In
    /// [`JointMode::Effort`] the targets are the forces themselves.
    fn set_joint_targets(
        &mut self,
        body: BodyId,
        indices: &[JointIndex],
        mode: JointMode,
        targets: &[f64],
        effort_limits: &[f64],
    ) -> Result<(), BridgeError>;

    /// Revert the world to the engine's notion of a fresh state.
    fn reset_world(&mut self) -> Result<(), BridgeError>;

    fn disconnect(&mut self) -> Result<(), BridgeError>;
}

/// Owned, connected physics engine.
///
/// The connection is released exactly once: explicitly through
/// [`close`][Self::close], or on drop when the owner unwinds through an error
/// path.
pub struct EngineHandle<E: PhysicsEngine> {
    engine: E,
    connected: bool,
}

impl<E: PhysicsEngine> EngineHandle<E> {
    /// Connect `engine` and take ownership of it.
    ///
    /// # Errors
    ///
    /// Propagates the engine's connect failure; nothing is released in that
    /// case because nothing was acquired.
    pub fn connect(mut engine: E, mode: PresentationMode) -> Result<Self, BridgeError> {
        engine.connect(mode)?;
        info!(?mode, "physics engine connected");
        Ok(Self {
            engine,
            connected: true,
        })
    }

    /// Disconnect now and report the result.
    pub fn close(mut self) -> Result<(), BridgeError> {
        self.release()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn release(&mut self) -> Result<(), BridgeError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        let result = self.engine.disconnect();
        info!("physics engine disconnected");
        result
    }
}

impl<E: PhysicsEngine> Deref for EngineHandle<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.engine
    }
}

impl<E: PhysicsEngine> DerefMut for EngineHandle<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

impl<E: PhysicsEngine> Drop for EngineHandle<E> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "physics engine disconnect failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts connect/disconnect calls; every other primitive is inert.
    struct CountingEngine {
        connects: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
        refuse_connect: bool,
    }

    impl CountingEngine {
        fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let connects = Arc::new(AtomicUsize::new(0));
            let disconnects = Arc::new(AtomicUsize::new(0));
            let engine = Self {
                connects: Arc::clone(&connects),
                disconnects: Arc::clone(&disconnects),
                refuse_connect: false,
            };
            (engine, connects, disconnects)
        }
    }

    impl PhysicsEngine for CountingEngine {
        fn connect(&mut self, _mode: PresentationMode) -> Result<(), BridgeError> {
            if self.refuse_connect {
                return Err(BridgeError::engine("connect", "refused"));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn load_model(&mut self, _path: &Path, _fixed_base: bool) -> Result<BodyId, BridgeError> {
            Ok(BodyId(0))
        }
        fn joint_count(&self, _body: BodyId) -> Result<usize, BridgeError> {
            Ok(0)
        }
        fn joint_info(&self, _body: BodyId, index: JointIndex) -> Result<JointInfo, BridgeError> {
            Err(BridgeError::engine("joint_info", format!("no joint {index}")))
        }
        fn set_gravity(&mut self, _gravity: [f64; 3]) -> Result<(), BridgeError> {
            Ok(())
        }
        fn step(&mut self) -> Result<(), BridgeError> {
            Ok(())
        }
        fn joint_state(&self, _body: BodyId, _index: JointIndex) -> Result<JointReading, BridgeError> {
            Ok(JointReading::default())
        }
        fn set_joint_targets(
            &mut self,
            _body: BodyId,
            _indices: &[JointIndex],
            _mode: JointMode,
            _targets: &[f64],
            _effort_limits: &[f64],
        ) -> Result<(), BridgeError> {
            Ok(())
        }
        fn reset_world(&mut self) -> Result<(), BridgeError> {
            Ok(())
        }
        fn disconnect(&mut self) -> Result<(), BridgeError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn close_disconnects_exactly_once() {
        let (engine, connects, disconnects) = CountingEngine::new();
        let handle = EngineHandle::connect(engine, PresentationMode::Headless).unwrap();
        assert!(handle.is_connected());
        handle.close().unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_disconnects_on_error_paths() {
        let (engine, _, disconnects) = CountingEngine::new();
        let run = || -> Result<(), BridgeError> {
            let mut handle = EngineHandle::connect(engine, PresentationMode::Headless)?;
            handle.step()?;
            Err(BridgeError::engine("step", "simulated failure"))
        };
        assert!(run().is_err());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_connect_releases_nothing() {
        let (mut engine, _, disconnects) = CountingEngine::new();
        engine.refuse_connect = true;
        assert!(EngineHandle::connect(engine, PresentationMode::Graphical).is_err());
        assert_eq!(disconnects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn presentation_from_gui_flag() {
        assert_eq!(PresentationMode::from_gui_flag(true), PresentationMode::Graphical);
        assert_eq!(PresentationMode::from_gui_flag(false), PresentationMode::Headless);
    }
}
