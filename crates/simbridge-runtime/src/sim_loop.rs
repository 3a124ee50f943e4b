//! [`SimulationLoop`] – the fixed-rate simulation driver.
//!
//! The loop exclusively owns the physics engine.  Every tick while
//! [`LoopState::Running`]:
//!
//! 1. advance the simulation by one engine step;
//! 2. read every registered joint and publish a joint-state snapshot;
//! 3. drain the command buffers and issue at most one actuation call.
//!
//! A paused tick does none of the above: no step, no publication, and the
//! command buffers keep their pending values for the first tick after
//! resume.
//!
//! Pause, resume and reset arrive through [`SimControl`] and are applied
//! strictly between ticks, so they never interleave with an engine step.
//! Any engine failure inside a tick is fatal: it is published as a
//! [`EventPayload::SimulationFault`], the engine is disconnected, and
//! [`SimulationLoop::run`] returns the error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use simbridge_hal::{EngineHandle, JointRegistry, PhysicsEngine};
use simbridge_middleware::{ControlService, EventBus, Topic};
use simbridge_types::{BridgeError, ControlRequest, Event, EventPayload, JointStateSnapshot, LoopState};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::command_buffer::CommandBuffers;
use crate::command_router::{CommandRouter, ControlFrame};
use crate::joint_state_publisher::JointStatePublisher;

const SOURCE: &str = "simbridge-runtime::sim_loop";

/// Control requests waiting to be applied between ticks.
const CONTROL_QUEUE_DEPTH: usize = 16;

/// Tunables of a [`SimulationLoop`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationLoopConfig {
    /// Tick rate in Hz.  Must be positive and finite.
    pub loop_rate_hz: f64,
    /// Effort limit for position and velocity actuation.
    pub max_effort: f64,
    /// Requested initial pause.  Read and reported, but the loop always
    /// starts in [`LoopState::Running`].
    pub pause_at_startup: bool,
}

impl Default for SimulationLoopConfig {
    fn default() -> Self {
        Self {
            loop_rate_hz: 10.0,
            max_effort: 50.0,
            pause_at_startup: false,
        }
    }
}

/// What a single [`SimulationLoop::tick`] did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickReport {
    /// The engine was stepped.
    pub stepped: bool,
    /// Snapshot published this tick, if any.
    pub joint_states: Option<JointStateSnapshot>,
    /// Actuation batch applied this tick, if any.
    pub actuation: Option<ControlFrame>,
}

struct ControlEnvelope {
    request: ControlRequest,
    reply: oneshot::Sender<Result<(), BridgeError>>,
}

/// Tick period for a loop running at `rate_hz`.
///
/// # Errors
///
/// [`BridgeError::Config`] if the rate is not a positive, finite number or
/// its period is not representable as a non-zero [`Duration`].
pub fn tick_period(rate_hz: f64) -> Result<Duration, BridgeError> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return Err(BridgeError::Config(format!(
            "loop_rate must be a positive number of Hz, got {rate_hz}"
        )));
    }
    let period = Duration::try_from_secs_f64(1.0 / rate_hz)
        .map_err(|e| BridgeError::Config(format!("loop_rate {rate_hz} Hz is too low: {e}")))?;
    if period.is_zero() {
        return Err(BridgeError::Config(format!(
            "loop_rate {rate_hz} Hz is too high: period rounds to zero"
        )));
    }
    Ok(period)
}

// ─────────────────────────────────────────────────────────────────────────────
// SimulationLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct SimulationLoop<E: PhysicsEngine> {
    engine: EngineHandle<E>,
    registry: Arc<JointRegistry>,
    buffers: Arc<CommandBuffers>,
    router: CommandRouter,
    publisher: JointStatePublisher,
    bus: Arc<EventBus>,
    period: Duration,
    state: LoopState,
    state_tx: watch::Sender<LoopState>,
    control_tx: mpsc::Sender<ControlEnvelope>,
    control_rx: mpsc::Receiver<ControlEnvelope>,
}

impl<E: PhysicsEngine> SimulationLoop<E> {
    /// Build a loop around a connected engine whose model has already been
    /// loaded and enumerated into `registry`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] if the loop rate is rejected by
    /// [`tick_period`].
    pub fn new(
        engine: EngineHandle<E>,
        registry: JointRegistry,
        bus: Arc<EventBus>,
        config: SimulationLoopConfig,
    ) -> Result<Self, BridgeError> {
        let period = tick_period(config.loop_rate_hz)?;
        if config.pause_at_startup {
            warn!("pause_simulation is set but the simulation starts running; use pause_physics to pause");
        }

        let registry = Arc::new(registry);
        let buffers = Arc::new(CommandBuffers::new(registry.len()));
        let router = CommandRouter::new(Arc::clone(&registry), Arc::clone(&buffers), config.max_effort);
        let publisher = JointStatePublisher::new(Arc::clone(&registry), Arc::clone(&bus));
        let (state_tx, _) = watch::channel(LoopState::Running);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);

        Ok(Self {
            engine,
            registry,
            buffers,
            router,
            publisher,
            bus,
            period,
            state: LoopState::Running,
            state_tx,
            control_tx,
            control_rx,
        })
    }

    /// Handle for pause/resume/reset requests and state observation.
    pub fn control(&self) -> SimControl {
        SimControl {
            requests: self.control_tx.clone(),
            state: self.state_tx.subscribe(),
        }
    }

    /// The command buffers the loop drains each running tick.
    pub fn buffers(&self) -> Arc<CommandBuffers> {
        Arc::clone(&self.buffers)
    }

    pub fn registry(&self) -> Arc<JointRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Tick period derived from the configured rate.
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// Any engine failure while stepping, reading joints or actuating.  The
    /// remaining phases of the tick are skipped.
    pub fn tick(&mut self) -> Result<TickReport, BridgeError> {
        if self.state == LoopState::Paused {
            return Ok(TickReport::default());
        }

        self.engine.step()?;
        let snapshot = self.publisher.assemble(&*self.engine)?;
        self.publisher.publish(snapshot.clone());
        let actuation = self.router.dispatch(&mut *self.engine)?;

        Ok(TickReport {
            stepped: true,
            joint_states: Some(snapshot),
            actuation,
        })
    }

    /// Apply a control request immediately.  Must only be called between
    /// ticks; [`run`][Self::run] takes care of that for queued requests.
    ///
    /// Pause and resume are idempotent.  Reset keeps the current state and
    /// leaves pending commands in place.
    pub fn apply(&mut self, request: ControlRequest) -> Result<(), BridgeError> {
        match request {
            ControlRequest::Pause => {
                info!("pausing simulation");
                self.set_state(LoopState::Paused);
            }
            ControlRequest::Resume => {
                info!("unpausing simulation");
                self.set_state(LoopState::Running);
            }
            ControlRequest::Reset => {
                info!("resetting simulation");
                self.engine.reset_world()?;
            }
        }
        Ok(())
    }

    fn set_state(&mut self, state: LoopState) {
        if self.state == state {
            debug!(?state, "loop state unchanged");
            return;
        }
        self.state = state;
        self.state_tx.send_replace(state);
        self.bus.publish_to(
            Topic::SystemAlerts,
            Event::new(SOURCE, EventPayload::LoopStateChanged(state)),
        );
    }

    fn report_fault(&self, err: &BridgeError) {
        error!(error = %err, "simulation loop stopped on engine failure");
        self.bus.publish_to(
            Topic::SystemAlerts,
            Event::new(
                SOURCE,
                EventPayload::SimulationFault {
                    component: "simulation_loop".to_string(),
                    message: err.to_string(),
                },
            ),
        );
    }

    /// Tick at the configured rate until `shutdown` turns `true` (or its
    /// sender is dropped) or a tick fails.  The engine is disconnected on
    /// every exit path.
    ///
    /// Ticks that overrun their period delay the schedule instead of
    /// bursting to catch up.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), BridgeError> {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            period_ms = self.period.as_secs_f64() * 1_000.0,
            joints = self.registry.len(),
            "simulation loop started"
        );

        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
                // A due tick is served before queued control requests.
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        self.report_fault(&e);
                        break Err(e);
                    }
                }
                Some(envelope) = self.control_rx.recv() => {
                    let result = self.apply(envelope.request);
                    if let Err(e) = &result {
                        warn!(request = ?envelope.request, error = %e, "control request failed");
                    }
                    // The caller may have given up waiting.
                    let _ = envelope.reply.send(result);
                }
            }
        };

        info!("simulation loop stopping");
        let closed = self.engine.close();
        match (outcome, closed) {
            (Err(e), _) => Err(e),
            (Ok(()), closed) => closed,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SimControl
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle for the control services of a running
/// [`SimulationLoop`].
///
/// Each request is queued and applied by the loop between two ticks; the
/// returned future resolves once it has been applied.
#[derive(Clone)]
pub struct SimControl {
    requests: mpsc::Sender<ControlEnvelope>,
    state: watch::Receiver<LoopState>,
}

impl SimControl {
    /// Queue `request` and wait until the loop has applied it.
    ///
    /// # Errors
    ///
    /// [`BridgeError::LoopStopped`] if the loop is gone, or whatever the loop
    /// reported while applying the request.
    pub async fn request(&self, request: ControlRequest) -> Result<(), BridgeError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(ControlEnvelope { request, reply })
            .await
            .map_err(|_| BridgeError::LoopStopped)?;
        response.await.map_err(|_| BridgeError::LoopStopped)?
    }

    pub async fn pause(&self) -> Result<(), BridgeError> {
        self.request(ControlRequest::Pause).await
    }

    pub async fn resume(&self) -> Result<(), BridgeError> {
        self.request(ControlRequest::Resume).await
    }

    pub async fn reset(&self) -> Result<(), BridgeError> {
        self.request(ControlRequest::Reset).await
    }

    /// Last state published by the loop.
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }
}

#[async_trait]
impl ControlService for SimControl {
    async fn call(&self, request: ControlRequest) -> Result<(), BridgeError> {
        self.request(request).await
    }
}
