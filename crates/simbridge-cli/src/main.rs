//! `simbridge` – physics simulation bridge.
//!
//! Startup sequence:
//!
//! 1. Load `simbridge.toml` (see [`config`]) and refuse to start without a
//!    robot model path.
//! 2. Connect the physics engine, load the robot and the ground plane, set
//!    gravity and register the robot's revolute joints.
//! 3. Run command ingestion, the WebSocket bridge and the simulation loop on
//!    a multi-threaded Tokio runtime.
//! 4. **Ctrl-C** stops the loop; the engine is disconnected on every exit
//!    path.  Exit status is `0` on a clean shutdown, `1` on any fatal error.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use config::{Cli, Config};
use simbridge_hal::{EngineHandle, JointRegistry, PhysicsEngine, PresentationMode, SimEngine};
use simbridge_middleware::{EventBus, Topic, WsBridge};
use simbridge_runtime::{CommandIngestor, SimulationLoop, init_tracing};
use simbridge_types::{BridgeError, JointMode, command_topic};
use tokio::sync::watch;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    // Set SIMBRIDGE_LOG_FORMAT=json for newline-delimited JSON logs.
    let _telemetry = init_tracing("simbridge");

    print_banner();

    match run() {
        Ok(()) => {
            println!("{}", "  ✓ Simulation stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "simbridge terminated");
            println!("{}: {}", "Fatal".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), BridgeError> {
    let cli = Cli::parse();
    let cfg = config::load_from(&cli.config)?;
    cfg.validate()?;
    info!(config = %cli.config.display(), ?cfg, "configuration loaded");

    let (engine, registry) = setup_engine(&cfg)?;
    print_joint_table(&registry);

    let bus = Arc::new(EventBus::default());
    let sim = SimulationLoop::new(engine, registry, Arc::clone(&bus), cfg.loop_config())?;
    let control = sim.control();
    let ingestor = CommandIngestor::new(sim.registry(), sim.buffers());

    // ── Shutdown signal ───────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping simulation …".yellow().bold());
        shutdown_tx.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the process must be killed to stop");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| BridgeError::Config(format!("cannot start async runtime: {e}")))?;

    runtime.block_on(async move {
        let ingest_task = tokio::spawn(ingestor.run(bus.subscribe_to(Topic::JointCommands)));
        let bridge = WsBridge::new(Arc::clone(&bus), Arc::new(control));
        let mut bridge_task = tokio::spawn(bridge.run_ws_server(cfg.bridge_addr));

        let outcome = tokio::select! {
            outcome = sim.run(shutdown_rx) => outcome,
            bridge = &mut bridge_task => match bridge {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) => Err(BridgeError::Channel("WebSocket bridge stopped".to_string())),
                Err(e) => Err(BridgeError::Channel(format!("WebSocket bridge task failed: {e}"))),
            },
        };

        bridge_task.abort();
        ingest_task.abort();
        outcome
    })
}

/// Connect the engine, load the robot then the ground plane, apply gravity
/// and enumerate the robot's revolute joints.
///
/// Any failure drops the handle, which disconnects the engine.
fn setup_engine(cfg: &Config) -> Result<(EngineHandle<SimEngine>, JointRegistry), BridgeError> {
    let mut engine = EngineHandle::connect(SimEngine::new(), PresentationMode::from_gui_flag(cfg.gui))?;
    let robot = engine.load_model(cfg.robot_model_path()?, cfg.fixed_base)?;
    if let Some(plane) = cfg.ground_plane() {
        engine.load_model(plane, false)?;
    }
    engine.set_gravity([0.0, 0.0, cfg.gravity])?;
    let registry = JointRegistry::from_engine(&*engine, robot)?;
    Ok((engine, registry))
}

// ─────────────────────────────────────────────────────────────────────────────
// Console output
// ─────────────────────────────────────────────────────────────────────────────

fn print_joint_table(registry: &JointRegistry) {
    if registry.is_empty() {
        warn!("robot model has no revolute joints; nothing can be commanded");
        return;
    }
    println!("  {}", "Registered joints:".bold());
    for joint in registry.iter() {
        info!(index = joint.index, name = %joint.name, "joint registered");
        println!(
            "    {:>3}  {:<24} {}",
            joint.index,
            joint.name.bold(),
            command_topic(&joint.name, JointMode::Position).dimmed()
        );
    }
    println!();
}

fn print_banner() {
    println!();
    println!("{}", r#"   _____ _           __         _     __         "#.bold().cyan());
    println!("{}", r#"  / ___/(_)___ ___  / /_  _____(_)___/ /___ ____ "#.bold().cyan());
    println!("{}", r#"  \__ \/ / __ `__ \/ __ \/ ___/ / __  / __ `/ _ \"#.bold().cyan());
    println!("{}", r#" ___/ / / / / / / / /_/ / /  / / /_/ / /_/ /  __/"#.bold().cyan());
    println!("{}", r#"/____/_/_/ /_/ /_/_.___/_/  /_/\__,_/\__, /\___/ "#.bold().cyan());
    println!("{}", r#"                                    /____/       "#.bold().cyan());
    println!();
    println!("  {} {}",
        "simbridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Physics simulation bridge");
    println!();
}
