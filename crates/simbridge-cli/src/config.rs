//! Bridge configuration – reads `simbridge.toml`.
//!
//! Lookup order for the file: `--config <path>`, then `SIMBRIDGE_CONFIG`,
//! then `./simbridge.toml` (see [`Cli`]).  A missing file yields the
//! defaults; individual fields can then be overridden with `SIMBRIDGE_*`
//! environment variables.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use simbridge_runtime::{SimulationLoopConfig, tick_period};
use simbridge_types::BridgeError;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "simbridge", version, about = "Physics simulation bridge")]
pub struct Cli {
    /// Configuration file
    #[arg(long, env = "SIMBRIDGE_CONFIG", default_value = "simbridge.toml")]
    pub config: PathBuf,
}

/// Process configuration, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Simulation tick rate in Hz.
    #[serde(default = "default_loop_rate")]
    pub loop_rate: f64,

    /// Requested initial pause.  The loop still starts running.
    #[serde(default)]
    pub pause_simulation: bool,

    /// Effort limit shared by all joints in position and velocity mode.
    #[serde(default = "default_max_effort")]
    pub max_effort: f64,

    /// Z component of the gravity vector.
    #[serde(default = "default_gravity")]
    pub gravity: f64,

    /// Robot description to load.  Mandatory.
    #[serde(default)]
    pub robot_model_path: Option<PathBuf>,

    /// Open the engine's graphical client.
    #[serde(default = "default_true")]
    pub gui: bool,

    #[serde(default = "default_true")]
    pub fixed_base: bool,

    /// Floor model loaded after the robot.  An empty path disables it.
    #[serde(default = "default_ground_plane")]
    pub ground_plane: Option<PathBuf>,

    /// WebSocket bridge listen address.
    #[serde(default = "default_bridge_addr")]
    pub bridge_addr: SocketAddr,
}

fn default_loop_rate() -> f64 {
    10.0
}
fn default_max_effort() -> f64 {
    50.0
}
fn default_gravity() -> f64 {
    -9.81
}
fn default_true() -> bool {
    true
}
fn default_ground_plane() -> Option<PathBuf> {
    Some(PathBuf::from("plane.urdf"))
}
fn default_bridge_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loop_rate: default_loop_rate(),
            pause_simulation: false,
            max_effort: default_max_effort(),
            gravity: default_gravity(),
            robot_model_path: None,
            gui: true,
            fixed_base: true,
            ground_plane: default_ground_plane(),
            bridge_addr: default_bridge_addr(),
        }
    }
}

impl Config {
    /// Check the settings the process cannot start without.
    pub fn validate(&self) -> Result<(), BridgeError> {
        self.robot_model_path()?;
        tick_period(self.loop_rate)?;
        Ok(())
    }

    /// The robot model path, or [`BridgeError::MissingModelPath`] when unset
    /// or empty.
    pub fn robot_model_path(&self) -> Result<&Path, BridgeError> {
        match self.robot_model_path.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => Err(BridgeError::MissingModelPath),
        }
    }

    /// The floor model to load, if any.
    pub fn ground_plane(&self) -> Option<&Path> {
        self.ground_plane.as_deref().filter(|path| !path.as_os_str().is_empty())
    }

    pub fn loop_config(&self) -> SimulationLoopConfig {
        SimulationLoopConfig {
            loop_rate_hz: self.loop_rate,
            max_effort: self.max_effort,
            pause_at_startup: self.pause_simulation,
        }
    }
}

/// Load the config at `path`, falling back to defaults when the file does
/// not exist, then apply environment overrides.
pub fn load_from(path: &Path) -> Result<Config, BridgeError> {
    let mut cfg = if path.exists() {
        let raw = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `SIMBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SIMBRIDGE_LOOP_RATE` | `loop_rate` |
/// | `SIMBRIDGE_MAX_EFFORT` | `max_effort` |
/// | `SIMBRIDGE_GRAVITY` | `gravity` |
/// | `SIMBRIDGE_ROBOT_MODEL_PATH` | `robot_model_path` |
/// | `SIMBRIDGE_GUI` | `gui` |
/// | `SIMBRIDGE_BRIDGE_ADDR` | `bridge_addr` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(v) = env_parsed("SIMBRIDGE_LOOP_RATE") {
        cfg.loop_rate = v;
    }
    if let Some(v) = env_parsed("SIMBRIDGE_MAX_EFFORT") {
        cfg.max_effort = v;
    }
    if let Some(v) = env_parsed("SIMBRIDGE_GRAVITY") {
        cfg.gravity = v;
    }
    if let Some(v) = std::env::var_os("SIMBRIDGE_ROBOT_MODEL_PATH") {
        cfg.robot_model_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env_parsed("SIMBRIDGE_GUI") {
        cfg.gui = v;
    }
    if let Some(v) = env_parsed("SIMBRIDGE_BRIDGE_ADDR") {
        cfg.bridge_addr = v;
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    // Serialises every test that reads or writes SIMBRIDGE_* variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.loop_rate, 10.0);
        assert!(!cfg.pause_simulation);
        assert_eq!(cfg.max_effort, 50.0);
        assert_eq!(cfg.gravity, -9.81);
        assert!(cfg.gui);
        assert!(cfg.fixed_base);
        assert_eq!(cfg.ground_plane(), Some(Path::new("plane.urdf")));
        assert_eq!(cfg.bridge_addr.port(), 9090);
    }

    #[test]
    fn ground_plane_defaults_on_and_empty_path_disables_it() {
        let cfg: Config = toml::from_str("robot_model_path = \"legs.urdf\"").unwrap();
        assert_eq!(cfg.ground_plane(), Some(Path::new("plane.urdf")));

        let cfg: Config = toml::from_str("ground_plane = \"\"").unwrap();
        assert_eq!(cfg.ground_plane(), None);

        let cfg: Config = toml::from_str("ground_plane = \"floors/tiles.urdf\"").unwrap();
        assert_eq!(cfg.ground_plane(), Some(Path::new("floors/tiles.urdf")));
    }

    #[test]
    fn load_from_returns_defaults_when_missing() {
        let _env = env_lock();
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = load_from(&dir.path().join("simbridge.toml")).expect("no error");
        assert_eq!(cfg.loop_rate, 10.0);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let _env = env_lock();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("simbridge.toml");
        std::fs::write(
            &path,
            "robot_model_path = \"robots/legs.urdf\"\nloop_rate = 100.0\ngui = false\nground_plane = \"plane.urdf\"\n",
        )
        .unwrap();

        let cfg = load_from(&path).expect("load ok");
        assert_eq!(cfg.robot_model_path.as_deref(), Some(Path::new("robots/legs.urdf")));
        assert_eq!(cfg.loop_rate, 100.0);
        assert!(!cfg.gui);
        assert_eq!(cfg.ground_plane.as_deref(), Some(Path::new("plane.urdf")));
        assert_eq!(cfg.max_effort, 50.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let _env = env_lock();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("simbridge.toml");
        std::fs::write(&path, "loop_rate = \"fast\"").unwrap();
        assert!(matches!(load_from(&path), Err(BridgeError::Config(_))));
    }

    #[test]
    fn validate_requires_model_path() {
        let mut cfg = Config::default();
        assert_eq!(cfg.validate(), Err(BridgeError::MissingModelPath));

        cfg.robot_model_path = Some(PathBuf::new());
        assert_eq!(cfg.validate(), Err(BridgeError::MissingModelPath));

        cfg.robot_model_path = Some(PathBuf::from("legs.urdf"));
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_unusable_loop_rate() {
        for rate in [0.0, -1.0, f64::NAN, 1e-20, 1e10] {
            let cfg = Config {
                robot_model_path: Some(PathBuf::from("legs.urdf")),
                loop_rate: rate,
                ..Config::default()
            };
            assert!(matches!(cfg.validate(), Err(BridgeError::Config(_))), "rate {rate} accepted");
        }
    }

    #[test]
    fn loop_config_carries_rate_effort_and_pause_flag() {
        let cfg = Config {
            loop_rate: 25.0,
            max_effort: 12.0,
            pause_simulation: true,
            ..Config::default()
        };
        let loop_cfg = cfg.loop_config();
        assert_eq!(loop_cfg.loop_rate_hz, 25.0);
        assert_eq!(loop_cfg.max_effort, 12.0);
        assert!(loop_cfg.pause_at_startup);
    }

    #[test]
    fn cli_config_flag_forms() {
        let cli = Cli::try_parse_from(["simbridge", "--config", "a.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("a.toml"));

        let cli = Cli::try_parse_from(["simbridge", "--config=b.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("b.toml"));

        assert!(Cli::try_parse_from(["simbridge", "--config"]).is_err());
        assert!(Cli::try_parse_from(["simbridge", "--verbose"]).is_err());
        assert!(Cli::try_parse_from(["simbridge", "extra.toml"]).is_err());
    }

    #[test]
    fn cli_config_falls_back_to_env_then_default() {
        let _env = env_lock();
        // SAFETY: env_lock() serialises every access to these variables.
        unsafe {
            std::env::remove_var("SIMBRIDGE_CONFIG");
        }
        let cli = Cli::try_parse_from(["simbridge"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("simbridge.toml"));

        unsafe {
            std::env::set_var("SIMBRIDGE_CONFIG", "/etc/simbridge/lab.toml");
        }
        let from_env = Cli::try_parse_from(["simbridge"]).unwrap();
        let explicit = Cli::try_parse_from(["simbridge", "--config", "x.toml"]).unwrap();
        unsafe {
            std::env::remove_var("SIMBRIDGE_CONFIG");
        }
        assert_eq!(from_env.config, PathBuf::from("/etc/simbridge/lab.toml"));
        assert_eq!(explicit.config, PathBuf::from("x.toml"));
    }

    #[test]
    fn apply_env_overrides_changes_numeric_fields() {
        let _env = env_lock();
        // SAFETY: env_lock() serialises every access to these variables.
        unsafe {
            std::env::set_var("SIMBRIDGE_LOOP_RATE", "240");
            std::env::set_var("SIMBRIDGE_GRAVITY", "-1.62");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.loop_rate, 240.0);
        assert_eq!(cfg.gravity, -1.62);
        unsafe {
            std::env::remove_var("SIMBRIDGE_LOOP_RATE");
            std::env::remove_var("SIMBRIDGE_GRAVITY");
        }
    }

    #[test]
    fn apply_env_overrides_sets_model_path_and_gui() {
        let _env = env_lock();
        // SAFETY: env_lock() serialises every access to these variables.
        unsafe {
            std::env::set_var("SIMBRIDGE_ROBOT_MODEL_PATH", "/opt/robots/arm.urdf");
            std::env::set_var("SIMBRIDGE_GUI", "false");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.robot_model_path.as_deref(), Some(Path::new("/opt/robots/arm.urdf")));
        assert!(!cfg.gui);
        unsafe {
            std::env::remove_var("SIMBRIDGE_ROBOT_MODEL_PATH");
            std::env::remove_var("SIMBRIDGE_GUI");
        }
    }

    #[test]
    fn apply_env_overrides_ignores_unparsable_values() {
        let _env = env_lock();
        // SAFETY: env_lock() serialises every access to these variables.
        unsafe {
            std::env::set_var("SIMBRIDGE_MAX_EFFORT", "lots");
            std::env::set_var("SIMBRIDGE_BRIDGE_ADDR", "not-an-address");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.max_effort, 50.0);
        assert_eq!(cfg.bridge_addr, default_bridge_addr());
        unsafe {
            std::env::remove_var("SIMBRIDGE_MAX_EFFORT");
            std::env::remove_var("SIMBRIDGE_BRIDGE_ADDR");
        }
    }
}
