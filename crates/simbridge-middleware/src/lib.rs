//! `simbridge-middleware` – The Pub/Sub Layer
//!
//! Moves joint commands, joint states and control requests between the
//! outside world and the simulation core without caring what they mean.
//!
//! # Modules
//!
//! - [`bus`] – Typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`ws_bridge`] – JSON-over-WebSocket bridge: external clients publish
//!   per-joint commands, call the pause/unpause/reset services, and receive
//!   `/joint_states`.

pub mod bus;
pub mod ws_bridge;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use ws_bridge::{ControlService, WsBridge};
