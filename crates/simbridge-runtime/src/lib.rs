//! `simbridge-runtime` – the simulation driver.
//!
//! Owns the physics engine once it is set up and runs it at a fixed rate,
//! moving joint commands in and joint states out through the event bus.
//!
//! # Modules
//!
//! - [`command_buffer`] – [`JointCommandBuffer`][command_buffer::JointCommandBuffer]:
//!   latest-value-wins command cell, one per joint per mode, collected in
//!   [`CommandBuffers`][command_buffer::CommandBuffers].
//! - [`command_router`] – [`CommandRouter`][command_router::CommandRouter]:
//!   drains the buffers once per tick and issues at most one actuation call,
//!   position before velocity before effort.
//! - [`joint_state_publisher`] – reads every registered joint and publishes
//!   a snapshot on [`Topic::JointStates`][simbridge_middleware::Topic::JointStates].
//! - [`ingest`] – [`CommandIngestor`][ingest::CommandIngestor]: moves joint
//!   commands from the bus into the buffers.
//! - [`sim_loop`] – [`SimulationLoop`][sim_loop::SimulationLoop] and its
//!   control handle [`SimControl`][sim_loop::SimControl] (pause, resume,
//!   reset).
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging plus optional OTLP span export.

pub mod command_buffer;
pub mod command_router;
pub mod ingest;
pub mod joint_state_publisher;
pub mod sim_loop;
pub mod telemetry;

pub use command_buffer::{CommandBuffers, DrainedCommand, JointCommandBuffer};
pub use command_router::{CommandRouter, ControlFrame};
pub use ingest::CommandIngestor;
pub use joint_state_publisher::JointStatePublisher;
pub use sim_loop::{SimControl, SimulationLoop, SimulationLoopConfig, TickReport, tick_period};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
