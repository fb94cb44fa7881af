//! Vision-based precision landing for MAVLink autopilots.
//!
//! This crate wires the `scandium-*` crates into one per-tick pipeline:
//! fiducial detections are turned into a camera pose, moved into the
//! vehicle frame, smoothed, checked against the landing zone's landability,
//! fed to the landing state machine, and, while a target is tracked,
//! published to the autopilot as MAVLink `LANDING_TARGET`.
//!
//! ## Quickstart
//!
//! ```
//! use scandium::config::LandingConfig;
//! use scandium::sim::{run_simulation, SimulationOptions};
//!
//! let cfg = LandingConfig::default();
//! let summary = run_simulation(&cfg, &SimulationOptions::default()).unwrap();
//! println!("{:?} after {} ticks", summary.final_state, summary.ticks);
//! ```
//!
//! ## API map
//! - `scandium::core`: shared types (frames, detections, poses, time).
//! - `scandium::pose`: PnP, frame transform and temporal filter.
//! - `scandium::landability`: landing-zone scoring.
//! - `scandium::control`: landing state machine and safety checks.
//! - `scandium::mavlink`: LANDING_TARGET, heartbeats and transports.
//! - [`config`]: JSON configuration and validation.
//! - [`pipeline`]: one synchronous tick.
//! - [`runner`]: fixed-rate loop with a heartbeat thread.
//! - [`sim`]: synthetic scenes and closed-loop simulation.
//! - [`telemetry`]: rolling frame rate, latency and confidence.
//! - [`params`]: ArduPilot and PX4 parameter profiles.
//! - `scandium::frames` (feature `image`): `image::GrayImage` interop.

pub use scandium_control as control;
pub use scandium_core as core;
pub use scandium_landability as landability;
pub use scandium_mavlink as mavlink;
pub use scandium_pose as pose;

pub use scandium_control::{FsmStateKind, LandingFsm};
pub use scandium_core::{Detection, FilteredPose, Frame, LandabilityResult, Timestamp};

pub mod config;
pub mod params;
pub mod pipeline;
pub mod runner;
pub mod sim;
pub mod telemetry;

#[cfg(feature = "image")]
pub mod frames;

/// Route `log` records into `tracing` and install the fmt subscriber.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, default_filter: &str) {
    scandium_core::init_tracing(json, default_filter);
    let _ = tracing_log::LogTracer::init();
}
