//! # Ground Segment Operations Simulator
//!
//! A real-time simulation of a ground station and a spacecraft in low Earth
//! orbit, for operator training.
//!
//! ## Features
//!
//! - **Ground station engine**: antenna tracking, uplink carrier and sweep,
//!   downlink lock acquisition, flight dynamics samples and spectrum traces
//! - **Spacecraft engine**: TTC, AOCS, EPS, DHS and payload models with
//!   autonomous safe mode entry
//! - **Telecommand verification**: three-stage reception, acceptance and
//!   execution reports driven by link state and onboard conditions
//! - **Instructor overrides**: forced link states and blackouts that layer
//!   over engine outputs without touching the engine state
//! - **Telemetry packets**: fixed-layout 117 byte frames with sync marker
//! - **Scenarios**: orbit, ground site, time window and initial states
//!
//! ## Quick Start
//!
//! ```rust
//! use simops::geometry::FixedGeometry;
//! use simops::ground_station::{GroundStationEngine, GroundStationState};
//! use simops::overrides::OverrideState;
//! use simops::spacecraft::{SpacecraftEngine, SpacecraftState};
//! use simops::verifier::TelecommandVerifier;
//! use std::sync::Arc;
//!
//! let geometry = Arc::new(FixedGeometry::new());
//! let ground = GroundStationEngine::new(GroundStationState::default(), geometry.clone(), Some(7));
//! let spacecraft = SpacecraftEngine::new(
//!     SpacecraftState::default(),
//!     geometry,
//!     TelecommandVerifier::default(),
//!     Some(7),
//! );
//!
//! let overrides = OverrideState::default();
//! let gs = ground.ping(1_700_000_000.0, None, &overrides)?;
//! let sc = spacecraft.ping(1_700_000_000.0, Some(&gs), &overrides)?;
//! assert_eq!(sc.ts, 1_700_000_000.0);
//! # Ok::<(), simops::error::EngineError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`supervisor`] - Run lifecycle, tick loop and control routing
//! - [`ground_station`] / [`spacecraft`] - The two simulation engines
//! - [`verifier`] - Telecommand verification
//! - [`overrides`] - Instructor override registry
//! - [`codec`] - Binary telemetry frames
//! - [`telemetry`] - Publication of states and frames
//! - [`scenario`], [`storage`], [`config`] - Inputs and persistence

#![deny(warnings)]
#![deny(clippy::all)]

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod geometry;
pub mod ground_station;
pub mod link;
pub mod model;
pub mod orbit;
pub mod overrides;
pub mod scenario;
pub mod spacecraft;
pub mod storage;
pub mod supervisor;
pub mod telemetry;
pub mod verifier;

pub use control::{ControlRequest, ControlResponse, System};
pub use ground_station::{GroundStationEngine, GroundStationState};
pub use overrides::{OverrideRegistry, OverrideState};
pub use spacecraft::{SpacecraftEngine, SpacecraftState};
pub use supervisor::SimulationSupervisor;
