//! Orbital geometry seen by the engines.
//!
//! The engines never propagate orbits themselves; they ask an
//! [`OrbitGeometryProvider`] for an [`Observation`] at a timestamp and for
//! the visibility windows of the scenario. [`crate::orbit::Sgp4Geometry`]
//! is the propagating implementation, [`FixedGeometry`] a scripted one.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("invalid element set: {0}")]
    InvalidElements(String),
    #[error("propagation failed: {0}")]
    Propagation(String),
    #[error("timestamp {0} cannot be represented")]
    InvalidTimestamp(f64),
}

/// Geodetic point, degrees and kilometres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Geodetic {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_km: f64,
}

/// Satellite as seen from the ground station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookAngles {
    pub elevation: f64,
    pub azimuth: f64,
    pub range_km: f64,
    /// Positive when the satellite moves away from the station.
    pub range_rate_km_s: f64,
    /// East/north/up vector from station to satellite.
    pub topocentric_km: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub ts: f64,
    pub sat_eci_km: [f64; 3],
    pub sun_eci_km: [f64; 3],
    pub sunlit: bool,
    pub sub_point: Geodetic,
    pub look: LookAngles,
}

/// Visibility window in Unix seconds, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassWindow {
    pub start: f64,
    pub end: f64,
}

impl PassWindow {
    pub fn contains(&self, ts: f64) -> bool {
        self.start <= ts && ts <= self.end
    }
}

pub trait OrbitGeometryProvider: Send + Sync {
    fn observe(&self, ts: f64) -> Result<Observation, GeometryError>;

    /// Precomputed visibility windows, sorted by start time.
    fn passes(&self) -> &[PassWindow];

    fn in_pass(&self, ts: f64) -> bool {
        self.passes().iter().any(|p| p.contains(ts))
    }

    /// First window ending at or after `ts`.
    fn next_pass(&self, ts: f64) -> Option<PassWindow> {
        self.passes().iter().copied().find(|p| ts <= p.end)
    }
}

/// Scripted geometry: the satellite hangs at whatever look angles were set
/// last. Used for rehearsals without a propagator and throughout the tests.
#[derive(Debug)]
pub struct FixedGeometry {
    passes: Vec<PassWindow>,
    scene: RwLock<Scene>,
}

#[derive(Debug, Clone, Copy)]
struct Scene {
    look: LookAngles,
    sunlit: bool,
    sat_eci_km: [f64; 3],
    sun_eci_km: [f64; 3],
    sub_point: Geodetic,
}

impl FixedGeometry {
    /// Satellite 30 degrees up at 1500 km, sunlit, visible at all times.
    pub fn new() -> Self {
        Self::with_passes(vec![PassWindow {
            start: f64::MIN,
            end: f64::MAX,
        }])
    }

    pub fn with_passes(passes: Vec<PassWindow>) -> Self {
        Self {
            passes,
            scene: RwLock::new(Scene {
                look: LookAngles {
                    elevation: 30.0,
                    azimuth: 180.0,
                    range_km: 1500.0,
                    range_rate_km_s: 0.0,
                    topocentric_km: [0.0, 1299.0, 750.0],
                },
                sunlit: true,
                sat_eci_km: [7000.0, 0.0, 0.0],
                sun_eci_km: [0.0, 1.496e8, 0.0],
                sub_point: Geodetic {
                    latitude: 49.0,
                    longitude: 8.0,
                    altitude_km: 620.0,
                },
            }),
        }
    }

    pub fn set_elevation(&self, elevation: f64) {
        self.write(|scene| scene.look.elevation = elevation);
    }

    pub fn set_range(&self, range_km: f64) {
        self.write(|scene| scene.look.range_km = range_km);
    }

    pub fn set_range_rate(&self, range_rate_km_s: f64) {
        self.write(|scene| scene.look.range_rate_km_s = range_rate_km_s);
    }

    pub fn set_sunlit(&self, sunlit: bool) {
        self.write(|scene| scene.sunlit = sunlit);
    }

    fn write(&self, f: impl FnOnce(&mut Scene)) {
        let mut scene = self.scene.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut scene);
    }
}

impl Default for FixedGeometry {
    fn default() -> Self {
        Self::new()
    }
}

impl OrbitGeometryProvider for FixedGeometry {
    fn observe(&self, ts: f64) -> Result<Observation, GeometryError> {
        if !ts.is_finite() {
            return Err(GeometryError::InvalidTimestamp(ts));
        }
        let scene = *self.scene.read().unwrap_or_else(PoisonError::into_inner);
        Ok(Observation {
            ts,
            sat_eci_km: scene.sat_eci_km,
            sun_eci_km: scene.sun_eci_km,
            sunlit: scene.sunlit,
            sub_point: scene.sub_point,
            look: scene.look,
        })
    }

    fn passes(&self) -> &[PassWindow] {
        &self.passes
    }
}
