//! Attitude and orbit control.
//!
//! Attitude is not integrated: each tick computes the target attitude for
//! the pointing mode and blends towards it with the damping factor.

use super::{AocsState, SafeModeCause, SpacecraftState, Subsystem, Tick};
use crate::model::PointingMode;
use nalgebra::{UnitQuaternion, Vector3};
use std::f64::consts::PI;

const DAMP_STEP: f64 = 0.05;
const RATE_DECAY: f64 = 0.8;

#[derive(Debug, Default)]
pub struct Aocs;

impl Subsystem for Aocs {
    fn name(&self) -> &'static str {
        "AOCS"
    }

    fn update(&mut self, state: &mut SpacecraftState, tick: &Tick<'_>) -> Option<SafeModeCause> {
        let aocs = &mut state.aocs;
        if aocs.mode != aocs.prev_mode {
            aocs.damp = 0.0;
            aocs.prev_mode = aocs.mode;
        }
        aocs.damp = (aocs.damp + DAMP_STEP).min(1.0);

        let sat = Vector3::from(tick.observation.sat_eci_km);
        let sun = Vector3::from(tick.observation.sun_eci_km);
        let nadir_dir = -sat;
        let sun_dir = sun - sat;

        match aocs.mode {
            PointingMode::Nadir | PointingMode::Target => {
                aocs.nadir_angle *= 1.0 - aocs.damp;
                aocs.sun_angle = angle_deg(&sun_dir, &nadir_dir) * aocs.damp;
                slew(aocs, attitude_towards(&nadir_dir));
            }
            PointingMode::Sun => {
                aocs.nadir_angle = angle_deg(&nadir_dir, &sun_dir) * aocs.damp;
                aocs.sun_angle *= 1.0 - aocs.damp;
                slew(aocs, attitude_towards(&sun_dir));
            }
            PointingMode::RateDamping | PointingMode::Monitoring => {
                for rate in aocs.rates.iter_mut() {
                    *rate *= RATE_DECAY;
                }
            }
        }
        None
    }
}

fn slew(aocs: &mut AocsState, target: [f64; 3]) {
    for (axis, goal) in target.iter().enumerate() {
        let next = goal * aocs.damp;
        aocs.rates[axis] = next.abs() - aocs.rotation[axis].abs();
        aocs.rotation[axis] = next;
    }
}

/// Angle between two directions in degrees, zero when either is degenerate.
fn angle_deg(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let norms = a.norm() * b.norm();
    if norms <= f64::EPSILON {
        return 0.0;
    }
    (a.dot(b) / norms).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Roll, pitch and yaw in degrees that bring `direction` onto the -Z boresight.
fn attitude_towards(direction: &Vector3<f64>) -> [f64; 3] {
    let boresight = -Vector3::z();
    let rotation = UnitQuaternion::rotation_between(direction, &boresight)
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI));
    let (roll, pitch, yaw) = rotation.euler_angles();
    [roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()]
}
