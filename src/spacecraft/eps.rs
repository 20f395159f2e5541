//! Electrical power: solar arrays, battery depth of discharge and the
//! power unit temperature.

use super::{SafeModeCause, SpacecraftState, Subsystem, Tick};
use crate::model::SolarArrayStatus;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DOD_ALARM: f64 = 98.0;
pub const TEMPERATURE_ALARM: f64 = 60.0;

const BASE_LOAD: f64 = -2.0;
const ARRAY_OUTPUT: f64 = 5.0;
const GPS_LOAD: f64 = 0.5;
const CAMERA_LOAD: f64 = 4.0;
const TRANSMITTER_LOAD: f64 = 5.0;

const EQUILIBRIUM_TEMP: f64 = 10.0;
const TRANSMITTER_HEAT: f64 = 10.0;
const SUNLIGHT_HEAT: f64 = 20.0;
const GPS_HEAT: f64 = 10.0;
const CAMERA_HEAT: f64 = 10.0;
const THERMAL_RATE: f64 = 0.005;
const JITTER: f64 = 0.5;

#[derive(Debug)]
pub struct Eps {
    rng: StdRng,
}

impl Eps {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

/// Battery charge rate in percent per second.
pub fn net_power(state: &SpacecraftState) -> f64 {
    let mut power = BASE_LOAD;
    if state.sunlit {
        let producing = state
            .eps
            .sol_array
            .iter()
            .filter(|a| **a == SolarArrayStatus::Nominal)
            .count();
        power += ARRAY_OUTPUT * producing as f64;
    }
    if state.pl.gps_status.is_on() {
        power -= GPS_LOAD;
    }
    if state.pl.camera_status.is_on() {
        power -= CAMERA_LOAD;
    }
    if state.ttc.tx_status.is_on() {
        power -= TRANSMITTER_LOAD;
    }
    power / 100.0
}

/// Temperature the power unit relaxes towards.
pub fn target_temperature(state: &SpacecraftState) -> f64 {
    let heat = |on: bool, amount: f64| if on { amount } else { 0.0 };
    EQUILIBRIUM_TEMP
        + heat(state.ttc.tx_status.is_on(), TRANSMITTER_HEAT)
        + heat(state.sunlit, SUNLIGHT_HEAT)
        + heat(state.pl.gps_status.is_on(), GPS_HEAT)
        + heat(state.pl.camera_status.is_on(), CAMERA_HEAT)
}

impl Subsystem for Eps {
    fn name(&self) -> &'static str {
        "EPS"
    }

    fn update(&mut self, state: &mut SpacecraftState, tick: &Tick<'_>) -> Option<SafeModeCause> {
        let net = net_power(state);
        let target = target_temperature(state);
        let jitter = self.rng.gen_range(-JITTER..JITTER);

        let eps = &mut state.eps;
        eps.net_power = net;
        eps.battery_dod = (eps.battery_dod - net * tick.dt).clamp(0.0, 100.0);
        eps.temperature += -(eps.temperature - target) * THERMAL_RATE * tick.dt + jitter;

        let dod_alarm = eps.battery_dod >= DOD_ALARM;
        let temperature_alarm = eps.temperature >= TEMPERATURE_ALARM;
        let cause = if dod_alarm && !eps.dod_alarm {
            Some(SafeModeCause::BatteryDepth)
        } else if temperature_alarm && !eps.temperature_alarm {
            Some(SafeModeCause::Temperature)
        } else {
            None
        };
        eps.dod_alarm = dod_alarm;
        eps.temperature_alarm = temperature_alarm;
        cause
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{FixedGeometry, OrbitGeometryProvider};
    use crate::model::OnOff;
    use crate::overrides::OverrideState;

    fn step(eps: &mut Eps, state: &mut SpacecraftState, dt: f64) -> Option<SafeModeCause> {
        let observation = FixedGeometry::new().observe(1.0).unwrap();
        let overrides = OverrideState::default();
        eps.update(state, &Tick { ts: 1.0, dt, observation: &observation, overrides: &overrides })
    }

    #[test]
    fn net_power_budget() {
        let mut state = SpacecraftState { sunlit: true, ..SpacecraftState::default() };
        state.ttc.tx_status = OnOff::Off;
        assert!((net_power(&state) - 0.08).abs() < 1e-12);

        state.eps.sol_array[1] = SolarArrayStatus::Disabled;
        state.ttc.tx_status = OnOff::On;
        state.pl.camera_status = OnOff::On;
        state.pl.gps_status = OnOff::On;
        assert!((net_power(&state) + 0.065).abs() < 1e-12);

        state.sunlit = false;
        assert!((net_power(&state) + 0.115).abs() < 1e-12);
    }

    #[test]
    fn depth_of_discharge_is_clamped() {
        let mut eps = Eps::new(Some(3));
        let mut state = SpacecraftState { sunlit: true, ..SpacecraftState::default() };
        state.eps.battery_dod = 0.1;
        step(&mut eps, &mut state, 100.0);
        assert_eq!(state.eps.battery_dod, 0.0);
    }

    #[test]
    fn alarm_fires_on_rising_edge_only() {
        let mut eps = Eps::new(Some(5));
        let mut state = SpacecraftState::default();
        state.eps.battery_dod = 97.99;
        state.ttc.tx_status = OnOff::On;

        assert_eq!(step(&mut eps, &mut state, 10.0), Some(SafeModeCause::BatteryDepth));
        assert!(state.eps.dod_alarm);
        assert_eq!(step(&mut eps, &mut state, 10.0), None);
    }

    #[test]
    fn temperature_relaxes_towards_target() {
        let mut eps = Eps::new(Some(9));
        let mut state = SpacecraftState::default();
        state.ttc.tx_status = OnOff::Off;
        state.eps.temperature = 0.0;
        for _ in 0..100 {
            step(&mut eps, &mut state, 20.0);
        }
        // target 10 in eclipse with everything off
        assert!((state.eps.temperature - 10.0).abs() < 3.0, "{}", state.eps.temperature);
        assert!(!state.eps.temperature_alarm);
    }
}
