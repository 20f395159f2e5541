use super::{SafeModeCause, SpacecraftState, Subsystem, Tick};
use crate::link::{self, NO_SIGNAL_SNR};
use crate::model::LockState;

/// Telemetry, tracking and command transponder.
#[derive(Debug, Default)]
pub struct Ttc;

impl Subsystem for Ttc {
    fn name(&self) -> &'static str {
        "TTC"
    }

    fn update(&mut self, state: &mut SpacecraftState, _tick: &Tick<'_>) -> Option<SafeModeCause> {
        let ground = &state.ground;
        let ttc = &mut state.ttc;

        let power = if ground.carrier_ul.is_on() { ground.power_ul } else { 0.0 };
        ttc.snr_ul = match ground.range_km {
            Some(range) if range > 0.0 && !link::is_blackout(ttc.mode, ttc.x_antenna) => {
                link::uplink_snr(range, power)
            }
            _ => NO_SIGNAL_SNR,
        };

        ttc.state_ul = if ttc.tx_status.is_on() && ground.sweep_done {
            link::uplink_lock(ttc.snr_ul)
        } else {
            LockState::NoRf
        };

        if !ttc.state_ul.at_least(LockState::PllLock) || !ttc.state_dl.at_least(LockState::PllLock)
        {
            ttc.coherent = false;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{FixedGeometry, OrbitGeometryProvider};
    use crate::model::{Antenna, OnOff, RfMode};
    use crate::overrides::OverrideState;

    fn update(state: &mut SpacecraftState) {
        let observation = FixedGeometry::new().observe(1.0).unwrap();
        let overrides = OverrideState::default();
        Ttc.update(state, &Tick { ts: 1.0, dt: 1.0, observation: &observation, overrides: &overrides });
    }

    fn linked() -> SpacecraftState {
        let mut state = SpacecraftState::default();
        state.ttc.tx_status = OnOff::On;
        state.ttc.state_dl = LockState::FrameLock;
        state.ground.carrier_ul = OnOff::On;
        state.ground.sweep_done = true;
        state.ground.power_ul = 50.0;
        state.ground.range_km = Some(1000.0);
        state
    }

    #[test]
    fn uplink_snr_follows_power_and_range() {
        let mut state = linked();
        update(&mut state);
        // 28 + 50 - 60
        assert!((state.ttc.snr_ul - 18.0).abs() < 1e-9);
        assert_eq!(state.ttc.state_ul, LockState::FrameLock);

        state.ground.carrier_ul = OnOff::Off;
        update(&mut state);
        assert!((state.ttc.snr_ul + 32.0).abs() < 1e-9);
        assert_eq!(state.ttc.state_ul, LockState::NoRf);
    }

    #[test]
    fn no_lock_before_sweep() {
        let mut state = linked();
        state.ground.sweep_done = false;
        update(&mut state);
        assert_eq!(state.ttc.state_ul, LockState::NoRf);
    }

    #[test]
    fn blackout_and_missing_range_kill_uplink() {
        let mut state = linked();
        state.ttc.mode = RfMode::XSupLbr;
        state.ttc.x_antenna = Antenna::Hga;
        update(&mut state);
        assert_eq!(state.ttc.snr_ul, NO_SIGNAL_SNR);

        let mut state = linked();
        state.ground.range_km = None;
        update(&mut state);
        assert_eq!(state.ttc.snr_ul, NO_SIGNAL_SNR);
    }

    #[test]
    fn coherence_needs_both_links() {
        let mut state = linked();
        state.ttc.coherent = true;
        update(&mut state);
        assert!(state.ttc.coherent);

        state.ttc.state_dl = LockState::NoRf;
        update(&mut state);
        assert!(!state.ttc.coherent);
    }
}
