//! Ground station engine.
//!
//! Owns the downlink acquisition state machine, the uplink carrier and
//! sweep procedure, antenna tracking and the flight dynamics samples.

pub mod spectrum;

pub use spectrum::{SpectrumGenerator, TracePoint};

use crate::control::{value_bool, value_f64, value_text};
use crate::error::EngineError;
use crate::geometry::{OrbitGeometryProvider, PassWindow};
use crate::link::{self, NO_SIGNAL_SNR};
use crate::model::{Enablement, FrameQuality, LockState, OnOff, RfMode};
use crate::overrides::{OverrideState, Shadow};
use crate::spacecraft::SpacecraftState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Minimum elevation for switching the uplink carrier, and below which it
/// drops on its own.
pub const CARRIER_MIN_ELEVATION: f64 = 5.0;
pub const FLIGHT_DYNAMICS_INTERVAL: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlightDynamicsSample {
    pub ts: f64,
    pub position_km: [f64; 3],
    /// Zero unless two-way ranging was available.
    pub range_km: f64,
    /// Zero unless doppler compensation was available.
    pub doppler_km_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundStationState {
    pub name: String,
    pub ts: f64,
    pub carrier_ul: OnOff,
    pub status_dl: LockState,
    pub snr_dl: f64,
    pub frame_quality: FrameQuality,
    pub frame_checks: Enablement,
    pub elevation: Option<f64>,
    pub azimuth: Option<f64>,
    pub range_km: Option<f64>,
    pub doppler_velocity: Option<f64>,
    pub position: Option<[f64; 3]>,
    pub auto_track: bool,
    pub program_track: bool,
    pub auto_range: bool,
    pub doppler_enabled: bool,
    pub sweep_done: bool,
    pub sweep_count: u32,
    pub mode: RfMode,
    pub power_ul: f64,
    pub ul_state: LockState,
    pub ul_snr: f64,
    pub tracked_ticks: u32,
    pub flight_dynamics: Vec<FlightDynamicsSample>,
    pub next_pass: Option<PassWindow>,
    pub spectrum_ul: Vec<TracePoint>,
    pub spectrum_dl: Vec<TracePoint>,
}

impl Default for GroundStationState {
    fn default() -> Self {
        Self {
            name: "ESOC-1".to_string(),
            ts: 0.0,
            carrier_ul: OnOff::Off,
            status_dl: LockState::NoRf,
            snr_dl: NO_SIGNAL_SNR,
            frame_quality: FrameQuality::Unknown,
            frame_checks: Enablement::Enabled,
            elevation: None,
            azimuth: None,
            range_km: None,
            doppler_velocity: None,
            position: None,
            auto_track: false,
            program_track: false,
            auto_range: false,
            doppler_enabled: false,
            sweep_done: false,
            sweep_count: 0,
            mode: RfMode::default(),
            power_ul: 50.0,
            ul_state: LockState::NoRf,
            ul_snr: NO_SIGNAL_SNR,
            tracked_ticks: 0,
            flight_dynamics: Vec::new(),
            next_pass: None,
            spectrum_ul: Vec::new(),
            spectrum_dl: Vec::new(),
        }
    }
}

impl GroundStationState {
    /// Elevation usable for link computations.
    fn visible_elevation(&self) -> Option<f64> {
        self.elevation.filter(|e| *e > 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GroundCommandError {
    #[error("unknown ground station control '{0}'")]
    UnknownControl(String),
    #[error("invalid value for '{control}': {value}")]
    InvalidValue { control: &'static str, value: String },
    #[error("carrier needs elevation of at least 5 deg")]
    ElevationTooLow,
    #[error("sweep needs the uplink carrier on")]
    CarrierOff,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroundCommand {
    CarrierUl(OnOff),
    Sweep,
    PowerUl(f64),
    Mode(RfMode),
    AutoTrack(bool),
    ProgramTrack(bool),
    AutoRange(bool),
    DopplerEnabled(bool),
    FrameChecks(Enablement),
}

impl GroundCommand {
    pub fn parse(control: &str, value: &Value) -> Result<Self, GroundCommandError> {
        let control = control.trim();
        let invalid = |name: &'static str| GroundCommandError::InvalidValue {
            control: name,
            value: value.to_string(),
        };
        let text = value_text(value).unwrap_or_default();

        let command = match control {
            "carrier_ul" => GroundCommand::CarrierUl(text.parse().map_err(|_| invalid("carrier_ul"))?),
            "sweep" => match value_bool(value) {
                Some(true) => GroundCommand::Sweep,
                _ => return Err(invalid("sweep")),
            },
            "power_ul" => {
                let power = value_f64(value)
                    .filter(|p| (0.0..=100.0).contains(p))
                    .ok_or_else(|| invalid("power_ul"))?;
                GroundCommand::PowerUl(power)
            }
            "mode" => GroundCommand::Mode(text.parse().map_err(|_| invalid("mode"))?),
            "auto_track" => GroundCommand::AutoTrack(value_bool(value).ok_or_else(|| invalid("auto_track"))?),
            "program_track" => {
                GroundCommand::ProgramTrack(value_bool(value).ok_or_else(|| invalid("program_track"))?)
            }
            "auto_range" => GroundCommand::AutoRange(value_bool(value).ok_or_else(|| invalid("auto_range"))?),
            "doppler_enabled" => {
                GroundCommand::DopplerEnabled(value_bool(value).ok_or_else(|| invalid("doppler_enabled"))?)
            }
            "frame_checks" => {
                GroundCommand::FrameChecks(text.parse().map_err(|_| invalid("frame_checks"))?)
            }
            other => return Err(GroundCommandError::UnknownControl(other.to_string())),
        };
        Ok(command)
    }

    /// Apply against the current state, checking the command's own
    /// preconditions.
    pub fn apply(self, state: &mut GroundStationState) -> Result<(), GroundCommandError> {
        match self {
            GroundCommand::CarrierUl(carrier) => {
                match state.elevation {
                    Some(e) if e >= CARRIER_MIN_ELEVATION => state.carrier_ul = carrier,
                    _ => return Err(GroundCommandError::ElevationTooLow),
                }
            }
            GroundCommand::Sweep => {
                if !state.carrier_ul.is_on() {
                    return Err(GroundCommandError::CarrierOff);
                }
                state.sweep_done = true;
                state.sweep_count += 1;
            }
            GroundCommand::PowerUl(power) => state.power_ul = power,
            GroundCommand::Mode(mode) => {
                if mode.band() != state.mode.band() {
                    state.sweep_done = false;
                }
                state.mode = mode;
            }
            GroundCommand::AutoTrack(on) => state.auto_track = on,
            GroundCommand::ProgramTrack(on) => state.program_track = on,
            GroundCommand::AutoRange(on) => state.auto_range = on,
            GroundCommand::DopplerEnabled(on) => state.doppler_enabled = on,
            GroundCommand::FrameChecks(checks) => state.frame_checks = checks,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct Shadows {
    carrier_ul: Shadow<OnOff>,
    frame_quality: Shadow<FrameQuality>,
}

#[derive(Debug)]
struct Inner {
    state: GroundStationState,
    shadows: Shadows,
    spectrum: SpectrumGenerator,
}

pub struct GroundStationEngine {
    inner: Mutex<Inner>,
    geometry: Arc<dyn OrbitGeometryProvider>,
}

impl std::fmt::Debug for GroundStationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroundStationEngine").finish_non_exhaustive()
    }
}

impl GroundStationEngine {
    pub fn new(
        state: GroundStationState,
        geometry: Arc<dyn OrbitGeometryProvider>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                shadows: Shadows::default(),
                spectrum: SpectrumGenerator::new(seed),
            }),
            geometry,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> GroundStationState {
        self.lock().state.clone()
    }

    /// Advance one tick. The new state is computed on a copy and committed
    /// only when every step succeeded.
    pub fn ping(
        &self,
        ts: f64,
        spacecraft: Option<&SpacecraftState>,
        overrides: &OverrideState,
    ) -> Result<GroundStationState, EngineError> {
        if !ts.is_finite() {
            return Err(EngineError::InvalidTimestamp(ts));
        }

        let mut inner = self.lock();
        let mut state = inner.state.clone();
        let mut shadows = inner.shadows.clone();
        state.ts = ts;

        import_uplink(&mut state, spacecraft);
        shadows.carrier_ul.apply(&mut state.carrier_ul, overrides.carrier_ul);
        shadows.frame_quality.apply(&mut state.frame_quality, overrides.frame_quality);
        self.update_tracking(&mut state, ts, spacecraft)?;
        state.next_pass = self.geometry.next_pass(ts);

        let snr = downlink_snr(&state, spacecraft, overrides);
        state.snr_dl = snr;
        let (ul_trace, dl_trace) = {
            let coherent = spacecraft.is_some_and(|sc| sc.ttc.coherent);
            let dl_mode = spacecraft.map_or(state.mode, |sc| sc.ttc.mode);
            let ul_power = if state.carrier_ul.is_on() { state.power_ul } else { 0.0 };
            (
                inner.spectrum.uplink(ul_power),
                inner.spectrum.downlink(dl_mode, snr, state.doppler_velocity, coherent),
            )
        };
        state.spectrum_ul = ul_trace;
        state.spectrum_dl = dl_trace;

        update_downlink_lock(&mut state, spacecraft, overrides);
        wrap_up(&mut state);

        debug!(
            "GS tick {:.0}: dl {} ({:.1} dB) ul {} carrier {}",
            ts, state.status_dl, state.snr_dl, state.ul_state, state.carrier_ul
        );

        inner.state = state;
        inner.shadows = shadows;
        Ok(inner.state.clone())
    }

    fn update_tracking(
        &self,
        state: &mut GroundStationState,
        ts: f64,
        spacecraft: Option<&SpacecraftState>,
    ) -> Result<(), EngineError> {
        state.elevation = None;
        state.azimuth = None;
        state.range_km = None;
        state.doppler_velocity = None;

        if !state.program_track || !self.geometry.in_pass(ts) {
            return Ok(());
        }

        let look = self.geometry.observe(ts)?.look;
        state.elevation = Some(look.elevation);
        state.azimuth = Some(look.azimuth);
        state.range_km = Some(look.range_km);
        state.doppler_velocity = Some(-look.range_rate_km_s);
        state.position = Some(look.topocentric_km);

        state.tracked_ticks = state.tracked_ticks.wrapping_add(1);
        if state.tracked_ticks % FLIGHT_DYNAMICS_INTERVAL == 0 {
            let ranging = spacecraft.is_some_and(|sc| sc.ttc.ranging.is_enabled());
            let coherent = spacecraft.is_some_and(|sc| sc.ttc.coherent);
            state.flight_dynamics.push(FlightDynamicsSample {
                ts,
                position_km: look.topocentric_km,
                range_km: if state.auto_range && ranging { look.range_km } else { 0.0 },
                doppler_km_s: if state.doppler_enabled && coherent {
                    -look.range_rate_km_s
                } else {
                    0.0
                },
            });
        }
        Ok(())
    }

    /// Run a ground station command under the engine lock.
    pub fn control(&self, command: GroundCommand) -> Result<(), GroundCommandError> {
        let mut inner = self.lock();
        let result = command.clone().apply(&mut inner.state);
        match &result {
            Ok(()) => info!("GS command accepted: {:?}", command),
            Err(e) => info!("GS command refused: {:?}: {}", command, e),
        }
        result
    }

    pub fn handle(&self, control: &str, value: &Value) -> Result<(), GroundCommandError> {
        self.control(GroundCommand::parse(control, value)?)
    }
}

fn import_uplink(state: &mut GroundStationState, spacecraft: Option<&SpacecraftState>) {
    match spacecraft {
        Some(sc) => {
            state.ul_state = sc.ttc.state_ul;
            state.ul_snr = sc.ttc.snr_ul;
        }
        None => {
            state.ul_state = LockState::NoRf;
            state.ul_snr = NO_SIGNAL_SNR;
        }
    }
}

fn downlink_snr(
    state: &GroundStationState,
    spacecraft: Option<&SpacecraftState>,
    overrides: &OverrideState,
) -> f64 {
    let Some(sc) = spacecraft else {
        return NO_SIGNAL_SNR;
    };

    let mut snr = match (state.elevation, state.range_km) {
        _ if !sc.ttc.tx_status.is_on() => NO_SIGNAL_SNR,
        (Some(e), Some(r)) if e >= 0.0 && r > 0.0 => {
            if state.mode.band() == sc.ttc.mode.band() {
                link::downlink_snr(r)
            } else {
                NO_SIGNAL_SNR
            }
        }
        _ => NO_SIGNAL_SNR,
    };
    if link::is_blackout(sc.ttc.mode, sc.ttc.x_antenna) {
        snr = NO_SIGNAL_SNR;
    }
    if let Some(ceiling) = overrides.max_snr_dl {
        snr = snr.min(ceiling);
    }
    snr
}

fn update_downlink_lock(
    state: &mut GroundStationState,
    spacecraft: Option<&SpacecraftState>,
    overrides: &OverrideState,
) {
    // a mode mismatch kills demodulation but leaves the spectrum visible
    if spacecraft.is_none_or(|sc| sc.ttc.mode != state.mode) {
        state.snr_dl = NO_SIGNAL_SNR;
    }

    let mut lock = link::downlink_lock(state.mode, state.snr_dl);
    if let Some(ceiling) = overrides.max_status_dl {
        lock = lock.min(ceiling);
    }
    state.status_dl = lock;

    if overrides.frame_quality.is_none() {
        state.frame_quality = if lock == LockState::FrameLock {
            FrameQuality::Good
        } else {
            FrameQuality::Unknown
        };
    }
}

fn wrap_up(state: &mut GroundStationState) {
    if state.carrier_ul.is_on() {
        if let Some(e) = state.elevation {
            if e <= CARRIER_MIN_ELEVATION {
                info!("Uplink carrier dropped at elevation {:.1} deg", e);
                state.carrier_ul = OnOff::Off;
            }
        }
    }

    if state.visible_elevation().is_none() {
        state.ul_state = LockState::NoRf;
        state.frame_quality = FrameQuality::Unknown;
    }

    let two_way = state.ul_state.min(state.status_dl);
    if !two_way.at_least(LockState::PllLock) {
        state.doppler_enabled = false;
    }
    if !two_way.at_least(LockState::BitLock) {
        state.auto_range = false;
    }
    if state.ul_snr < link::uplink_pll_threshold() {
        state.sweep_done = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::FixedGeometry;
    use serde_json::json;

    fn engine_with(geometry: Arc<FixedGeometry>) -> GroundStationEngine {
        let state = GroundStationState {
            program_track: true,
            ..GroundStationState::default()
        };
        GroundStationEngine::new(state, geometry, Some(3))
    }

    #[test]
    fn parses_closed_command_set() {
        assert_eq!(
            GroundCommand::parse("carrier_ul", &json!("on")).unwrap(),
            GroundCommand::CarrierUl(OnOff::On)
        );
        assert_eq!(GroundCommand::parse("sweep", &json!(true)).unwrap(), GroundCommand::Sweep);
        assert!(GroundCommand::parse("sweep", &json!(false)).is_err());
        assert_eq!(
            GroundCommand::parse("power_ul", &json!("61.5")).unwrap(),
            GroundCommand::PowerUl(61.5)
        );
        assert!(GroundCommand::parse("power_ul", &json!(101)).is_err());
        assert!(GroundCommand::parse("mode", &json!("K_Sup_LBR")).is_err());
        assert!(matches!(
            GroundCommand::parse("self_destruct", &json!(true)),
            Err(GroundCommandError::UnknownControl(_))
        ));
    }

    #[test]
    fn band_change_resets_sweep() {
        let mut state = GroundStationState {
            sweep_done: true,
            ..GroundStationState::default()
        };
        GroundCommand::Mode(RfMode::SSupHbr).apply(&mut state).unwrap();
        assert!(state.sweep_done);
        GroundCommand::Mode(RfMode::XSupHbr).apply(&mut state).unwrap();
        assert!(!state.sweep_done);
    }

    #[test]
    fn tracking_follows_geometry() {
        let geometry = Arc::new(FixedGeometry::new());
        geometry.set_range_rate(-2.0);
        let engine = engine_with(geometry);
        let state = engine.ping(100.0, None, &OverrideState::default()).unwrap();
        assert_eq!(state.elevation, Some(30.0));
        assert_eq!(state.range_km, Some(1500.0));
        assert_eq!(state.doppler_velocity, Some(2.0));
        assert!(state.next_pass.is_some());
        assert!(!state.spectrum_dl.is_empty());
    }

    #[test]
    fn no_tracking_without_program_track() {
        let engine = GroundStationEngine::new(
            GroundStationState::default(),
            Arc::new(FixedGeometry::new()),
            Some(3),
        );
        let state = engine.ping(100.0, None, &OverrideState::default()).unwrap();
        assert_eq!(state.elevation, None);
        assert_eq!(state.status_dl, LockState::NoRf);
    }

    #[test]
    fn flight_dynamics_sampled_every_ten_tracked_ticks() {
        let engine = engine_with(Arc::new(FixedGeometry::new()));
        let overrides = OverrideState::default();
        for i in 0..25 {
            engine.ping(f64::from(i) * 5.0, None, &overrides).unwrap();
        }
        let samples = engine.snapshot().flight_dynamics;
        assert_eq!(samples.len(), 2);
        // no ranging or doppler capability without a spacecraft
        assert!(samples.iter().all(|s| s.range_km == 0.0 && s.doppler_km_s == 0.0));
    }

    #[test]
    fn failed_tick_keeps_previous_state() {
        let engine = engine_with(Arc::new(FixedGeometry::new()));
        let before = engine.ping(10.0, None, &OverrideState::default()).unwrap();
        assert!(engine.ping(f64::NAN, None, &OverrideState::default()).is_err());
        assert_eq!(engine.snapshot().ts, before.ts);
    }
}
