//! Spacecraft engine.
//!
//! The spacecraft is a set of [`Subsystem`]s (AOCS, TTC, EPS, DHS) that each
//! advance their part of [`SpacecraftState`] once per tick. Operator
//! telecommands pass through the [`TelecommandVerifier`]; admin commands
//! are applied directly.

pub mod aocs;
pub mod commands;
pub mod dhs;
pub mod eps;
pub mod ttc;

pub use aocs::Aocs;
pub use commands::{AdminCommand, CommandError, Interlocks, SpacecraftCommand};
pub use dhs::{Dhs, TmLine, TmWindow, TM_WINDOW_LEN};
pub use eps::Eps;
pub use ttc::Ttc;

use crate::error::EngineError;
use crate::geometry::{Observation, OrbitGeometryProvider};
use crate::ground_station::GroundStationState;
use crate::link::NO_SIGNAL_SNR;
use crate::model::{
    Antenna, AocsValidity, Chain, Enablement, FrameQuality, Health, LockState, ObswMode, OnOff,
    PointingMode, RfMode, SolarArrayStatus,
};
use crate::overrides::{OverrideState, Shadow};
use crate::verifier::{TelecommandVerifier, UplinkConditions, Verification};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AocsState {
    pub chain: Chain,
    pub mode: PointingMode,
    pub prev_mode: PointingMode,
    pub valid: AocsValidity,
    /// Roll, pitch, yaw in degrees.
    pub rotation: [f64; 3],
    pub rates: [f64; 3],
    pub sun_angle: f64,
    pub nadir_angle: f64,
    pub damp: f64,
}

impl Default for AocsState {
    fn default() -> Self {
        Self {
            chain: Chain::A,
            mode: PointingMode::Nadir,
            prev_mode: PointingMode::Nadir,
            valid: AocsValidity::Unknown,
            rotation: [0.0; 3],
            rates: [0.0; 3],
            sun_angle: 0.0,
            nadir_angle: 0.0,
            damp: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtcState {
    pub chain: Chain,
    pub obc: Health,
    pub mode: RfMode,
    pub s_antenna: Antenna,
    pub x_antenna: Antenna,
    pub snr_ul: f64,
    pub state_ul: LockState,
    pub state_dl: LockState,
    pub coherent: bool,
    pub tx_status: OnOff,
    pub ranging: Enablement,
    pub ping_ack: u32,
    pub tm_suppressed: bool,
}

impl Default for TtcState {
    fn default() -> Self {
        Self {
            chain: Chain::A,
            obc: Health::Nominal,
            mode: RfMode::default(),
            s_antenna: Antenna::Lga,
            x_antenna: Antenna::Lga,
            snr_ul: NO_SIGNAL_SNR,
            state_ul: LockState::NoRf,
            state_dl: LockState::NoRf,
            coherent: false,
            tx_status: OnOff::On,
            ranging: Enablement::Disabled,
            ping_ack: 0,
            tm_suppressed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpsState {
    pub chain: Chain,
    /// Battery charge rate in percent per second, negative when draining.
    pub net_power: f64,
    pub sol_array: [SolarArrayStatus; 2],
    pub battery_dod: f64,
    pub temperature: f64,
    pub pcdu: Health,
    pub dod_alarm: bool,
    pub temperature_alarm: bool,
}

impl Default for EpsState {
    fn default() -> Self {
        Self {
            chain: Chain::A,
            net_power: 0.0,
            sol_array: [SolarArrayStatus::Nominal; 2],
            battery_dod: 50.0,
            temperature: 40.0,
            pcdu: Health::Nominal,
            dod_alarm: false,
            temperature_alarm: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DhsState {
    pub chain: Chain,
    pub obsw_mode: ObswMode,
    pub mem_dump_enabled: bool,
    pub memory: f64,
    pub tm_counter: u32,
    pub tc_counter: u32,
    /// Newest first.
    pub tm_window: TmWindow,
    pub tc_history: Vec<String>,
    pub uploaded: Vec<String>,
}

impl Default for DhsState {
    fn default() -> Self {
        Self {
            chain: Chain::A,
            obsw_mode: ObswMode::Nominal,
            mem_dump_enabled: false,
            memory: 50.0,
            tm_counter: 0,
            tc_counter: 0,
            tm_window: TmWindow::new(),
            tc_history: Vec::new(),
            uploaded: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadState {
    pub gps_status: OnOff,
    pub camera_status: OnOff,
    pub sdr_status: OnOff,
    /// Latitude, longitude in degrees and altitude in km. Zero while off.
    pub gps_pos: [f64; 3],
}

impl Default for PayloadState {
    fn default() -> Self {
        Self {
            gps_status: OnOff::Off,
            camera_status: OnOff::Off,
            sdr_status: OnOff::Off,
            gps_pos: [0.0; 3],
        }
    }
}

/// Ground station values the spacecraft side depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundLink {
    pub carrier_ul: OnOff,
    pub sweep_done: bool,
    pub power_ul: f64,
    pub range_km: Option<f64>,
    pub frame_quality: FrameQuality,
    pub frame_checks: Enablement,
}

impl Default for GroundLink {
    fn default() -> Self {
        Self {
            carrier_ul: OnOff::Off,
            sweep_done: false,
            power_ul: 0.0,
            range_km: None,
            frame_quality: FrameQuality::Unknown,
            frame_checks: Enablement::Enabled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpacecraftState {
    pub ts: f64,
    pub aocs: AocsState,
    pub ttc: TtcState,
    pub eps: EpsState,
    pub dhs: DhsState,
    pub pl: PayloadState,
    pub ground: GroundLink,
    pub position_km: [f64; 3],
    pub sunlit: bool,
    pub safe_mode_entries: u32,
}

impl SpacecraftState {
    pub fn uplink_conditions(&self) -> UplinkConditions {
        UplinkConditions {
            carrier: self.ground.carrier_ul,
            sweep_done: self.ground.sweep_done,
            power_ul: self.ground.power_ul,
            mode: self.ttc.mode,
            x_antenna: self.ttc.x_antenna,
            obc: self.ttc.obc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafeModeCause {
    BatteryDepth,
    Temperature,
    Operator,
}

/// Force the spacecraft into its survival configuration. Applying it to a
/// spacecraft already in that configuration changes nothing but the count.
pub fn enter_safe_mode(state: &mut SpacecraftState, cause: SafeModeCause) {
    warn!("Safe mode entered: {:?}", cause);
    state.aocs.valid = AocsValidity::Unknown;
    state.aocs.mode = PointingMode::Sun;
    state.aocs.chain = Chain::B;
    state.ttc.chain = Chain::B;
    state.eps.chain = Chain::B;
    state.dhs.chain = Chain::B;
    state.dhs.obsw_mode = ObswMode::Safe;
    state.pl.gps_status = OnOff::Off;
    state.pl.camera_status = OnOff::Off;
    state.pl.sdr_status = OnOff::Off;
    state.safe_mode_entries += 1;
}

/// Inputs shared by every subsystem during one tick.
#[derive(Debug, Clone, Copy)]
pub struct Tick<'a> {
    pub ts: f64,
    /// Seconds since the previous tick.
    pub dt: f64,
    pub observation: &'a Observation,
    pub overrides: &'a OverrideState,
}

pub trait Subsystem {
    fn name(&self) -> &'static str;

    /// Advance this subsystem's part of the state. Returns a cause when the
    /// subsystem requests the safe mode transition.
    fn update(&mut self, state: &mut SpacecraftState, tick: &Tick<'_>) -> Option<SafeModeCause>;
}

/// Result of a spacecraft control request.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlVerdict {
    Admin { accepted: bool, reason: Option<String> },
    Telecommand(Verification),
}

#[derive(Debug)]
struct Inner {
    state: SpacecraftState,
    tx_shadow: Shadow<OnOff>,
    aocs: Aocs,
    ttc: Ttc,
    eps: Eps,
    dhs: Dhs,
}

pub struct SpacecraftEngine {
    inner: Mutex<Inner>,
    geometry: Arc<dyn OrbitGeometryProvider>,
    verifier: TelecommandVerifier,
}

impl std::fmt::Debug for SpacecraftEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpacecraftEngine")
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

impl SpacecraftEngine {
    pub fn new(
        state: SpacecraftState,
        geometry: Arc<dyn OrbitGeometryProvider>,
        verifier: TelecommandVerifier,
        seed: Option<u64>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                tx_shadow: Shadow::new(),
                aocs: Aocs,
                ttc: Ttc,
                eps: Eps::new(seed),
                dhs: Dhs,
            }),
            geometry,
            verifier,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SpacecraftState {
        self.lock().state.clone()
    }

    /// Advance one tick using the ground station state of the same tick.
    pub fn ping(
        &self,
        ts: f64,
        ground: Option<&GroundStationState>,
        overrides: &OverrideState,
    ) -> Result<SpacecraftState, EngineError> {
        if !ts.is_finite() {
            return Err(EngineError::InvalidTimestamp(ts));
        }
        let observation = self.geometry.observe(ts)?;

        let mut guard = self.lock();
        let inner = &mut *guard;
        let mut state = inner.state.clone();
        let mut tx_shadow = inner.tx_shadow.clone();
        let dt = if state.ts > 0.0 { (ts - state.ts).max(0.0) } else { 0.0 };

        import_ground(&mut state, ground);
        tx_shadow.apply(&mut state.ttc.tx_status, overrides.tx_status);
        if !state.ttc.tx_status.is_on() {
            state.ttc.state_dl = LockState::NoRf;
        }
        state.ttc.tm_suppressed = overrides.no_tm()
            || (state.ttc.state_dl == LockState::FrameLock
                && (state.ground.frame_quality != FrameQuality::Good
                    || !state.ground.frame_checks.is_enabled()));

        state.position_km = observation.sat_eci_km;
        state.sunlit = observation.sunlit;
        state.pl.gps_pos = if state.pl.gps_status.is_on() {
            let fix = observation.sub_point;
            [fix.latitude, fix.longitude, fix.altitude_km]
        } else {
            [0.0; 3]
        };

        let tick = Tick { ts, dt, observation: &observation, overrides };
        let subsystems: [&mut dyn Subsystem; 4] =
            [&mut inner.aocs, &mut inner.ttc, &mut inner.eps, &mut inner.dhs];
        for subsystem in subsystems {
            if let Some(cause) = subsystem.update(&mut state, &tick) {
                debug!("{} requested safe mode", subsystem.name());
                enter_safe_mode(&mut state, cause);
            }
        }
        state.ts = ts;

        debug!(
            "SC tick {:.0}: ul {} ({:.1} dB) dl {} dod {:.2} mem {:.2}",
            ts, state.ttc.state_ul, state.ttc.snr_ul, state.ttc.state_dl, state.eps.battery_dod,
            state.dhs.memory
        );

        inner.state = state;
        inner.tx_shadow = tx_shadow;
        Ok(inner.state.clone())
    }

    /// Handle a control request. Admin requests skip every precondition and
    /// interlock; operator requests go through telecommand verification and
    /// are logged in the TC history when they carry a label.
    pub fn control(
        &self,
        control: &str,
        value: &Value,
        label: Option<&str>,
        overrides: &OverrideState,
        admin: bool,
    ) -> ControlVerdict {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if admin {
            let result = AdminCommand::parse(control, value)
                .map_err(|e| e.to_string())
                .and_then(|cmd| cmd.apply(&mut inner.state).map_err(str::to_string));
            info!("SC admin {} = {}: {:?}", control, value, result);
            return ControlVerdict::Admin {
                accepted: result.is_ok(),
                reason: result.err(),
            };
        }

        let conditions = inner.state.uplink_conditions();
        let verification = self.verifier.verify(
            &conditions,
            overrides,
            control,
            value,
            |cmd: SpacecraftCommand| cmd.apply(&mut inner.state, Interlocks::Enforced(overrides)),
        );
        info!("SC TC {} = {}: {}", control, value, verification.report);

        if let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) {
            dhs::record_tc(&mut inner.state, label);
        }
        ControlVerdict::Telecommand(verification)
    }
}

fn import_ground(state: &mut SpacecraftState, ground: Option<&GroundStationState>) {
    let Some(gs) = ground else {
        state.ground = GroundLink::default();
        state.ttc.state_dl = LockState::NoRf;
        return;
    };
    state.ground = GroundLink {
        carrier_ul: gs.carrier_ul,
        sweep_done: gs.sweep_done,
        power_ul: gs.power_ul,
        range_km: gs.range_km,
        frame_quality: gs.frame_quality,
        frame_checks: gs.frame_checks,
    };
    state.ttc.state_dl = if state.ttc.tx_status.is_on() {
        gs.status_dl
    } else {
        LockState::NoRf
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::FixedGeometry;

    fn engine(state: SpacecraftState) -> SpacecraftEngine {
        SpacecraftEngine::new(
            state,
            Arc::new(FixedGeometry::new()),
            TelecommandVerifier::default(),
            Some(11),
        )
    }

    #[test]
    fn safe_mode_configuration() {
        let mut state = SpacecraftState::default();
        state.pl.camera_status = OnOff::On;
        enter_safe_mode(&mut state, SafeModeCause::Operator);
        let once = state.clone();
        enter_safe_mode(&mut state, SafeModeCause::Operator);

        assert_eq!(state.aocs.mode, PointingMode::Sun);
        assert_eq!(state.dhs.obsw_mode, ObswMode::Safe);
        assert_eq!(
            [state.aocs.chain, state.ttc.chain, state.eps.chain, state.dhs.chain],
            [Chain::B; 4]
        );
        assert_eq!(state.pl.camera_status, OnOff::Off);
        assert_eq!(state.safe_mode_entries, 2);
        assert_eq!(
            SpacecraftState { safe_mode_entries: 0, ..state },
            SpacecraftState { safe_mode_entries: 0, ..once }
        );
    }

    #[test]
    fn transmitter_off_masks_downlink() {
        let mut initial = SpacecraftState::default();
        initial.ttc.tx_status = OnOff::Off;
        let sc = engine(initial);
        let ground = GroundStationState {
            status_dl: LockState::FrameLock,
            ..GroundStationState::default()
        };
        let state = sc.ping(10.0, Some(&ground), &OverrideState::default()).unwrap();
        assert_eq!(state.ttc.state_dl, LockState::NoRf);
    }

    #[test]
    fn bad_frames_suppress_telemetry() {
        let mut initial = SpacecraftState::default();
        initial.ttc.tx_status = OnOff::On;
        let sc = engine(initial);
        let mut ground = GroundStationState {
            status_dl: LockState::FrameLock,
            frame_quality: FrameQuality::Good,
            ..GroundStationState::default()
        };
        let overrides = OverrideState::default();
        assert!(!sc.ping(10.0, Some(&ground), &overrides).unwrap().ttc.tm_suppressed);

        ground.frame_quality = FrameQuality::Bad;
        assert!(sc.ping(15.0, Some(&ground), &overrides).unwrap().ttc.tm_suppressed);

        ground.frame_quality = FrameQuality::Good;
        ground.frame_checks = Enablement::Disabled;
        assert!(sc.ping(20.0, Some(&ground), &overrides).unwrap().ttc.tm_suppressed);
    }

    #[test]
    fn gps_fix_only_while_on() {
        let mut initial = SpacecraftState::default();
        initial.pl.gps_status = OnOff::On;
        let sc = engine(initial);
        let state = sc.ping(10.0, None, &OverrideState::default()).unwrap();
        assert_eq!(state.pl.gps_pos, [49.0, 8.0, 620.0]);
    }
}
