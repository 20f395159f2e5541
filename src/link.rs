//! Simplified RF link budget and lock acquisition ladders.
//!
//! The formulas only keep the shape of a real link: SNR falls with range,
//! and lock stages are reached by comparing SNR against ascending
//! per-mode thresholds. A value at or above a threshold reaches that stage.

use crate::model::{Antenna, Band, LockState, RfMode};

/// SNR reported when there is no signal at all.
pub const NO_SIGNAL_SNR: f64 = -128.0;

const DOWNLINK_REFERENCE_DB: f64 = 68.0;
const UPLINK_REFERENCE_DB: f64 = 28.0;

/// Uplink thresholds, ascending: PLL, PSK, BIT, FRAME.
pub const UPLINK_LADDER: [(LockState, f64); 4] = [
    (LockState::PllLock, -4.0),
    (LockState::PskLock, -3.0),
    (LockState::BitLock, 8.0),
    (LockState::FrameLock, 11.8),
];

/// Downlink thresholds for one mode. PSK lock is not part of the downlink
/// acquisition sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownlinkLadder {
    pub pll: f64,
    pub bit: f64,
    pub frame: f64,
}

impl DownlinkLadder {
    pub const fn for_mode(mode: RfMode) -> Self {
        let (pll, bit, frame) = match mode {
            RfMode::SSubLbr | RfMode::SResLbr => (-6.0, -2.0, 1.0),
            RfMode::SSupLbr => (-5.0, -1.0, 2.0),
            RfMode::SSupHbr => (-3.0, 1.0, 4.0),
            RfMode::XSubLbr | RfMode::XResLbr => (-5.0, -1.0, 2.0),
            RfMode::XSupLbr => (-4.0, 0.0, 3.0),
            RfMode::XSupHbr => (-2.0, 2.0, 5.0),
        };
        Self { pll, bit, frame }
    }

    pub fn lock(&self, snr: f64) -> LockState {
        if snr >= self.frame {
            LockState::FrameLock
        } else if snr >= self.bit {
            LockState::BitLock
        } else if snr >= self.pll {
            LockState::PllLock
        } else {
            LockState::NoRf
        }
    }
}

pub fn downlink_lock(mode: RfMode, snr: f64) -> LockState {
    DownlinkLadder::for_mode(mode).lock(snr)
}

pub fn uplink_lock(snr: f64) -> LockState {
    UPLINK_LADDER
        .iter()
        .rev()
        .find(|(_, threshold)| snr >= *threshold)
        .map_or(LockState::NoRf, |(state, _)| *state)
}

/// Lowest uplink SNR that keeps a completed sweep valid.
pub fn uplink_pll_threshold() -> f64 {
    UPLINK_LADDER[0].1
}

pub fn downlink_snr(range_km: f64) -> f64 {
    DOWNLINK_REFERENCE_DB - 20.0 * range_km.log10()
}

/// Uplink SNR at the spacecraft for the given ground transmit power.
pub fn uplink_snr(range_km: f64, power: f64) -> f64 {
    UPLINK_REFERENCE_DB + power - 20.0 * range_km.log10()
}

/// X-band with the X high-gain antenna selected blanks both links.
pub fn is_blackout(mode: RfMode, x_antenna: Antenna) -> bool {
    mode.band() == Band::X && x_antenna == Antenna::Hga
}
