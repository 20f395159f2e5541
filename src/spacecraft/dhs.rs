//! Data handling: telemetry counter, the rolling TM window and the onboard
//! mass memory.

use super::{SafeModeCause, SpacecraftState, Subsystem, Tick};
use crate::model::{Band, BitRate, Carrier, LockState, OnOff, RfMode};
use arrayvec::ArrayString;
use chrono::{DateTime, Utc};

pub const TM_WINDOW_LEN: usize = 12;

/// One line of the TM window.
pub type TmLine = ArrayString<64>;
pub type TmWindow = heapless::Vec<TmLine, TM_WINDOW_LEN>;

pub const MEMORY_FULL: f64 = 100.0;

const BASELINE_FILL: f64 = 0.0001;
const CAMERA_FILL: f64 = 0.001;
const GPS_FILL: f64 = 0.0005;
const DUMP_BASE: f64 = 0.1;

#[derive(Debug, Default)]
pub struct Dhs;

/// Memory packets downlinked per tick while dumping.
pub const fn dump_packets(mode: RfMode) -> usize {
    match (mode.band(), mode.bit_rate()) {
        (Band::S, BitRate::Lbr) => 1,
        (Band::S, BitRate::Hbr) => 2,
        (Band::X, BitRate::Lbr) => 3,
        (Band::X, BitRate::Hbr) => 4,
    }
}

/// Memory drained per second while dumping, in percent.
pub fn dump_rate(mode: RfMode) -> f64 {
    let band = match mode.band() {
        Band::S => 1.0,
        Band::X => 11.0,
    };
    let bit_rate = match mode.bit_rate() {
        BitRate::Lbr => 1.0,
        BitRate::Hbr => 1.6,
    };
    let carrier = match mode.carrier() {
        Carrier::Sup => 1.0,
        Carrier::Res => 0.8,
        Carrier::Sub => 0.6,
    };
    DUMP_BASE * band * bit_rate * carrier
}

/// Memory filled per second by housekeeping and payloads, in percent.
pub fn fill_rate(state: &SpacecraftState) -> f64 {
    let mut fill = BASELINE_FILL;
    if state.pl.camera_status.is_on() {
        fill += CAMERA_FILL;
    }
    if state.pl.gps_status.is_on() {
        fill += GPS_FILL;
    }
    fill
}

/// `2024-01-01T12:00:00`, empty for timestamps chrono cannot represent.
pub fn iso_timestamp(ts: f64) -> String {
    DateTime::<Utc>::from_timestamp_millis((ts * 1000.0).round() as i64)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

fn tm_line(text: &str) -> TmLine {
    let mut line = TmLine::new();
    for c in text.chars() {
        if line.try_push(c).is_err() {
            break;
        }
    }
    line
}

/// Prepend `fresh` lines and keep the newest [`TM_WINDOW_LEN`].
fn push_window(window: &mut TmWindow, fresh: &[TmLine]) {
    let mut next = TmWindow::new();
    for line in fresh.iter().chain(window.iter()) {
        if next.push(*line).is_err() {
            break;
        }
    }
    *window = next;
}

/// Append an operator command to the TC history.
pub fn record_tc(state: &mut SpacecraftState, label: &str) {
    state.dhs.tc_counter += 1;
    let entry = format!(
        "{:03}\t{}\t{}",
        state.dhs.tc_counter,
        iso_timestamp(state.ts),
        label
    );
    state.dhs.tc_history.push(entry);
}

impl Subsystem for Dhs {
    fn name(&self) -> &'static str {
        "DHS"
    }

    fn update(&mut self, state: &mut SpacecraftState, tick: &Tick<'_>) -> Option<SafeModeCause> {
        let iso = iso_timestamp(tick.ts);
        state.dhs.tm_counter = state.dhs.tm_counter.wrapping_add(1);

        let mut fresh = vec![tm_line(&format!(
            "{}\t{}\tReceived TM Packet",
            state.dhs.tm_counter, iso
        ))];
        if state.dhs.mem_dump_enabled {
            let packet = tm_line(&format!("\t{}\tReceived Memory Packet", iso));
            fresh.extend(std::iter::repeat(packet).take(dump_packets(state.ttc.mode)));
        }
        push_window(&mut state.dhs.tm_window, &fresh);

        if state.ttc.state_dl != LockState::FrameLock || state.dhs.memory <= 0.0 {
            state.dhs.mem_dump_enabled = false;
        }

        let dump = if state.dhs.mem_dump_enabled { dump_rate(state.ttc.mode) } else { 0.0 };
        let fill = fill_rate(state);
        let dhs = &mut state.dhs;
        dhs.memory = (dhs.memory + (fill - dump) * tick.dt).clamp(0.0, MEMORY_FULL);
        if dhs.memory >= MEMORY_FULL {
            state.pl.camera_status = OnOff::Off;
            state.pl.gps_status = OnOff::Off;
        }
        None
    }
}
