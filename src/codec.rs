//! Fixed-layout binary telemetry frames.
//!
//! Frame layout, big-endian throughout:
//!
//! ```text
//! [ASM 1A CF FC 1D (4)] [version (1)] [ts f64 (8)]
//! [AOCS (40)] [TTC (18)] [EPS (16)] [DHS (15)] [payload (15)]
//! ```
//!
//! Enumerations travel as `u8` ordinals and chains as ASCII bytes.
//! [`TelemetryRecord`] holds the raw wire values; [`humanize`] turns them
//! back into names for display.

use crate::model::{
    Antenna, AocsValidity, Chain, Enablement, Health, LockState, ObswMode, OnOff, PointingMode,
    RfMode, SolarArrayStatus,
};
use crate::spacecraft::SpacecraftState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use static_assertions::const_assert_eq;

/// CCSDS attached sync marker.
pub const ASM: [u8; 4] = [0x1A, 0xCF, 0xFC, 0x1D];
pub const FRAME_VERSION: u8 = 1;

const HEADER_LEN: usize = 4 + 1;
const TS_LEN: usize = 8;
const AOCS_LEN: usize = 4 + 3 * 4 + 3 * 4 + 3 * 4;
const TTC_LEN: usize = 5 + 4 + 5 + 4;
const EPS_LEN: usize = 1 + 4 + 2 + 4 + 4 + 1;
const DHS_LEN: usize = 3 + 4 + 4 + 4;
const PAYLOAD_LEN: usize = 3 + 3 * 4;

pub const FRAME_LEN: usize = 117;
const_assert_eq!(
    FRAME_LEN,
    HEADER_LEN + TS_LEN + AOCS_LEN + TTC_LEN + EPS_LEN + DHS_LEN + PAYLOAD_LEN
);

pub type Frame = [u8; FRAME_LEN];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("frame length {actual}, expected {expected}")]
    Length { expected: usize, actual: usize },
    #[error("missing attached sync marker")]
    BadSync,
    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AocsRecord {
    pub chain: u8,
    pub mode: u8,
    pub prev_mode: u8,
    pub valid: u8,
    pub rotation: [f32; 3],
    pub rates: [f32; 3],
    pub sun_angle: f32,
    pub nadir_angle: f32,
    pub damp: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TtcRecord {
    pub chain: u8,
    pub obc: u8,
    pub mode: u8,
    pub s_antenna: u8,
    pub x_antenna: u8,
    pub snr_ul: f32,
    pub state_ul: u8,
    pub state_dl: u8,
    pub coherent: bool,
    pub tx_status: u8,
    pub ranging: bool,
    pub ping_ack: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpsRecord {
    pub chain: u8,
    pub net_power: f32,
    pub sol_array: [u8; 2],
    pub battery_dod: f32,
    pub temperature: f32,
    pub pcdu: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DhsRecord {
    pub chain: u8,
    pub obsw_mode: u8,
    pub mem_dump_enabled: bool,
    pub memory: f32,
    pub tm_counter: u32,
    pub tc_counter: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadRecord {
    pub gps_status: u8,
    pub camera_status: u8,
    pub sdr_status: u8,
    pub gps_pos: [f32; 3],
}

/// Raw wire content of one telemetry frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub ts: f64,
    pub aocs: AocsRecord,
    pub ttc: TtcRecord,
    pub eps: EpsRecord,
    pub dhs: DhsRecord,
    pub pl: PayloadRecord,
}

fn f32x3(v: [f64; 3]) -> [f32; 3] {
    v.map(|x| x as f32)
}

impl From<&SpacecraftState> for TelemetryRecord {
    fn from(sc: &SpacecraftState) -> Self {
        Self {
            ts: sc.ts,
            aocs: AocsRecord {
                chain: sc.aocs.chain.ordinal(),
                mode: sc.aocs.mode.ordinal(),
                prev_mode: sc.aocs.prev_mode.ordinal(),
                valid: sc.aocs.valid.ordinal(),
                rotation: f32x3(sc.aocs.rotation),
                rates: f32x3(sc.aocs.rates),
                sun_angle: sc.aocs.sun_angle as f32,
                nadir_angle: sc.aocs.nadir_angle as f32,
                damp: sc.aocs.damp as f32,
            },
            ttc: TtcRecord {
                chain: sc.ttc.chain.ordinal(),
                obc: sc.ttc.obc.ordinal(),
                mode: sc.ttc.mode.ordinal(),
                s_antenna: sc.ttc.s_antenna.ordinal(),
                x_antenna: sc.ttc.x_antenna.ordinal(),
                snr_ul: sc.ttc.snr_ul as f32,
                state_ul: sc.ttc.state_ul.ordinal(),
                state_dl: sc.ttc.state_dl.ordinal(),
                coherent: sc.ttc.coherent,
                tx_status: sc.ttc.tx_status.ordinal(),
                ranging: sc.ttc.ranging.is_enabled(),
                ping_ack: sc.ttc.ping_ack,
            },
            eps: EpsRecord {
                chain: sc.eps.chain.ordinal(),
                net_power: sc.eps.net_power as f32,
                sol_array: sc.eps.sol_array.map(SolarArrayStatus::ordinal),
                battery_dod: sc.eps.battery_dod as f32,
                temperature: sc.eps.temperature as f32,
                pcdu: sc.eps.pcdu.ordinal(),
            },
            dhs: DhsRecord {
                chain: sc.dhs.chain.ordinal(),
                obsw_mode: sc.dhs.obsw_mode.ordinal(),
                mem_dump_enabled: sc.dhs.mem_dump_enabled,
                memory: sc.dhs.memory as f32,
                tm_counter: sc.dhs.tm_counter,
                tc_counter: sc.dhs.tc_counter,
            },
            pl: PayloadRecord {
                gps_status: sc.pl.gps_status.ordinal(),
                camera_status: sc.pl.camera_status.ordinal(),
                sdr_status: sc.pl.sdr_status.ordinal(),
                gps_pos: f32x3(sc.pl.gps_pos),
            },
        }
    }
}

impl TelemetryRecord {
    /// Copy carrying only the timestamp and the transponder fields, as sent
    /// when the link is too weak for full frames.
    pub fn scrubbed(&self) -> Self {
        Self {
            ts: self.ts,
            ttc: self.ttc,
            ..Self::default()
        }
    }
}

struct FrameWriter {
    frame: Frame,
    pos: usize,
}

impl FrameWriter {
    fn new() -> Self {
        Self { frame: [0; FRAME_LEN], pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.frame[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    fn bool(&mut self, v: bool) {
        self.u8(u8::from(v));
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_be_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.put(&v.to_be_bytes());
    }

    fn f32s(&mut self, vs: &[f32]) {
        for v in vs {
            self.f32(*v);
        }
    }

    fn finish(self) -> Frame {
        debug_assert_eq!(self.pos, FRAME_LEN);
        self.frame
    }
}

struct FrameReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let truncated = CodecError::Length { expected: FRAME_LEN, actual: self.bytes.len() };
        let chunk = self.bytes.get(self.pos..self.pos + N).ok_or_else(|| truncated.clone())?;
        self.pos += N;
        chunk.try_into().map_err(|_| truncated)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take::<1>()?[0])
    }

    fn bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.u8()? != 0)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_be_bytes(self.take()?))
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_be_bytes(self.take()?))
    }

    fn f32x3(&mut self) -> Result<[f32; 3], CodecError> {
        Ok([self.f32()?, self.f32()?, self.f32()?])
    }
}

/// Encoder and decoder for [`TelemetryRecord`] frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketCodec;

impl PacketCodec {
    pub fn encode(&self, record: &TelemetryRecord) -> Frame {
        let mut w = FrameWriter::new();
        w.put(&ASM);
        w.u8(FRAME_VERSION);
        w.put(&record.ts.to_be_bytes());

        let a = &record.aocs;
        w.put(&[a.chain, a.mode, a.prev_mode, a.valid]);
        w.f32s(&a.rotation);
        w.f32s(&a.rates);
        w.f32s(&[a.sun_angle, a.nadir_angle, a.damp]);

        let t = &record.ttc;
        w.put(&[t.chain, t.obc, t.mode, t.s_antenna, t.x_antenna]);
        w.f32(t.snr_ul);
        w.put(&[t.state_ul, t.state_dl]);
        w.bool(t.coherent);
        w.u8(t.tx_status);
        w.bool(t.ranging);
        w.u32(t.ping_ack);

        let e = &record.eps;
        w.u8(e.chain);
        w.f32(e.net_power);
        w.put(&e.sol_array);
        w.f32s(&[e.battery_dod, e.temperature]);
        w.u8(e.pcdu);

        let d = &record.dhs;
        w.put(&[d.chain, d.obsw_mode]);
        w.bool(d.mem_dump_enabled);
        w.f32(d.memory);
        w.u32(d.tm_counter);
        w.u32(d.tc_counter);

        let p = &record.pl;
        w.put(&[p.gps_status, p.camera_status, p.sdr_status]);
        w.f32s(&p.gps_pos);

        w.finish()
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<TelemetryRecord, CodecError> {
        if bytes.len() != FRAME_LEN {
            return Err(CodecError::Length { expected: FRAME_LEN, actual: bytes.len() });
        }
        let mut r = FrameReader { bytes, pos: 0 };
        if r.take::<4>()? != ASM {
            return Err(CodecError::BadSync);
        }
        let version = r.u8()?;
        if version != FRAME_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let ts = r.f64()?;

        let aocs = AocsRecord {
            chain: r.u8()?,
            mode: r.u8()?,
            prev_mode: r.u8()?,
            valid: r.u8()?,
            rotation: r.f32x3()?,
            rates: r.f32x3()?,
            sun_angle: r.f32()?,
            nadir_angle: r.f32()?,
            damp: r.f32()?,
        };
        let ttc = TtcRecord {
            chain: r.u8()?,
            obc: r.u8()?,
            mode: r.u8()?,
            s_antenna: r.u8()?,
            x_antenna: r.u8()?,
            snr_ul: r.f32()?,
            state_ul: r.u8()?,
            state_dl: r.u8()?,
            coherent: r.bool()?,
            tx_status: r.u8()?,
            ranging: r.bool()?,
            ping_ack: r.u32()?,
        };
        let eps = EpsRecord {
            chain: r.u8()?,
            net_power: r.f32()?,
            sol_array: r.take()?,
            battery_dod: r.f32()?,
            temperature: r.f32()?,
            pcdu: r.u8()?,
        };
        let dhs = DhsRecord {
            chain: r.u8()?,
            obsw_mode: r.u8()?,
            mem_dump_enabled: r.bool()?,
            memory: r.f32()?,
            tm_counter: r.u32()?,
            tc_counter: r.u32()?,
        };
        let pl = PayloadRecord {
            gps_status: r.u8()?,
            camera_status: r.u8()?,
            sdr_status: r.u8()?,
            gps_pos: r.f32x3()?,
        };
        debug_assert_eq!(r.pos, FRAME_LEN);

        Ok(TelemetryRecord { ts, aocs, ttc, eps, dhs, pl })
    }
}

/// Operator view of a record: ordinals and chains mapped back to names,
/// `null` where a field carries no valid value (as in scrubbed frames).
pub fn humanize(record: &TelemetryRecord) -> Value {
    let chain = |b: u8| Chain::from_ordinal(b).map(Chain::name);
    let on_off = |o: u8| OnOff::from_ordinal(o).map(OnOff::name);
    let pointing = |o: u8| PointingMode::from_ordinal(o).map(PointingMode::name);
    let lock = |o: u8| LockState::from_ordinal(o).map(LockState::name);
    let antenna = |o: u8| Antenna::from_ordinal(o).map(Antenna::name);
    let health = |o: u8| Health::from_ordinal(o).map(Health::name);
    let array = |o: u8| SolarArrayStatus::from_ordinal(o).map(SolarArrayStatus::name);
    let (a, t, e, d, p) = (&record.aocs, &record.ttc, &record.eps, &record.dhs, &record.pl);

    json!({
        "ts": record.ts,
        "aocs": {
            "chain": chain(a.chain),
            "mode": pointing(a.mode),
            "prev_mode": pointing(a.prev_mode),
            "valid": AocsValidity::from_ordinal(a.valid).map(AocsValidity::name),
            "rotation": a.rotation,
            "rates": a.rates,
            "sun_angle": a.sun_angle,
            "nadir_angle": a.nadir_angle,
            "damp": a.damp,
        },
        "ttc": {
            "chain": chain(t.chain),
            "obc": health(t.obc),
            "mode": RfMode::from_ordinal(t.mode).map(RfMode::name),
            "s_antenna": antenna(t.s_antenna),
            "x_antenna": antenna(t.x_antenna),
            "snr_ul": t.snr_ul,
            "state_ul": lock(t.state_ul),
            "state_dl": lock(t.state_dl),
            "coherent": t.coherent,
            "tx_status": on_off(t.tx_status),
            "ranging": Enablement::from(t.ranging).name(),
            "ping_ack": t.ping_ack,
        },
        "eps": {
            "chain": chain(e.chain),
            "net_power": e.net_power,
            "sol_array": [array(e.sol_array[0]), array(e.sol_array[1])],
            "battery_dod": e.battery_dod,
            "temperature": e.temperature,
            "pcdu": health(e.pcdu),
        },
        "dhs": {
            "chain": chain(d.chain),
            "obsw_mode": ObswMode::from_ordinal(d.obsw_mode).map(ObswMode::name),
            "mem_dump_enabled": d.mem_dump_enabled,
            "memory": d.memory,
            "tm_counter": d.tm_counter,
            "tc_counter": d.tc_counter,
        },
        "pl": {
            "gps_status": on_off(p.gps_status),
            "camera_status": on_off(p.camera_status),
            "sdr_status": on_off(p.sdr_status),
            "gps_pos": p.gps_pos,
        },
    })
}

/// A frame as kept in the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedFrame {
    pub ts: f64,
    pub scrubbed: bool,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}
