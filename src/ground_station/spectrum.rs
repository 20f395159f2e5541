//! Spectrum analyser traces for the operator displays.
//!
//! Traces are cosmetic: nothing in the engines reads them back.

use crate::model::{Band, Carrier, RfMode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

const SPECTRUM_SIZE: usize = 200;
const ANALYSER_SPAN_MHZ: f64 = 20.0;
const UPLINK_ZOOM: f64 = 16.0;
const DOWNLINK_ZOOM: f64 = 4.0;
const UPLINK_FREQ_MHZ: f64 = 2053.136;
const UPLINK_BANDWIDTH_MHZ: f64 = 0.256;
const UPLINK_MOD_INDEX: f64 = 0.5;
const DOWNLINK_MOD_INDEX: f64 = 0.7;
const NOISE_LEVEL_DB: f64 = -110.0;
const UPLINK_NOISE_FLOOR_DB: f64 = 10.0;
const UPLINK_REFERENCE_SNR_DB: f64 = 20.0;
const ROLL_OFF: f64 = 0.4;
const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;

/// One trace point: frequency in MHz, power in dB.
pub type TracePoint = [f64; 2];

#[derive(Debug)]
pub struct SpectrumGenerator {
    rng: StdRng,
}

impl SpectrumGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Trace around the uplink frequency for the given transmit power.
    pub fn uplink(&mut self, power: f64) -> Vec<TracePoint> {
        let frequencies = span(UPLINK_FREQ_MHZ, ANALYSER_SPAN_MHZ / UPLINK_ZOOM);
        let snr_scale = db_to_lin(-UPLINK_REFERENCE_SNR_DB);
        let floor_scale = db_to_lin(UPLINK_NOISE_FLOOR_DB - power);

        // telecommand uplink is always residual carrier
        let signal = pm_spectrum(
            Carrier::Res,
            UPLINK_BANDWIDTH_MHZ,
            &frequencies,
            UPLINK_FREQ_MHZ,
            UPLINK_MOD_INDEX,
        );

        frequencies
            .iter()
            .zip(signal)
            .map(|(f, s)| {
                let noise = snr_scale * self.rng.gen_range(0.0f64..0.5)
                    + floor_scale * self.rng.gen_range(0.0f64..0.2);
                [*f, power + lin_to_db(noise + s)]
            })
            .filter(|[_, p]| p.is_finite())
            .collect()
    }

    /// Trace around the turned-around downlink frequency, shifted by doppler.
    pub fn downlink(
        &mut self,
        mode: RfMode,
        snr: f64,
        doppler_km_s: Option<f64>,
        coherent: bool,
    ) -> Vec<TracePoint> {
        let nominal = UPLINK_FREQ_MHZ * turnaround_ratio(mode.band());
        let frequencies = span(nominal, ANALYSER_SPAN_MHZ / DOWNLINK_ZOOM);

        let doppler = 1.0 + doppler_km_s.unwrap_or(0.0) / SPEED_OF_LIGHT_KM_S;
        let mut centre = nominal * doppler;
        if coherent {
            // two-way shift when the transponder locks to the uplink
            centre *= doppler;
        }

        let bandwidth = downlink_bandwidth_mhz(mode);
        let shape = match mode.carrier() {
            Carrier::Sup => psk_spectrum(bandwidth, &frequencies, centre),
            carrier => pm_spectrum(carrier, bandwidth, &frequencies, centre, DOWNLINK_MOD_INDEX),
        };
        let gain = db_to_lin(snr);

        frequencies
            .iter()
            .zip(shape)
            .map(|(f, s)| {
                let noise = (1.0 + self.rng.gen_range(-0.2f64..0.2)).abs();
                [*f, lin_to_db(gain * s + noise) + NOISE_LEVEL_DB]
            })
            .filter(|[_, p]| p.is_finite())
            .collect()
    }
}

fn turnaround_ratio(band: Band) -> f64 {
    match band {
        Band::S => 240.0 / 221.0,
        Band::X => 880.0 / 221.0,
    }
}

fn downlink_bandwidth_mhz(mode: RfMode) -> f64 {
    match mode {
        RfMode::SSupLbr | RfMode::SResLbr | RfMode::SSubLbr => 1.0,
        RfMode::SSupHbr => 2.0,
        RfMode::XSupLbr | RfMode::XResLbr | RfMode::XSubLbr => 3.0,
        RfMode::XSupHbr => 4.0,
    }
}

fn span(centre: f64, width: f64) -> Vec<f64> {
    let low = centre - width / 2.0;
    let step = width / (SPECTRUM_SIZE - 1) as f64;
    (0..SPECTRUM_SIZE).map(|i| low + step * i as f64).collect()
}

fn db_to_lin(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

fn lin_to_db(lin: f64) -> f64 {
    10.0 * lin.log10()
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

// Raised cosine band for suppressed carrier PSK.
fn psk_spectrum(bandwidth: f64, frequencies: &[f64], centre: f64) -> Vec<f64> {
    let inner = bandwidth / 2.0 * (1.0 - ROLL_OFF);
    let outer = bandwidth / 2.0 * (1.0 + ROLL_OFF);
    frequencies
        .iter()
        .map(|f| {
            let offset = (f - centre).abs();
            if offset < inner {
                1.0
            } else if offset < outer {
                0.5 * (1.0 + (PI / bandwidth / ROLL_OFF * (offset - inner)).cos())
            } else {
                0.0
            }
        })
        .collect()
}

// Phase modulated carrier with data sidebands.
fn pm_spectrum(
    carrier: Carrier,
    bandwidth: f64,
    frequencies: &[f64],
    centre: f64,
    mod_index: f64,
) -> Vec<f64> {
    let (bw, offset) = match carrier {
        Carrier::Sub => (bandwidth / 16.0, 4.0),
        Carrier::Res => (bandwidth / 4.0, 1.0),
        Carrier::Sup => (bandwidth / 2.0, 0.0),
    };
    let pulse = |x: f64| sinc(x / bw) / bw;
    let density = |x: f64| {
        if offset == 0.0 {
            bw / 4.0 * pulse(x).powi(2)
        } else {
            bw / 4.0 * (pulse(x + offset * bw).powi(2) + pulse(x - offset * bw).powi(2))
        }
    };

    let carrier_bin = frequencies
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - centre).abs().total_cmp(&(*b - centre).abs()))
        .map(|(i, _)| i);

    frequencies
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let line = if Some(i) == carrier_bin {
                10.0 * mod_index.cos().powi(2)
            } else {
                1e-12
            };
            mod_index.sin().powi(2) * density(f - centre) + line
        })
        .collect()
}
