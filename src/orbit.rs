//! SGP4-backed geometry provider.

use crate::geometry::{
    Geodetic, GeometryError, LookAngles, Observation, OrbitGeometryProvider, PassWindow,
};
use chrono::{DateTime, NaiveTime, Utc};
use nalgebra::Vector3;
use tracing::debug;

const EARTH_RADIUS_KM: f64 = 6378.137;
const EARTH_FLATTENING: f64 = 1.0 / 298.257_223_563;
const AU_KM: f64 = 149_597_870.7;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const J2000_JD: f64 = 2_451_545.0;

const PASS_SCAN_STEP_S: f64 = 30.0;
const PASS_REFINE_TOLERANCE_S: f64 = 1.0;

/// Ground station location, degrees and metres as scenarios state them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
}

pub struct Sgp4Geometry {
    constants: sgp4::Constants,
    epoch: DateTime<Utc>,
    site: Site,
    site_ecef: Vector3<f64>,
    passes: Vec<PassWindow>,
}

impl std::fmt::Debug for Sgp4Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sgp4Geometry")
            .field("epoch", &self.epoch)
            .field("site", &self.site)
            .field("passes", &self.passes.len())
            .finish()
    }
}

impl Sgp4Geometry {
    /// Build from a two or three line element set and precompute the
    /// visibility windows for every full day touched by `[begin, end]`.
    pub fn new(
        tle: &str,
        site: Site,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, GeometryError> {
        let lines: Vec<&str> = tle
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let (line1, line2) = match lines.as_slice() {
            [_, l1, l2] | [l1, l2] => (*l1, *l2),
            _ => {
                return Err(GeometryError::InvalidElements(format!(
                    "expected 2 or 3 lines, got {}",
                    lines.len()
                )))
            }
        };

        let elements = sgp4::Elements::from_tle(None, line1.as_bytes(), line2.as_bytes())
            .map_err(|e| GeometryError::InvalidElements(format!("{:?}", e)))?;
        let constants = sgp4::Constants::from_elements(&elements)
            .map_err(|e| GeometryError::Propagation(format!("{:?}", e)))?;
        let epoch = DateTime::<Utc>::from_naive_utc_and_offset(elements.datetime, Utc);

        let mut geometry = Self {
            constants,
            epoch,
            site,
            site_ecef: geodetic_to_ecef(site.latitude, site.longitude, site.altitude_m / 1000.0),
            passes: Vec::new(),
        };

        let day_start = begin.date_naive().and_time(NaiveTime::MIN).and_utc();
        let day_end = end.date_naive().and_time(NaiveTime::MIN).and_utc() + chrono::Duration::days(1);
        geometry.passes = geometry.scan_passes(timestamp(day_start), timestamp(day_end) - 1.0)?;
        debug!("Found {} passes over site {:?}", geometry.passes.len(), geometry.site);
        Ok(geometry)
    }

    fn teme_position(&self, ts: f64) -> Result<Vector3<f64>, GeometryError> {
        let minutes = (ts - timestamp(self.epoch)) / 60.0;
        let prediction = self
            .constants
            .propagate(minutes)
            .map_err(|e| GeometryError::Propagation(format!("{:?}", e)))?;
        Ok(Vector3::from(prediction.position))
    }

    fn topocentric(&self, ts: f64) -> Result<(Vector3<f64>, Vector3<f64>), GeometryError> {
        let teme = self.teme_position(ts)?;
        let ecef = teme_to_ecef(&teme, ts);
        let enu = ecef_to_enu(&(ecef - self.site_ecef), self.site.latitude, self.site.longitude);
        Ok((teme, enu))
    }

    fn elevation(&self, ts: f64) -> Result<f64, GeometryError> {
        let (_, enu) = self.topocentric(ts)?;
        Ok(elevation_of(&enu))
    }

    fn scan_passes(&self, from: f64, to: f64) -> Result<Vec<PassWindow>, GeometryError> {
        let mut passes = Vec::new();
        let mut rise = if self.elevation(from)? >= 0.0 { Some(from) } else { None };
        let mut t = from;
        let mut above = rise.is_some();

        while t < to {
            let next = (t + PASS_SCAN_STEP_S).min(to);
            let next_above = self.elevation(next)? >= 0.0;
            if next_above != above {
                let crossing = self.refine_crossing(t, next, above)?;
                if next_above {
                    rise = Some(crossing);
                } else if let Some(start) = rise.take() {
                    passes.push(PassWindow { start, end: crossing });
                }
                above = next_above;
            }
            t = next;
        }
        if let Some(start) = rise {
            passes.push(PassWindow { start, end: to });
        }
        Ok(passes)
    }

    // Bisect between a sample on one side of the horizon and one on the other.
    fn refine_crossing(&self, mut lo: f64, mut hi: f64, lo_above: bool) -> Result<f64, GeometryError> {
        while hi - lo > PASS_REFINE_TOLERANCE_S {
            let mid = 0.5 * (lo + hi);
            if (self.elevation(mid)? >= 0.0) == lo_above {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Ok(hi)
    }
}

impl OrbitGeometryProvider for Sgp4Geometry {
    fn observe(&self, ts: f64) -> Result<Observation, GeometryError> {
        if !ts.is_finite() {
            return Err(GeometryError::InvalidTimestamp(ts));
        }
        let (teme, enu) = self.topocentric(ts)?;
        let (_, enu_later) = self.topocentric(ts + 1.0)?;
        let sun = sun_position(ts);
        let ecef = teme_to_ecef(&teme, ts);

        Ok(Observation {
            ts,
            sat_eci_km: [teme.x, teme.y, teme.z],
            sun_eci_km: [sun.x, sun.y, sun.z],
            sunlit: is_sunlit(&teme, &sun),
            sub_point: ecef_to_geodetic(&ecef),
            look: LookAngles {
                elevation: elevation_of(&enu),
                azimuth: azimuth_of(&enu),
                range_km: enu.norm(),
                range_rate_km_s: enu_later.norm() - enu.norm(),
                topocentric_km: [enu.x, enu.y, enu.z],
            },
        })
    }

    fn passes(&self) -> &[PassWindow] {
        &self.passes
    }
}

pub fn timestamp(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

fn julian_date(ts: f64) -> f64 {
    ts / 86_400.0 + UNIX_EPOCH_JD
}

/// Greenwich mean sidereal time in radians.
fn gmst(ts: f64) -> f64 {
    let d = julian_date(ts) - J2000_JD;
    let t = d / 36_525.0;
    let degrees = 280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t
        - t * t * t / 38_710_000.0;
    degrees.rem_euclid(360.0).to_radians()
}

fn teme_to_ecef(teme: &Vector3<f64>, ts: f64) -> Vector3<f64> {
    let (sin, cos) = gmst(ts).sin_cos();
    Vector3::new(
        cos * teme.x + sin * teme.y,
        -sin * teme.x + cos * teme.y,
        teme.z,
    )
}

fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, alt_km: f64) -> Vector3<f64> {
    let (lat, lon) = (lat_deg.to_radians(), lon_deg.to_radians());
    let e2 = EARTH_FLATTENING * (2.0 - EARTH_FLATTENING);
    let n = EARTH_RADIUS_KM / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    Vector3::new(
        (n + alt_km) * lat.cos() * lon.cos(),
        (n + alt_km) * lat.cos() * lon.sin(),
        (n * (1.0 - e2) + alt_km) * lat.sin(),
    )
}

fn ecef_to_geodetic(ecef: &Vector3<f64>) -> Geodetic {
    let e2 = EARTH_FLATTENING * (2.0 - EARTH_FLATTENING);
    let p = (ecef.x * ecef.x + ecef.y * ecef.y).sqrt();
    let longitude = ecef.y.atan2(ecef.x);
    let mut latitude = ecef.z.atan2(p * (1.0 - e2));
    let mut altitude = 0.0;
    for _ in 0..5 {
        let n = EARTH_RADIUS_KM / (1.0 - e2 * latitude.sin().powi(2)).sqrt();
        altitude = p / latitude.cos() - n;
        latitude = ecef.z.atan2(p * (1.0 - e2 * n / (n + altitude)));
    }
    Geodetic {
        latitude: latitude.to_degrees(),
        longitude: longitude.to_degrees(),
        altitude_km: altitude,
    }
}

fn ecef_to_enu(delta: &Vector3<f64>, lat_deg: f64, lon_deg: f64) -> Vector3<f64> {
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();
    Vector3::new(
        -sin_lon * delta.x + cos_lon * delta.y,
        -sin_lat * cos_lon * delta.x - sin_lat * sin_lon * delta.y + cos_lat * delta.z,
        cos_lat * cos_lon * delta.x + cos_lat * sin_lon * delta.y + sin_lat * delta.z,
    )
}

fn elevation_of(enu: &Vector3<f64>) -> f64 {
    (enu.z / enu.norm()).asin().to_degrees()
}

fn azimuth_of(enu: &Vector3<f64>) -> f64 {
    enu.x.atan2(enu.y).to_degrees().rem_euclid(360.0)
}

/// Low precision solar ephemeris, geocentric equatorial km.
fn sun_position(ts: f64) -> Vector3<f64> {
    let n = julian_date(ts) - J2000_JD;
    let mean_longitude = (280.460 + 0.985_647_4 * n).to_radians();
    let anomaly = (357.528 + 0.985_600_3 * n).to_radians();
    let ecliptic = mean_longitude
        + (1.915_f64.to_radians()) * anomaly.sin()
        + (0.020_f64.to_radians()) * (2.0 * anomaly).sin();
    let obliquity = (23.439 - 0.000_000_4 * n).to_radians();
    let distance = (1.000_14 - 0.016_71 * anomaly.cos() - 0.000_14 * (2.0 * anomaly).cos()) * AU_KM;
    Vector3::new(
        distance * ecliptic.cos(),
        distance * obliquity.cos() * ecliptic.sin(),
        distance * obliquity.sin() * ecliptic.sin(),
    )
}

/// Cylindrical shadow model.
fn is_sunlit(sat: &Vector3<f64>, sun: &Vector3<f64>) -> bool {
    let sun_dir = sun.normalize();
    let along = sat.dot(&sun_dir);
    if along >= 0.0 {
        return true;
    }
    (sat - sun_dir * along).norm() > EARTH_RADIUS_KM
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ISS_TLE: &str = "ISS (ZARYA)
1 25544U 98067A   20194.88612269 -.00002218  00000-0 -31515-4 0  9992
2 25544  51.6461 221.2784 0001413  89.1723 280.4612 15.49507896236008";

    fn darmstadt() -> Site {
        Site { latitude: 49.87, longitude: 8.62, altitude_m: 144.0 }
    }

    #[test]
    fn propagates_and_finds_passes() {
        let begin = Utc.with_ymd_and_hms(2020, 7, 13, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 7, 13, 12, 0, 0).unwrap();
        let geometry = Sgp4Geometry::new(ISS_TLE, darmstadt(), begin, end).unwrap();

        assert!(!geometry.passes().is_empty());
        for pass in geometry.passes() {
            assert!(pass.end > pass.start);
            // a LEO pass never lasts longer than a quarter of an hour
            assert!(pass.end - pass.start < 900.0);
        }

        let pass = geometry.passes()[0];
        let mid = 0.5 * (pass.start + pass.end);
        let obs = geometry.observe(mid).unwrap();
        assert!(obs.look.elevation > 0.0);
        assert!(obs.look.range_km > 300.0 && obs.look.range_km < 3000.0);
        let radius = Vector3::from(obs.sat_eci_km).norm();
        assert!(radius > 6500.0 && radius < 7000.0);
    }

    #[test]
    fn rejects_malformed_elements() {
        let begin = Utc.with_ymd_and_hms(2020, 7, 13, 0, 0, 0).unwrap();
        assert!(Sgp4Geometry::new("garbage", darmstadt(), begin, begin).is_err());
    }

    #[test]
    fn station_round_trips_through_ecef() {
        let ecef = geodetic_to_ecef(49.87, 8.62, 0.144);
        let geo = ecef_to_geodetic(&ecef);
        assert!((geo.latitude - 49.87).abs() < 1e-6);
        assert!((geo.longitude - 8.62).abs() < 1e-6);
        assert!((geo.altitude_km - 0.144).abs() < 1e-6);
    }

    #[test]
    fn shadow_behind_earth() {
        let sun = Vector3::new(AU_KM, 0.0, 0.0);
        assert!(is_sunlit(&Vector3::new(7000.0, 0.0, 0.0), &sun));
        assert!(!is_sunlit(&Vector3::new(-7000.0, 0.0, 0.0), &sun));
        assert!(is_sunlit(&Vector3::new(-7000.0, 7000.0, 0.0), &sun));
    }
}
