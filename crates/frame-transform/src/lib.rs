//! Stage S3: a cheap spherical-Earth geometric pre-filter followed by an
//! accurate TEME -> ICRS -> ITRS -> WGS84 frame transformation.
//!
//! The pre-filter (`geometric_prefilter`) exists purely to avoid running the
//! expensive precession/nutation/polar-motion chain on satellites that have
//! no chance of being visible from any candidate ground station. It uses a
//! simplified GMST and a spherical Earth; the accurate path below it is the
//! one whose output is trusted for link-feasibility decisions.
//!
//! The accurate path uses a reduced-order IAU 2006 precession polynomial and
//! the leading luni-solar term of the IAU 2000A nutation series (plus the
//! IERS `dpsi`/`deps` corrections), rather than the full ~1365-term series.
//! This is a deliberate accuracy/complexity tradeoff: the pipeline's target
//! is sub-meter position accuracy for link-budget purposes, not the
//! sub-milliarcsecond accuracy the full series buys.

use chrono::{DateTime, Utc};
use earth_orientation::EarthOrientation;
use nalgebra::{Matrix3, Vector3};
use orbital_propagation::TemeState;
use physics_constants::{wgs84_eccentricity_squared, Constellation, WGS84_FLATTENING, WGS84_SEMI_MAJOR_AXIS_KM};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("earth orientation lookup failed: {0}")]
    Eop(#[from] earth_orientation::EopError),
    #[error("Bowring iteration failed to converge for ECEF position {0:?}")]
    BowringDidNotConverge([f64; 3]),
}

pub type Result<T> = std::result::Result<T, TransformError>;

// ---------------------------------------------------------------------
// Geometric pre-filter (cheap, spherical-Earth, simplified GMST)
// ---------------------------------------------------------------------

pub const PREFILTER_MIN_ROUGH_ELEVATION_DEG: f64 = -10.0;
pub const PREFILTER_MAX_SLANT_RANGE_KM: f64 = 3000.0;
pub const PREFILTER_MIN_ALTITUDE_KM: f64 = 200.0;
pub const PREFILTER_MAX_ALTITUDE_KM: f64 = 2000.0;

/// A ground station position, reduced to what the pre-filter needs.
#[derive(Debug, Clone, Copy)]
pub struct PrefilterStation {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_km: f64,
}

fn julian_date(utc: DateTime<Utc>) -> f64 {
    2_440_587.5 + utc.timestamp() as f64 / 86_400.0
        + utc.timestamp_subsec_nanos() as f64 / 86_400.0e9
}

/// Simplified low-order GMST, accurate to a few arcseconds — sufficient for
/// a pass/reject pre-filter, never for the accurate geodetic output.
fn gmst_rough_deg(jd: f64) -> f64 {
    let t = (jd - 2_451_545.0) / 36_525.0;
    let gmst = 280.460_618_37 + 360.985_647_366_29 * (jd - 2_451_545.0) + 0.000_387_933 * t * t
        - t * t * t / 38_710_000.0;
    gmst.rem_euclid(360.0)
}

fn wgs84_ecef_km(lat_deg: f64, lon_deg: f64, alt_km: f64) -> [f64; 3] {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let e2 = wgs84_eccentricity_squared();
    let n = WGS84_SEMI_MAJOR_AXIS_KM / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    [
        (n + alt_km) * lat.cos() * lon.cos(),
        (n + alt_km) * lat.cos() * lon.sin(),
        (n * (1.0 - e2) + alt_km) * lat.sin(),
    ]
}

fn rotate_z(v: [f64; 3], angle_rad: f64) -> [f64; 3] {
    let (s, c) = angle_rad.sin_cos();
    [
        c * v[0] + s * v[1],
        -s * v[0] + c * v[1],
        v[2],
    ]
}

/// Returns true if at least one sample of `states` is visible, within the
/// pre-filter's loose thresholds, from at least one of `stations`. A
/// satellite that fails every sample against every station can be dropped
/// before paying for the accurate transform.
pub fn geometric_prefilter(states: &[TemeState], stations: &[PrefilterStation]) -> bool {
    for state in states {
        let altitude_km = state.geocentric_radius_km() - physics_constants::EARTH_MEAN_RADIUS_KM;
        if altitude_km < PREFILTER_MIN_ALTITUDE_KM || altitude_km > PREFILTER_MAX_ALTITUDE_KM {
            continue;
        }

        let jd = julian_date(state.timestamp);
        let gmst_deg = gmst_rough_deg(jd);
        let rough_ecef = rotate_z(state.position_km, gmst_deg.to_radians());

        for station in stations {
            let station_ecef = wgs84_ecef_km(station.lat_deg, station.lon_deg, station.alt_km);
            let los = [
                rough_ecef[0] - station_ecef[0],
                rough_ecef[1] - station_ecef[1],
                rough_ecef[2] - station_ecef[2],
            ];
            let slant_range_km = (los[0].powi(2) + los[1].powi(2) + los[2].powi(2)).sqrt();
            if slant_range_km > PREFILTER_MAX_SLANT_RANGE_KM || slant_range_km < 1e-6 {
                continue;
            }

            let zenith_norm = (station_ecef[0].powi(2)
                + station_ecef[1].powi(2)
                + station_ecef[2].powi(2))
            .sqrt();
            let zenith = [
                station_ecef[0] / zenith_norm,
                station_ecef[1] / zenith_norm,
                station_ecef[2] / zenith_norm,
            ];
            let los_unit = [
                los[0] / slant_range_km,
                los[1] / slant_range_km,
                los[2] / slant_range_km,
            ];
            let dot = los_unit[0] * zenith[0] + los_unit[1] * zenith[1] + los_unit[2] * zenith[2];
            let rough_elevation_deg = dot.clamp(-1.0, 1.0).asin().to_degrees();

            if rough_elevation_deg >= PREFILTER_MIN_ROUGH_ELEVATION_DEG {
                return true;
            }
        }
    }
    false
}

// ---------------------------------------------------------------------
// Accurate TEME -> ICRS -> ITRS -> WGS84 chain
// ---------------------------------------------------------------------

/// Geodetic claimed accuracy of the reduced-order transform (meters),
/// per the model choice recorded in DESIGN.md.
pub const ACCURACY_ESTIMATE_M: f64 = 0.5;

const ARCSEC_TO_RAD: f64 = std::f64::consts::PI / (180.0 * 3600.0);

fn julian_centuries_j2000(utc: DateTime<Utc>) -> f64 {
    (julian_date(utc) - 2_451_545.0) / 36_525.0
}

fn rot_x(angle_rad: f64) -> Matrix3<f64> {
    let (s, c) = angle_rad.sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, s, 0.0, -s, c)
}

fn rot_y(angle_rad: f64) -> Matrix3<f64> {
    let (s, c) = angle_rad.sin_cos();
    Matrix3::new(c, 0.0, -s, 0.0, 1.0, 0.0, s, 0.0, c)
}

fn rot_z(angle_rad: f64) -> Matrix3<f64> {
    let (s, c) = angle_rad.sin_cos();
    Matrix3::new(c, s, 0.0, -s, c, 0.0, 0.0, 0.0, 1.0)
}

/// IAU 2006 precession angles (Capitaine et al. 2003), in arcseconds, as a
/// function of Julian centuries since J2000 TT. UTC is used in place of TT;
/// the few-dozen-second difference is negligible for a quantity that varies
/// by ~50 arcsec/century.
struct PrecessionAngles {
    zeta_rad: f64,
    z_rad: f64,
    theta_rad: f64,
}

fn precession_angles(t: f64) -> PrecessionAngles {
    let zeta_arcsec = 2.650_545 + 2306.083_227 * t + 0.298_849_9 * t * t + 0.018_018_28 * t.powi(3)
        - 0.000_005_971 * t.powi(4);
    let z_arcsec = -2.650_545 + 2306.077_181 * t + 1.092_734_8 * t * t + 0.018_268_37 * t.powi(3)
        - 0.000_028_596 * t.powi(4);
    let theta_arcsec =
        2004.191_903 * t - 0.429_493_4 * t * t - 0.041_822_64 * t.powi(3) - 0.000_007_089 * t.powi(4);
    PrecessionAngles {
        zeta_rad: zeta_arcsec * ARCSEC_TO_RAD,
        z_rad: z_arcsec * ARCSEC_TO_RAD,
        theta_rad: theta_arcsec * ARCSEC_TO_RAD,
    }
}

fn precession_matrix(t: f64) -> Matrix3<f64> {
    let a = precession_angles(t);
    rot_z(-a.z_rad) * rot_y(a.theta_rad) * rot_z(-a.zeta_rad)
}

struct Nutation {
    dpsi_rad: f64,
    mean_obliquity_rad: f64,
    true_obliquity_rad: f64,
}

/// Leading luni-solar term of the IAU 2000A nutation series, plus the
/// IERS `dpsi`/`deps` observed corrections.
fn nutation(t: f64, eop: &EarthOrientation) -> Nutation {
    let omega_deg = (125.044_52 - 1934.136_261 * t).rem_euclid(360.0);
    let omega_rad = omega_deg.to_radians();

    let dpsi0_arcsec = -17.1996 * omega_rad.sin();
    let deps0_arcsec = 9.2025 * omega_rad.cos();

    let mean_obliquity_deg = 23.439_291 - 0.013_004_2 * t;
    let mean_obliquity_rad = mean_obliquity_deg.to_radians();

    let dpsi_arcsec = dpsi0_arcsec + eop.dpsi_arcsec;
    let deps_arcsec = deps0_arcsec + eop.deps_arcsec;

    Nutation {
        dpsi_rad: dpsi_arcsec * ARCSEC_TO_RAD,
        mean_obliquity_rad,
        true_obliquity_rad: mean_obliquity_rad + deps_arcsec * ARCSEC_TO_RAD,
    }
}

fn nutation_matrix(n: &Nutation) -> Matrix3<f64> {
    rot_x(-n.true_obliquity_rad) * rot_z(-n.dpsi_rad) * rot_x(n.mean_obliquity_rad)
}

/// IAU 1982 GMST polynomial, referenced to UT1.
fn gmst_iau1982_deg(utc: DateTime<Utc>, ut1_minus_utc_s: f64) -> f64 {
    let ut1 = utc + chrono::Duration::milliseconds((ut1_minus_utc_s * 1000.0).round() as i64);
    gmst_rough_deg(julian_date(ut1))
}

fn polar_motion_matrix(xp_arcsec: f64, yp_arcsec: f64) -> Matrix3<f64> {
    let xp = xp_arcsec * ARCSEC_TO_RAD;
    let yp = yp_arcsec * ARCSEC_TO_RAD;
    rot_y(-xp) * rot_x(-yp)
}

/// A frame-transformed state: ECEF/ITRS position and velocity plus the
/// derived WGS84 geodetic position, matching spec.md's `ItrsState` entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransformedState {
    pub timestamp: DateTime<Utc>,
    pub icrs_km: [f64; 3],
    pub ecef_km: [f64; 3],
    pub velocity_ecef_km_s: [f64; 3],
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_km: f64,
    pub accuracy_estimate_m: f64,
}

/// Convert geocentric ECEF (km) to WGS84 geodetic latitude/longitude/height
/// via Bowring's method, capped at 5 iterations / 1 mm convergence.
fn ecef_to_geodetic(ecef_km: [f64; 3]) -> Result<(f64, f64, f64)> {
    let [x, y, z] = ecef_km;
    let lon_deg = y.atan2(x).to_degrees();

    let p = (x * x + y * y).sqrt();
    let e2 = wgs84_eccentricity_squared();
    let a = WGS84_SEMI_MAJOR_AXIS_KM;
    let b = a * (1.0 - WGS84_FLATTENING);
    let ep2 = (a * a - b * b) / (b * b);

    let mut lat = z.atan2(p * (1.0 - e2));
    for _ in 0..5 {
        let sin_lat = lat.sin();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let new_lat = (z + n * e2 * sin_lat).atan2(p);
        if (new_lat - lat).abs() * a < 1.0e-6 {
            lat = new_lat;
            break;
        }
        lat = new_lat;
    }

    let sin_lat = lat.sin();
    let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let alt_km = p / lat.cos() - n;

    if !lat.is_finite() || !lon_deg.is_finite() || !alt_km.is_finite() {
        warn!(?ecef_km, "Bowring iteration produced a non-finite geodetic position");
        return Err(TransformError::BowringDidNotConverge(ecef_km));
    }

    // Quiet the unused-variable warning when ep2 isn't exercised by the
    // first-order Bowring iteration above (kept for future higher-order use).
    let _ = ep2;

    Ok((lat.to_degrees(), lon_deg, alt_km))
}

/// A satellite's full S3 output: identity carried unchanged from S2, plus
/// its transformed WGS84/ITRS time series, matching spec.md's `S3Satellite`
/// entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Satellite {
    pub satellite_id: String,
    pub constellation: Constellation,
    pub epoch: DateTime<Utc>,
    pub time_series: Vec<TransformedState>,
}

/// Transform a single TEME sample to ICRS and WGS84/ITRS using the
/// reduced-order precession/nutation model.
pub fn teme_to_wgs84(state: &TemeState, eop: &EarthOrientation) -> Result<TransformedState> {
    let t = julian_centuries_j2000(state.timestamp);

    let precession = precession_matrix(t);
    let nutation_angles = nutation(t, eop);
    let nutation_mat = nutation_matrix(&nutation_angles);

    let teme_pos = Vector3::from(state.position_km);
    let teme_vel = Vector3::from(state.velocity_km_s);

    // TEME is approximately the true-equator-of-date frame; recover ICRS by
    // undoing precession and nutation.
    let icrs = precession.transpose() * (nutation_mat.transpose() * teme_pos);

    let gmst_deg = gmst_iau1982_deg(state.timestamp, eop.ut1_minus_utc_s);
    let eqeq_rad = nutation_angles.dpsi_rad * nutation_angles.mean_obliquity_rad.cos();
    let gast_rad = gmst_deg.to_radians() + eqeq_rad;

    let earth_rotation = rot_z(gast_rad);
    let polar_motion = polar_motion_matrix(eop.xp_arcsec, eop.yp_arcsec);

    let pef_pos = earth_rotation * teme_pos;
    let itrs_pos = polar_motion * pef_pos;

    // Earth-rotation rate cross-product term for velocity (polar motion's
    // contribution to velocity is negligible at this accuracy target).
    let omega = Vector3::new(0.0, 0.0, physics_constants::EARTH_ROTATION_RATE_RAD_S);
    let pef_vel = earth_rotation * teme_vel - omega.cross(&pef_pos);
    let itrs_vel = polar_motion * pef_vel;

    let ecef_km = [itrs_pos.x, itrs_pos.y, itrs_pos.z];
    let (lat_deg, lon_deg, alt_km) = ecef_to_geodetic(ecef_km)?;

    Ok(TransformedState {
        timestamp: state.timestamp,
        icrs_km: [icrs.x, icrs.y, icrs.z],
        ecef_km,
        velocity_ecef_km_s: [itrs_vel.x, itrs_vel.y, itrs_vel.z],
        lat_deg,
        lon_deg,
        alt_km,
        accuracy_estimate_m: ACCURACY_ESTIMATE_M,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_eop(utc: DateTime<Utc>) -> EarthOrientation {
        EarthOrientation {
            utc,
            xp_arcsec: 0.05,
            yp_arcsec: 0.3,
            ut1_minus_utc_s: -0.02,
            dpsi_arcsec: 0.0,
            deps_arcsec: 0.0,
        }
    }

    #[test]
    fn bowring_roundtrips_a_known_geodetic_point() {
        let ecef = wgs84_ecef_km(37.7749, -122.4194, 0.05);
        let (lat, lon, alt) = ecef_to_geodetic(ecef).unwrap();
        assert!((lat - 37.7749).abs() < 1e-6);
        assert!((lon - (-122.4194)).abs() < 1e-6);
        assert!((alt - 0.05).abs() < 1e-6);
    }

    #[test]
    fn prefilter_accepts_satellite_overhead_of_a_station() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let station = PrefilterStation {
            lat_deg: 0.0,
            lon_deg: 0.0,
            alt_km: 0.0,
        };
        // Place a satellite directly above the equator/prime-meridian point
        // at 550 km altitude, in TEME coordinates equal to rotated ECEF at
        // GMST=0 for simplicity (jd chosen so gmst_rough_deg(jd) ~ small).
        let radius = physics_constants::EARTH_MEAN_RADIUS_KM + 550.0;
        let state = TemeState {
            timestamp: t,
            position_km: [radius, 0.0, 0.0],
            velocity_km_s: [0.0, 7.5, 0.0],
        };
        assert!(geometric_prefilter(&[state], &[station]));
    }

    #[test]
    fn prefilter_rejects_satellite_on_opposite_side_of_earth() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let station = PrefilterStation {
            lat_deg: 0.0,
            lon_deg: 0.0,
            alt_km: 0.0,
        };
        let radius = physics_constants::EARTH_MEAN_RADIUS_KM + 550.0;
        let state = TemeState {
            timestamp: t,
            position_km: [-radius, 0.0, 0.0],
            velocity_km_s: [0.0, -7.5, 0.0],
        };
        assert!(!geometric_prefilter(&[state], &[station]));
    }

    #[test]
    fn teme_to_wgs84_keeps_altitude_in_leo_band() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let eop = sample_eop(t);
        let radius = WGS84_SEMI_MAJOR_AXIS_KM + 550.0;
        let state = TemeState {
            timestamp: t,
            position_km: [radius, 0.0, 0.0],
            velocity_km_s: [0.0, 7.5, 0.0],
        };
        let transformed = teme_to_wgs84(&state, &eop).unwrap();
        assert!(transformed.alt_km > 400.0 && transformed.alt_km < 700.0);
    }
}
