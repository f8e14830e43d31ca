//! Physics, WGS84, and 3GPP constants shared by every stage of the link
//! pipeline.
//!
//! Single source of truth: no other crate in this workspace is allowed to
//! redefine the speed of light, the WGS84 ellipsoid, or the 3GPP signal
//! clamp ranges. CODATA values are the 2018/2019 redefinitions.

/// Speed of light in vacuum (m/s), exact by SI definition.
pub const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

/// Boltzmann constant (J/K), exact by the 2019 SI redefinition.
pub const BOLTZMANN_CONSTANT_J_K: f64 = 1.380649e-23;

/// WGS84 semi-major axis (m). NIMA TR8350.2.
pub const WGS84_SEMI_MAJOR_AXIS_M: f64 = 6_378_137.0;

/// WGS84 flattening. NIMA TR8350.2.
pub const WGS84_FLATTENING: f64 = 1.0 / 298.257223563;

/// WGS84 semi-major axis in kilometers, the unit most of this pipeline
/// operates in.
pub const WGS84_SEMI_MAJOR_AXIS_KM: f64 = WGS84_SEMI_MAJOR_AXIS_M / 1000.0;

/// Mean Earth radius (km), used only by the spherical-earth geometric
/// pre-filter (C4) — never by the ellipsoidal geodetic conversions in C5/C7.
pub const EARTH_MEAN_RADIUS_KM: f64 = 6371.0;

/// Earth's gravitational parameter GM (km^3/s^2), WGS84.
pub const EARTH_GM_KM3_S2: f64 = 398_600.4418;

/// Earth's mean angular rotation rate (rad/s), used for simplified GMST
/// sidereal-rate calculations outside the full IAU reduction.
pub const EARTH_ROTATION_RATE_RAD_S: f64 = 7.292_115_9e-5;

/// WGS84 first eccentricity squared, derived from flattening: e^2 = 2f - f^2.
pub fn wgs84_eccentricity_squared() -> f64 {
    2.0 * WGS84_FLATTENING - WGS84_FLATTENING * WGS84_FLATTENING
}

/// LEO altitude band (km), spec.md's definition of "LEO" for this pipeline.
pub const LEO_ALTITUDE_MIN_KM: f64 = 200.0;
pub const LEO_ALTITUDE_MAX_KM: f64 = 2000.0;

/// Valid LEO mean-motion band (rev/day) used to sanity-check parsed TLEs.
pub const LEO_MEAN_MOTION_MIN_REV_DAY: f64 = 11.0;
pub const LEO_MEAN_MOTION_MAX_REV_DAY: f64 = 20.0;

/// Valid LEO orbital speed band (km/s) used to sanity-check propagated state.
pub const LEO_SPEED_MIN_KM_S: f64 = 6.5;
pub const LEO_SPEED_MAX_KM_S: f64 = 8.5;

/// Valid LEO orbital radius band (km, geocentric) used to sanity-check
/// propagated state.
pub const LEO_RADIUS_MIN_KM: f64 = 6.57e3;
pub const LEO_RADIUS_MAX_KM: f64 = 8.4e3;

/// 3GPP TS 38.215 clamp ranges.
pub const RSRP_MIN_DBM: f64 = -140.0;
pub const RSRP_MAX_DBM: f64 = -44.0;
pub const RSRQ_MIN_DB: f64 = -34.0;
pub const RSRQ_MAX_DB: f64 = 2.5;
pub const SINR_MIN_DB: f64 = -23.0;
pub const SINR_MAX_DB: f64 = 40.0;

/// ITU-R S.1503-3 measured-median interference-to-signal ratio used by the
/// 3GPP signal core's interference model.
pub const INTERFERENCE_TO_SIGNAL_RATIO_DB: f64 = -15.0;

/// Sentinel "blocked by Earth" attenuation (dB) returned by the atmospheric
/// model for negative elevation, per spec.md §4.6.
pub const ATMOSPHERIC_BLOCKED_SENTINEL_DB: f64 = 999.0;

/// A constellation's minimum elevation threshold and rough orbital
/// parameters, as fixed by spec.md §4.5 — not configurable ad hoc.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstellationProfile {
    pub min_elevation_deg: f64,
    pub target_sats_in_view: (u32, u32),
    pub orbital_period_min: (f64, f64),
}

/// Known satellite constellations. `Other` carries the default profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constellation {
    Starlink,
    OneWeb,
    Other,
}

impl Constellation {
    pub fn profile(self) -> ConstellationProfile {
        match self {
            Constellation::Starlink => ConstellationProfile {
                min_elevation_deg: 5.0,
                target_sats_in_view: (10, 15),
                orbital_period_min: (90.0, 95.0),
            },
            Constellation::OneWeb => ConstellationProfile {
                min_elevation_deg: 10.0,
                target_sats_in_view: (3, 6),
                orbital_period_min: (109.0, 115.0),
            },
            Constellation::Other => ConstellationProfile {
                min_elevation_deg: 10.0,
                target_sats_in_view: (5, 10),
                orbital_period_min: (90.0, 120.0),
            },
        }
    }

    pub fn min_elevation_deg(self) -> f64 {
        self.profile().min_elevation_deg
    }
}
