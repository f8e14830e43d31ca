//! Stage S4: topocentric visibility geometry and link-feasibility windows.
//!
//! Converts a ground station plus a satellite's WGS84/ECEF trajectory into
//! elevation/azimuth/range time series, decides per-sample connectability
//! against the satellite's constellation threshold, and segments the
//! resulting boolean series into contiguous visibility windows.

use chrono::{DateTime, Utc};
use frame_transform::TransformedState;
use physics_constants::{wgs84_eccentricity_squared, Constellation, WGS84_SEMI_MAJOR_AXIS_KM};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Minimum window duration (minutes) for a visibility window to be reported
/// as link-feasible, per spec.md §4.9.
pub const MIN_WINDOW_DURATION_MIN: f64 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundStation {
    pub id: String,
    pub name: String,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_km: f64,
}

impl GroundStation {
    pub fn ecef_km(&self) -> [f64; 3] {
        let lat = self.lat_deg.to_radians();
        let lon = self.lon_deg.to_radians();
        let e2 = wgs84_eccentricity_squared();
        let n = WGS84_SEMI_MAJOR_AXIS_KM / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        [
            (n + self.alt_km) * lat.cos() * lon.cos(),
            (n + self.alt_km) * lat.cos() * lon.sin(),
            (n * (1.0 - e2) + self.alt_km) * lat.sin(),
        ]
    }
}

/// One topocentric geometry sample: elevation, azimuth, and slant range at a
/// single instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TopoGeometry {
    pub timestamp: DateTime<Utc>,
    pub elevation_deg: f64,
    pub azimuth_deg: f64,
    pub slant_range_km: f64,
    pub is_connectable: bool,
}

/// Compute elevation/azimuth/range of `state` as seen from `station`, via a
/// South-East-Zenith (SEZ) topocentric rotation, and decide connectability
/// against `constellation`'s minimum-elevation threshold.
pub fn compute_topo_geometry(
    station: &GroundStation,
    state: &TransformedState,
    constellation: Constellation,
) -> TopoGeometry {
    let station_ecef = station.ecef_km();
    let dx = state.ecef_km[0] - station_ecef[0];
    let dy = state.ecef_km[1] - station_ecef[1];
    let dz = state.ecef_km[2] - station_ecef[2];

    let lat = station.lat_deg.to_radians();
    let lon = station.lon_deg.to_radians();

    let s = lat.sin() * lon.cos() * dx + lat.sin() * lon.sin() * dy - lat.cos() * dz;
    let e = -lon.sin() * dx + lon.cos() * dy;
    let z = lat.cos() * lon.cos() * dx + lat.cos() * lon.sin() * dy + lat.sin() * dz;

    let range = (s * s + e * e + z * z).sqrt();
    let elevation_deg = (z / range).clamp(-1.0, 1.0).asin().to_degrees();
    let azimuth_deg = e.atan2(-s).to_degrees().rem_euclid(360.0);

    TopoGeometry {
        timestamp: state.timestamp,
        elevation_deg,
        azimuth_deg,
        slant_range_km: range,
        is_connectable: is_connectable(elevation_deg, constellation),
    }
}

/// Is this elevation sufficient to connect, for the given constellation's
/// minimum-elevation threshold?
pub fn is_connectable(elevation_deg: f64, constellation: Constellation) -> bool {
    elevation_deg >= constellation.min_elevation_deg()
}

/// A contiguous span during which a satellite was connectable from a
/// station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibilityWindow {
    pub station_id: String,
    pub satellite_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_min: f64,
    pub max_elevation_deg: f64,
}

/// Segment a per-sample geometry series into visibility windows, keeping
/// only windows at least `min_duration_min` long. Samples must be in
/// chronological order.
pub fn segment_visibility_windows(
    station_id: &str,
    satellite_id: &str,
    samples: &[TopoGeometry],
    min_duration_min: f64,
) -> Vec<VisibilityWindow> {
    let mut windows = Vec::new();
    let mut current: Option<(usize, f64)> = None; // (start_index, max_elevation_deg)

    for (i, sample) in samples.iter().enumerate() {
        match (&mut current, sample.is_connectable) {
            (None, true) => current = Some((i, sample.elevation_deg)),
            (Some((_, max_elev)), true) => {
                if sample.elevation_deg > *max_elev {
                    *max_elev = sample.elevation_deg;
                }
            }
            (Some((start_idx, max_elev)), false) => {
                close_window(
                    station_id,
                    satellite_id,
                    samples,
                    *start_idx,
                    i - 1,
                    *max_elev,
                    min_duration_min,
                    &mut windows,
                );
                current = None;
            }
            (None, false) => {}
        }
    }

    if let Some((start_idx, max_elev)) = current {
        close_window(
            station_id,
            satellite_id,
            samples,
            start_idx,
            samples.len() - 1,
            max_elev,
            min_duration_min,
            &mut windows,
        );
    }

    windows
}

fn close_window(
    station_id: &str,
    satellite_id: &str,
    samples: &[TopoGeometry],
    start_idx: usize,
    end_idx: usize,
    max_elevation_deg: f64,
    min_duration_min: f64,
    windows: &mut Vec<VisibilityWindow>,
) {
    let start = samples[start_idx].timestamp;
    let end = samples[end_idx].timestamp;
    let duration_min = (end - start).num_milliseconds() as f64 / 60_000.0;
    if duration_min >= min_duration_min {
        windows.push(VisibilityWindow {
            station_id: station_id.to_string(),
            satellite_id: satellite_id.to_string(),
            start,
            end,
            duration_min,
            max_elevation_deg,
        });
    } else {
        debug!(
            station_id,
            satellite_id, duration_min, min_duration_min, "dropping visibility window shorter than the minimum duration"
        );
    }
}

/// A satellite's full S4 output against one ground station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S4Satellite {
    pub satellite_id: String,
    pub constellation: Constellation,
    pub station_id: String,
    pub geometry: Vec<TopoGeometry>,
    pub windows: Vec<VisibilityWindow>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn station() -> GroundStation {
        GroundStation {
            id: "station-a".into(),
            name: "Station A".into(),
            lat_deg: 0.0,
            lon_deg: 0.0,
            alt_km: 0.0,
        }
    }

    fn overhead_state(t: DateTime<Utc>, altitude_km: f64) -> TransformedState {
        TransformedState {
            timestamp: t,
            icrs_km: [0.0, 0.0, 0.0],
            ecef_km: [WGS84_SEMI_MAJOR_AXIS_KM + altitude_km, 0.0, 0.0],
            velocity_ecef_km_s: [0.0, 7.5, 0.0],
            lat_deg: 0.0,
            lon_deg: 0.0,
            alt_km: altitude_km,
            accuracy_estimate_m: 0.5,
        }
    }

    #[test]
    fn overhead_satellite_has_90_degree_elevation() {
        let t = Utc::now();
        let geometry = compute_topo_geometry(&station(), &overhead_state(t, 550.0), Constellation::Other);
        assert!((geometry.elevation_deg - 90.0).abs() < 1e-6);
        assert!(geometry.is_connectable);
    }

    #[test]
    fn is_connectable_uses_constellation_threshold() {
        assert!(is_connectable(6.0, Constellation::Starlink));
        assert!(!is_connectable(6.0, Constellation::OneWeb));
    }

    #[test]
    fn segments_a_single_contiguous_window() {
        let t0 = Utc::now();
        let samples: Vec<TopoGeometry> = (0..10)
            .map(|i| {
                let elevation_deg = if (2..8).contains(&i) { 20.0 } else { 0.0 };
                TopoGeometry {
                    timestamp: t0 + Duration::minutes(i),
                    elevation_deg,
                    azimuth_deg: 0.0,
                    slant_range_km: 1000.0,
                    is_connectable: is_connectable(elevation_deg, Constellation::Other),
                }
            })
            .collect();

        let windows = segment_visibility_windows(
            "station-a",
            "sat-1",
            &samples,
            MIN_WINDOW_DURATION_MIN,
        );
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].duration_min, 5.0);
        assert_eq!(windows[0].max_elevation_deg, 20.0);
    }

    #[test]
    fn drops_windows_shorter_than_minimum_duration() {
        let t0 = Utc::now();
        let samples: Vec<TopoGeometry> = (0..3)
            .map(|i| {
                let elevation_deg = if i == 1 { 20.0 } else { 0.0 };
                TopoGeometry {
                    timestamp: t0 + Duration::seconds(i * 30),
                    elevation_deg,
                    azimuth_deg: 0.0,
                    slant_range_km: 1000.0,
                    is_connectable: is_connectable(elevation_deg, Constellation::Other),
                }
            })
            .collect();

        let windows = segment_visibility_windows(
            "station-a",
            "sat-1",
            &samples,
            MIN_WINDOW_DURATION_MIN,
        );
        assert!(windows.is_empty());
    }
}
