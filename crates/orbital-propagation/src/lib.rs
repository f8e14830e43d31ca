//! Two-line element parsing and SGP4 propagation to TEME state vectors.
//!
//! This crate owns stage S2 of the pipeline: turning a batch of TLEs into
//! sampled `TemeState` trajectories. It does not know about ground stations,
//! frames other than TEME, or signal quality — those are later stages.

use chrono::{DateTime, Duration, Utc};
use physics_constants::Constellation;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum OrbitalError {
    #[error("TLE line {line} for {satellite_id} has malformed checksum: expected {expected}, found {found}")]
    InvalidChecksum {
        satellite_id: String,
        line: u8,
        expected: u8,
        found: u8,
    },
    #[error("TLE line {0} has unexpected length {1} (want 69)")]
    MalformedLine(u8, usize),
    #[error("TLE field for {satellite_id} could not be parsed: {field}")]
    MalformedField {
        satellite_id: String,
        field: &'static str,
    },
    #[error("TLE epoch for {satellite_id} is {age_days:.1} days old, exceeding the 30-day staleness limit")]
    EpochOutOfRange { satellite_id: String, age_days: f64 },
    #[error("sgp4 element construction failed for {satellite_id}: {source}")]
    ElementsFailed {
        satellite_id: String,
        source: sgp4::TleError,
    },
    #[error("sgp4 constants construction failed for {satellite_id}: {source}")]
    ConstantsFailed {
        satellite_id: String,
        source: sgp4::ElementsError,
    },
    #[error("sgp4 propagation failed for {satellite_id} at sample {sample_index}: {source}")]
    PropagationFailed {
        satellite_id: String,
        sample_index: usize,
        source: sgp4::Error,
    },
    #[error("{satellite_id} decayed below 150 km altitude at sample {sample_index} ({altitude_km:.1} km)")]
    Decayed {
        satellite_id: String,
        sample_index: usize,
        altitude_km: f64,
    },
}

pub type Result<T> = std::result::Result<T, OrbitalError>;

/// Maximum TLE epoch age (days) tolerated without comment.
pub const EPOCH_AGE_SILENT_DAYS: f64 = 14.0;
/// Maximum TLE epoch age (days) tolerated at all; beyond this the satellite
/// is excluded with `OrbitalError::EpochOutOfRange`.
pub const EPOCH_AGE_FAIL_DAYS: f64 = 30.0;
/// Altitude (km) below which propagated state is treated as decayed/invalid.
pub const DECAY_ALTITUDE_KM: f64 = 150.0;

fn tle_checksum(line: &str) -> u8 {
    (line
        .bytes()
        .take(68)
        .map(|b| {
            if b.is_ascii_digit() {
                (b - b'0') as u16
            } else if b == b'-' {
                1u16
            } else {
                0u16
            }
        })
        .sum::<u16>()
        % 10) as u8
}

fn validate_checksum(satellite_id: &str, line_number: u8, line: &str) -> Result<()> {
    if line.len() < 69 {
        return Err(OrbitalError::MalformedLine(line_number, line.len()));
    }
    let found = line
        .as_bytes()
        .get(68)
        .and_then(|b| (*b as char).to_digit(10))
        .ok_or(OrbitalError::MalformedLine(line_number, line.len()))? as u8;
    let expected = tle_checksum(line);
    if found != expected {
        return Err(OrbitalError::InvalidChecksum {
            satellite_id: satellite_id.to_string(),
            line: line_number,
            expected,
            found,
        });
    }
    Ok(())
}

/// A validated two-line element set, plus the constellation assignment
/// carried alongside it by the input manifest (spec.md §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TleRecord {
    pub satellite_id: String,
    pub constellation: Constellation,
    pub line1: String,
    pub line2: String,
    pub norad_id: u32,
    pub epoch: DateTime<Utc>,
    pub mean_motion_rev_day: f64,
}

impl TleRecord {
    /// Parse and checksum-validate a TLE pair. Epoch and mean motion are
    /// extracted here because later stages (dedup, staleness policy, LEO
    /// sanity checks) need them without re-parsing the raw lines.
    pub fn parse(
        satellite_id: impl Into<String>,
        constellation: Constellation,
        line1: impl Into<String>,
        line2: impl Into<String>,
    ) -> Result<Self> {
        let satellite_id = satellite_id.into();
        let line1 = line1.into();
        let line2 = line2.into();

        validate_checksum(&satellite_id, 1, &line1)?;
        validate_checksum(&satellite_id, 2, &line2)?;

        let norad_id: u32 = line1
            .get(2..7)
            .and_then(|s| s.trim().parse().ok())
            .ok_or(OrbitalError::MalformedField {
                satellite_id: satellite_id.clone(),
                field: "norad_id",
            })?;

        let epoch_year: i32 = line1
            .get(18..20)
            .and_then(|s| s.trim().parse().ok())
            .ok_or(OrbitalError::MalformedField {
                satellite_id: satellite_id.clone(),
                field: "epoch_year",
            })?;
        let epoch_day: f64 = line1
            .get(20..32)
            .and_then(|s| s.trim().parse().ok())
            .ok_or(OrbitalError::MalformedField {
                satellite_id: satellite_id.clone(),
                field: "epoch_day",
            })?;
        let full_year = if epoch_year < 57 { 2000 + epoch_year } else { 1900 + epoch_year };
        let epoch = DateTime::<Utc>::from_naive_utc_and_offset(
            chrono::NaiveDate::from_ymd_opt(full_year, 1, 1)
                .ok_or(OrbitalError::MalformedField {
                    satellite_id: satellite_id.clone(),
                    field: "epoch_year",
                })?
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            Utc,
        ) + Duration::milliseconds(((epoch_day - 1.0) * 86_400_000.0).round() as i64);

        let mean_motion_rev_day: f64 = line2
            .get(52..63)
            .and_then(|s| s.trim().parse().ok())
            .ok_or(OrbitalError::MalformedField {
                satellite_id: satellite_id.clone(),
                field: "mean_motion",
            })?;

        Ok(Self {
            satellite_id,
            constellation,
            line1,
            line2,
            norad_id,
            epoch,
            mean_motion_rev_day,
        })
    }

    fn age_days(&self, at: DateTime<Utc>) -> f64 {
        (at - self.epoch).num_milliseconds() as f64 / 86_400_000.0
    }

    fn check_staleness(&self, at: DateTime<Utc>) -> Result<()> {
        let age = self.age_days(at).abs();
        if age > EPOCH_AGE_FAIL_DAYS {
            return Err(OrbitalError::EpochOutOfRange {
                satellite_id: self.satellite_id.clone(),
                age_days: age,
            });
        }
        if age > EPOCH_AGE_SILENT_DAYS {
            warn!(
                satellite_id = %self.satellite_id,
                age_days = age,
                "TLE epoch is stale; propagation accuracy degrades beyond 14 days"
            );
        }
        Ok(())
    }
}

/// Deduplicate TLE records sharing a NORAD ID, keeping only the one with the
/// most recent epoch — an input manifest may carry overlapping catalog
/// snapshots (spec.md §5).
pub fn dedupe_latest_epoch(records: Vec<TleRecord>) -> Vec<TleRecord> {
    use std::collections::HashMap;
    let mut latest: HashMap<u32, TleRecord> = HashMap::new();
    for record in records {
        match latest.get(&record.norad_id) {
            Some(existing) if existing.epoch >= record.epoch => {}
            _ => {
                latest.insert(record.norad_id, record);
            }
        }
    }
    let mut out: Vec<TleRecord> = latest.into_values().collect();
    out.sort_by(|a, b| a.satellite_id.cmp(&b.satellite_id));
    out
}

/// One propagated TEME state sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TemeState {
    pub timestamp: DateTime<Utc>,
    pub position_km: [f64; 3],
    pub velocity_km_s: [f64; 3],
}

impl TemeState {
    pub fn geocentric_radius_km(&self) -> f64 {
        (self.position_km[0].powi(2) + self.position_km[1].powi(2) + self.position_km[2].powi(2))
            .sqrt()
    }

    pub fn speed_km_s(&self) -> f64 {
        (self.velocity_km_s[0].powi(2)
            + self.velocity_km_s[1].powi(2)
            + self.velocity_km_s[2].powi(2))
        .sqrt()
    }
}

/// A satellite's full S2 output: identity plus its sampled TEME trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S2Satellite {
    pub satellite_id: String,
    pub constellation: Constellation,
    pub norad_id: u32,
    pub tle_epoch: DateTime<Utc>,
    pub algorithm: String,
    pub states: Vec<TemeState>,
}

fn sgp4_elements(record: &TleRecord) -> Result<sgp4::Elements> {
    sgp4::Elements::from_tle(
        Some(record.satellite_id.clone()),
        record.line1.as_bytes(),
        record.line2.as_bytes(),
    )
    .map_err(|source| OrbitalError::ElementsFailed {
        satellite_id: record.satellite_id.clone(),
        source,
    })
}

/// Propagate one TLE across `sample_count` evenly spaced samples starting at
/// `start`, `cadence_s` seconds apart. Checks staleness up front and
/// decay at every sample; a decayed sample fails the whole satellite rather
/// than emitting a partial, physically meaningless trajectory.
pub fn propagate_satellite(
    record: &TleRecord,
    start: DateTime<Utc>,
    cadence_s: f64,
    sample_count: usize,
) -> Result<S2Satellite> {
    record.check_staleness(start)?;

    let elements = sgp4_elements(record)?;
    let constants = sgp4::Constants::from_elements(&elements).map_err(|source| {
        OrbitalError::ConstantsFailed {
            satellite_id: record.satellite_id.clone(),
            source,
        }
    })?;

    let mut states = Vec::with_capacity(sample_count);
    for i in 0..sample_count {
        let t = start + Duration::milliseconds((i as f64 * cadence_s * 1000.0).round() as i64);
        let minutes_since_epoch = (t - elements.datetime.and_utc()).num_milliseconds() as f64 / 60_000.0;

        let prediction = constants.propagate(sgp4::MinutesSinceEpoch(minutes_since_epoch)).map_err(
            |source| OrbitalError::PropagationFailed {
                satellite_id: record.satellite_id.clone(),
                sample_index: i,
                source,
            },
        )?;

        let state = TemeState {
            timestamp: t,
            position_km: prediction.position,
            velocity_km_s: prediction.velocity,
        };

        let altitude_km = state.geocentric_radius_km() - physics_constants::WGS84_SEMI_MAJOR_AXIS_KM;
        if altitude_km < DECAY_ALTITUDE_KM {
            return Err(OrbitalError::Decayed {
                satellite_id: record.satellite_id.clone(),
                sample_index: i,
                altitude_km,
            });
        }

        states.push(state);
    }

    Ok(S2Satellite {
        satellite_id: record.satellite_id.clone(),
        constellation: record.constellation,
        norad_id: record.norad_id,
        tle_epoch: record.epoch,
        algorithm: "SGP4".to_string(),
        states,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ISS (ZARYA), a well-known valid TLE pair used widely as a parser fixture.
    const ISS_L1: &str = "1 25544U 98067A   24079.54183502  .00016717  00000-0  30197-3 0  9994";
    const ISS_L2: &str = "2 25544  51.6405 256.4915 0005730  15.6544 107.7740 15.50377579443400";

    #[test]
    fn parses_valid_tle_and_checksum() {
        let record = TleRecord::parse("ISS", Constellation::Other, ISS_L1, ISS_L2).unwrap();
        assert_eq!(record.norad_id, 25544);
        assert!(record.mean_motion_rev_day > 15.0 && record.mean_motion_rev_day < 16.0);
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut bad = ISS_L1.to_string();
        bad.replace_range(68..69, "0");
        if bad == ISS_L1 {
            bad.replace_range(68..69, "1");
        }
        let result = TleRecord::parse("ISS", Constellation::Other, bad, ISS_L2);
        assert!(matches!(result, Err(OrbitalError::InvalidChecksum { .. })));
    }

    #[test]
    fn rejects_stale_epoch_beyond_30_days() {
        let record = TleRecord::parse("ISS", Constellation::Other, ISS_L1, ISS_L2).unwrap();
        let far_future = record.epoch + Duration::days(60);
        assert!(matches!(
            record.check_staleness(far_future),
            Err(OrbitalError::EpochOutOfRange { .. })
        ));
    }

    #[test]
    fn dedupe_keeps_latest_epoch() {
        let older = TleRecord::parse("ISS-old", Constellation::Other, ISS_L1, ISS_L2).unwrap();
        let mut newer = older.clone();
        newer.satellite_id = "ISS-new".to_string();
        newer.epoch = older.epoch + Duration::days(1);

        let result = dedupe_latest_epoch(vec![older, newer]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].satellite_id, "ISS-new");
    }

    #[test]
    fn propagates_iss_to_leo_altitude_band() {
        let record = TleRecord::parse("ISS", Constellation::Other, ISS_L1, ISS_L2).unwrap();
        let satellite =
            propagate_satellite(&record, record.epoch, 60.0, 5).expect("propagation should succeed");
        assert_eq!(satellite.states.len(), 5);
        for state in &satellite.states {
            let altitude_km = state.geocentric_radius_km() - physics_constants::WGS84_SEMI_MAJOR_AXIS_KM;
            assert!(altitude_km > physics_constants::LEO_ALTITUDE_MIN_KM - 50.0);
            assert!(altitude_km < physics_constants::LEO_ALTITUDE_MAX_KM);
        }
    }
}
