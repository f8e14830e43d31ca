//! IERS Earth Orientation Parameter (EOP) provider.
//!
//! Loads a table of daily IERS Bulletin A records (polar motion, UT1-UTC,
//! nutation corrections) and interpolates it for an arbitrary UTC instant.
//! Loading the table from a file is an external concern (spec.md §1); this
//! crate only owns the in-memory table and its interpolation/horizon logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum EopError {
    #[error("EOP table is empty")]
    EmptyTable,
    #[error("EOP table is not sorted by MJD")]
    Unsorted,
    #[error("requested time {0} is outside the IERS cache horizon [{1}, {2}]")]
    HorizonExceeded(DateTime<Utc>, DateTime<Utc>, DateTime<Utc>),
}

pub type Result<T> = std::result::Result<T, EopError>;

/// One daily IERS Bulletin A record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EopRecord {
    /// Modified Julian Date of the record (0h UTC).
    pub mjd: f64,
    /// Polar motion x (arcsec).
    pub xp_arcsec: f64,
    /// Polar motion y (arcsec).
    pub yp_arcsec: f64,
    /// UT1 - UTC (s).
    pub ut1_minus_utc_s: f64,
    /// Nutation correction to longitude, dPsi (arcsec).
    pub dpsi_arcsec: f64,
    /// Nutation correction to obliquity, dEps (arcsec).
    pub deps_arcsec: f64,
}

/// Earth orientation parameters interpolated for a specific UTC instant,
/// matching spec.md's `EarthOrientation` entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EarthOrientation {
    pub utc: DateTime<Utc>,
    pub xp_arcsec: f64,
    pub yp_arcsec: f64,
    pub ut1_minus_utc_s: f64,
    pub dpsi_arcsec: f64,
    pub deps_arcsec: f64,
}

const UNIX_EPOCH_MJD: f64 = 40_587.0;

fn datetime_to_mjd(t: DateTime<Utc>) -> f64 {
    UNIX_EPOCH_MJD + t.timestamp() as f64 / 86_400.0
        + t.timestamp_subsec_nanos() as f64 / 86_400.0e9
}

fn mjd_to_datetime(mjd: f64) -> DateTime<Utc> {
    let unix_seconds = (mjd - UNIX_EPOCH_MJD) * 86_400.0;
    DateTime::<Utc>::from_timestamp(
        unix_seconds.floor() as i64,
        ((unix_seconds.fract()) * 1e9) as u32,
    )
    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// An immutable-after-init EOP table, safe to share across worker threads
/// without locking (spec.md §5).
#[derive(Debug, Clone)]
pub struct EarthOrientationTable {
    records: Vec<EopRecord>,
}

impl EarthOrientationTable {
    /// Build a table from daily records. Records must already be sorted by
    /// `mjd` ascending; this is a structural precondition of the IERS
    /// Bulletin A format, not something this crate silently re-sorts.
    pub fn new(records: Vec<EopRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(EopError::EmptyTable);
        }
        if !records.windows(2).all(|w| w[0].mjd < w[1].mjd) {
            return Err(EopError::Unsorted);
        }
        debug!(
            record_count = records.len(),
            first_mjd = records.first().unwrap().mjd,
            last_mjd = records.last().unwrap().mjd,
            "loaded earth orientation parameter table"
        );
        Ok(Self { records })
    }

    /// The inclusive UTC horizon this table can serve.
    pub fn horizon(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            mjd_to_datetime(self.records.first().unwrap().mjd),
            mjd_to_datetime(self.records.last().unwrap().mjd),
        )
    }

    /// Interpolate EOP for `utc`, linearly between the two bracketing daily
    /// records. Fails fast (no extrapolation, no defaulting) when `utc`
    /// falls outside the published horizon — spec.md §4.3's hard
    /// requirement.
    pub fn at(&self, utc: DateTime<Utc>) -> Result<EarthOrientation> {
        let mjd = datetime_to_mjd(utc);
        let (lo, hi) = self.horizon();
        if utc < lo || utc > hi {
            return Err(EopError::HorizonExceeded(utc, lo, hi));
        }

        let idx = match self
            .records
            .binary_search_by(|r| r.mjd.partial_cmp(&mjd).unwrap())
        {
            Ok(i) => i,
            Err(i) => i,
        };

        let (a, b) = if idx == 0 {
            (self.records[0], self.records[0])
        } else if idx >= self.records.len() {
            let last = self.records[self.records.len() - 1];
            (last, last)
        } else {
            (self.records[idx - 1], self.records[idx])
        };

        let frac = if (b.mjd - a.mjd).abs() < f64::EPSILON {
            0.0
        } else {
            ((mjd - a.mjd) / (b.mjd - a.mjd)).clamp(0.0, 1.0)
        };

        let lerp = |x: f64, y: f64| x + (y - x) * frac;

        Ok(EarthOrientation {
            utc,
            xp_arcsec: lerp(a.xp_arcsec, b.xp_arcsec),
            yp_arcsec: lerp(a.yp_arcsec, b.yp_arcsec),
            ut1_minus_utc_s: lerp(a.ut1_minus_utc_s, b.ut1_minus_utc_s),
            dpsi_arcsec: lerp(a.dpsi_arcsec, b.dpsi_arcsec),
            deps_arcsec: lerp(a.deps_arcsec, b.deps_arcsec),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_table() -> EarthOrientationTable {
        EarthOrientationTable::new(vec![
            EopRecord {
                mjd: 60000.0,
                xp_arcsec: 0.1,
                yp_arcsec: 0.2,
                ut1_minus_utc_s: -0.05,
                dpsi_arcsec: 0.001,
                deps_arcsec: 0.002,
            },
            EopRecord {
                mjd: 60001.0,
                xp_arcsec: 0.2,
                yp_arcsec: 0.3,
                ut1_minus_utc_s: -0.06,
                dpsi_arcsec: 0.002,
                deps_arcsec: 0.003,
            },
        ])
        .unwrap()
    }

    #[test]
    fn interpolates_midpoint() {
        let table = sample_table();
        let mid = mjd_to_datetime(60000.5);
        let eop = table.at(mid).unwrap();
        assert!((eop.xp_arcsec - 0.15).abs() < 1e-6);
        assert!((eop.ut1_minus_utc_s - (-0.055)).abs() < 1e-6);
    }

    #[test]
    fn rejects_time_outside_horizon() {
        let table = sample_table();
        let too_late = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            table.at(too_late),
            Err(EopError::HorizonExceeded(..))
        ));
    }

    #[test]
    fn rejects_empty_table() {
        assert!(matches!(
            EarthOrientationTable::new(vec![]),
            Err(EopError::EmptyTable)
        ));
    }

    #[test]
    fn rejects_unsorted_table() {
        let records = vec![
            EopRecord {
                mjd: 60001.0,
                xp_arcsec: 0.0,
                yp_arcsec: 0.0,
                ut1_minus_utc_s: 0.0,
                dpsi_arcsec: 0.0,
                deps_arcsec: 0.0,
            },
            EopRecord {
                mjd: 60000.0,
                xp_arcsec: 0.0,
                yp_arcsec: 0.0,
                ut1_minus_utc_s: 0.0,
                dpsi_arcsec: 0.0,
                deps_arcsec: 0.0,
            },
        ];
        assert!(matches!(
            EarthOrientationTable::new(records),
            Err(EopError::Unsorted)
        ));
    }

    #[test]
    fn mjd_roundtrip() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mjd = datetime_to_mjd(t);
        let back = mjd_to_datetime(mjd);
        assert!((back.timestamp() - t.timestamp()).abs() <= 1);
    }
}
