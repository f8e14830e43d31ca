//! Stage S5: Doppler shift and 3GPP TS 38.214/38.215 signal-quality
//! composition.
//!
//! Doppler follows the classical-vs-relativistic split used throughout the
//! astrodynamics literature: the classical linear approximation is accurate
//! to better than 1% for |beta| < 0.1, which covers every LEO relative
//! velocity this pipeline will see, but the relativistic form is kept for
//! inputs that exceed it rather than silently mis-modeling them.

use chrono::{DateTime, Utc};
use physics_constants::{
    Constellation, BOLTZMANN_CONSTANT_J_K, INTERFERENCE_TO_SIGNAL_RATIO_DB, RSRP_MAX_DBM,
    RSRP_MIN_DBM, RSRQ_MAX_DB, RSRQ_MIN_DB, SINR_MAX_DB, SINR_MIN_DB, SPEED_OF_LIGHT_M_S,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use visibility::TopoGeometry;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("carrier frequency must be positive, got {0} GHz")]
    NonPositiveFrequency(f64),
    #[error("bandwidth must be positive, got {0} Hz")]
    NonPositiveBandwidth(f64),
}

pub type Result<T> = std::result::Result<T, SignalError>;

// ---------------------------------------------------------------------
// Doppler
// ---------------------------------------------------------------------

/// Below this range (km), line-of-sight direction is numerically meaningless
/// and Doppler is reported as zero rather than divided by a near-zero range.
const MIN_RANGE_FOR_DOPPLER_KM: f64 = 0.001;
/// |beta| threshold below which the classical linear Doppler approximation
/// is used instead of the full relativistic formula.
const RELATIVISTIC_BETA_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DopplerResult {
    pub radial_velocity_km_s: f64,
    pub doppler_shift_hz: f64,
    pub propagation_delay_s: f64,
}

/// Compute Doppler shift and one-way propagation delay for a satellite seen
/// from an observer, given the satellite's ECEF position/velocity relative
/// to the observer and the carrier frequency.
pub fn compute_doppler(
    relative_position_km: [f64; 3],
    relative_velocity_km_s: [f64; 3],
    carrier_frequency_hz: f64,
) -> Result<DopplerResult> {
    if carrier_frequency_hz <= 0.0 {
        return Err(SignalError::NonPositiveFrequency(carrier_frequency_hz / 1e9));
    }

    let distance_km = (relative_position_km[0].powi(2)
        + relative_position_km[1].powi(2)
        + relative_position_km[2].powi(2))
    .sqrt();

    if distance_km < MIN_RANGE_FOR_DOPPLER_KM {
        warn!(distance_km, "range too small for a stable Doppler estimate, reporting zero");
        return Ok(DopplerResult {
            radial_velocity_km_s: 0.0,
            doppler_shift_hz: 0.0,
            propagation_delay_s: 0.0,
        });
    }

    let los_unit = [
        relative_position_km[0] / distance_km,
        relative_position_km[1] / distance_km,
        relative_position_km[2] / distance_km,
    ];
    let radial_velocity_km_s = relative_velocity_km_s[0] * los_unit[0]
        + relative_velocity_km_s[1] * los_unit[1]
        + relative_velocity_km_s[2] * los_unit[2];

    let beta = radial_velocity_km_s * 1000.0 / SPEED_OF_LIGHT_M_S;
    let doppler_ratio = if beta.abs() < RELATIVISTIC_BETA_THRESHOLD {
        beta
    } else {
        ((1.0 - beta) / (1.0 + beta)).sqrt() - 1.0
    };

    Ok(DopplerResult {
        radial_velocity_km_s,
        doppler_shift_hz: carrier_frequency_hz * doppler_ratio,
        propagation_delay_s: distance_km * 1000.0 / SPEED_OF_LIGHT_M_S,
    })
}

// ---------------------------------------------------------------------
// 3GPP TS 38.214/38.215 signal core
// ---------------------------------------------------------------------

/// Link-budget parameters that must be supplied by the caller for every
/// run — none of these are given plausible-looking defaults, since a wrong
/// default silently produces a wrong link budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinkBudgetConfig {
    pub tx_power_dbm: f64,
    pub tx_antenna_gain_dbi: f64,
    pub rx_antenna_gain_dbi: f64,
    pub carrier_frequency_ghz: f64,
    pub noise_figure_db: f64,
    pub bandwidth_hz: f64,
    pub resource_block_count: f64,
    pub interference_density_factor: f64,
}

/// Free-space path loss (dB), per spec.md §4.8.
pub fn free_space_path_loss_db(frequency_ghz: f64, distance_km: f64) -> f64 {
    92.45 + 20.0 * frequency_ghz.log10() + 20.0 * distance_km.log10()
}

/// Johnson-Nyquist thermal noise floor (dBm) for a given bandwidth and
/// receiver noise figure, computed from the Boltzmann constant rather than
/// hard-coding the familiar -174 dBm/Hz constant.
pub fn thermal_noise_floor_dbm(bandwidth_hz: f64, noise_figure_db: f64) -> Result<f64> {
    if bandwidth_hz <= 0.0 {
        return Err(SignalError::NonPositiveBandwidth(bandwidth_hz));
    }
    const REFERENCE_TEMPERATURE_K: f64 = 290.0;
    let noise_density_w_hz = BOLTZMANN_CONSTANT_J_K * REFERENCE_TEMPERATURE_K;
    let noise_density_dbm_hz = 10.0 * (noise_density_w_hz * 1000.0).log10();
    Ok(noise_density_dbm_hz + 10.0 * bandwidth_hz.log10() + noise_figure_db)
}

fn elevation_interference_penalty_db(elevation_deg: f64) -> f64 {
    (90.0 - elevation_deg.clamp(0.0, 90.0)) / 90.0 * 5.0
}

fn clamp_with_warning(value: f64, min: f64, max: f64, label: &str) -> f64 {
    if value < min || value > max {
        warn!(label, value, min, max, "signal metric clamped to 3GPP range");
    }
    value.clamp(min, max)
}

/// Per-sample signal quality tier, used for the time-series distribution
/// summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

fn classify_quality(rsrp_dbm: f64) -> QualityTier {
    if rsrp_dbm >= -80.0 {
        QualityTier::Excellent
    } else if rsrp_dbm >= -95.0 {
        QualityTier::Good
    } else if rsrp_dbm >= -110.0 {
        QualityTier::Fair
    } else {
        QualityTier::Poor
    }
}

/// One fully composed signal-quality sample at an instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalSample {
    pub timestamp: DateTime<Utc>,
    pub elevation_deg: f64,
    pub slant_range_km: f64,
    pub doppler_shift_hz: f64,
    pub propagation_delay_s: f64,
    pub fspl_db: f64,
    pub atmospheric_loss_db: f64,
    pub scintillation_db: f64,
    pub rsrp_dbm: f64,
    pub rsrq_db: f64,
    pub sinr_db: f64,
    pub rssi_dbm: f64,
    pub quality_tier: QualityTier,
}

/// Compose one signal-quality sample from geometry, Doppler, atmospheric
/// loss/scintillation, and the link-budget configuration.
pub fn compute_signal_sample(
    geometry: &TopoGeometry,
    doppler: &DopplerResult,
    atmospheric_loss_db: f64,
    scintillation_db: f64,
    config: &LinkBudgetConfig,
) -> Result<SignalSample> {
    let fspl_db = free_space_path_loss_db(config.carrier_frequency_ghz, geometry.slant_range_km);

    let rsrp_raw_dbm = config.tx_power_dbm + config.tx_antenna_gain_dbi + config.rx_antenna_gain_dbi
        - fspl_db
        - atmospheric_loss_db
        - scintillation_db;
    let rsrp_dbm = clamp_with_warning(rsrp_raw_dbm, RSRP_MIN_DBM, RSRP_MAX_DBM, "rsrp");

    let noise_floor_dbm = thermal_noise_floor_dbm(config.bandwidth_hz, config.noise_figure_db)?;
    let interference_dbm = noise_floor_dbm
        + INTERFERENCE_TO_SIGNAL_RATIO_DB
        + elevation_interference_penalty_db(geometry.elevation_deg)
        + 10.0 * config.interference_density_factor.max(1e-6).log10();

    let noise_mw = 10f64.powf(noise_floor_dbm / 10.0);
    let interference_mw = 10f64.powf(interference_dbm / 10.0);
    let signal_mw = 10f64.powf(rsrp_dbm / 10.0);

    let sinr_raw_db = 10.0 * (signal_mw / (noise_mw + interference_mw)).log10();
    let sinr_db = clamp_with_warning(sinr_raw_db, SINR_MIN_DB, SINR_MAX_DB, "sinr");

    let rssi_mw = signal_mw + noise_mw + interference_mw;
    let rssi_dbm = 10.0 * rssi_mw.log10();

    let rsrq_raw_db = 10.0 * config.resource_block_count.log10() + rsrp_dbm - rssi_dbm;
    let rsrq_db = clamp_with_warning(rsrq_raw_db, RSRQ_MIN_DB, RSRQ_MAX_DB, "rsrq");

    Ok(SignalSample {
        timestamp: geometry.timestamp,
        elevation_deg: geometry.elevation_deg,
        slant_range_km: geometry.slant_range_km,
        doppler_shift_hz: doppler.doppler_shift_hz,
        propagation_delay_s: doppler.propagation_delay_s,
        fspl_db,
        atmospheric_loss_db,
        scintillation_db,
        rsrp_dbm,
        rsrq_db,
        sinr_db,
        rssi_dbm,
        quality_tier: classify_quality(rsrp_dbm),
    })
}

/// A satellite's full S5 output: its composed time series plus summary
/// statistics, matching spec.md's `SignalReport` entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S5Satellite {
    pub satellite_id: String,
    pub constellation: Constellation,
    pub samples: Vec<SignalSample>,
    pub avg_rsrp_dbm: f64,
    pub peak_rsrp_dbm: f64,
    pub excellent_count: u32,
    pub good_count: u32,
    pub fair_count: u32,
    pub poor_count: u32,
}

impl S5Satellite {
    pub fn from_samples(satellite_id: String, constellation: Constellation, samples: Vec<SignalSample>) -> Self {
        let mut excellent_count = 0;
        let mut good_count = 0;
        let mut fair_count = 0;
        let mut poor_count = 0;
        let mut peak_rsrp_dbm = f64::NEG_INFINITY;
        let mut sum_rsrp_dbm = 0.0;

        for sample in &samples {
            match sample.quality_tier {
                QualityTier::Excellent => excellent_count += 1,
                QualityTier::Good => good_count += 1,
                QualityTier::Fair => fair_count += 1,
                QualityTier::Poor => poor_count += 1,
            }
            peak_rsrp_dbm = peak_rsrp_dbm.max(sample.rsrp_dbm);
            sum_rsrp_dbm += sample.rsrp_dbm;
        }

        let avg_rsrp_dbm = if samples.is_empty() {
            f64::NAN
        } else {
            sum_rsrp_dbm / samples.len() as f64
        };

        Self {
            satellite_id,
            constellation,
            samples,
            avg_rsrp_dbm,
            peak_rsrp_dbm,
            excellent_count,
            good_count,
            fair_count,
            poor_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> LinkBudgetConfig {
        LinkBudgetConfig {
            tx_power_dbm: 40.0,
            tx_antenna_gain_dbi: 30.0,
            rx_antenna_gain_dbi: 35.0,
            carrier_frequency_ghz: 12.0,
            noise_figure_db: 1.5,
            bandwidth_hz: 20e6,
            resource_block_count: 100.0,
            interference_density_factor: 0.3,
        }
    }

    #[test]
    fn classical_doppler_used_below_threshold() {
        let result = compute_doppler([1000.0, 0.0, 0.0], [0.0, 1.0, 0.0], 12e9).unwrap();
        assert_eq!(result.radial_velocity_km_s, 0.0);
        assert_eq!(result.doppler_shift_hz, 0.0);
    }

    #[test]
    fn approaching_satellite_has_positive_doppler_ratio_sign_consistent_with_beta() {
        let result = compute_doppler([1000.0, 0.0, 0.0], [-5.0, 0.0, 0.0], 12e9).unwrap();
        assert!(result.radial_velocity_km_s < 0.0);
        assert!(result.doppler_shift_hz < 0.0);
    }

    #[test]
    fn zero_range_reports_zero_doppler() {
        let result = compute_doppler([0.0, 0.0, 0.0], [1.0, 2.0, 3.0], 12e9).unwrap();
        assert_eq!(result.doppler_shift_hz, 0.0);
        assert_eq!(result.propagation_delay_s, 0.0);
    }

    #[test]
    fn fspl_increases_with_distance_and_frequency() {
        let near = free_space_path_loss_db(12.0, 500.0);
        let far = free_space_path_loss_db(12.0, 1500.0);
        assert!(far > near);

        let low_freq = free_space_path_loss_db(2.0, 500.0);
        let high_freq = free_space_path_loss_db(20.0, 500.0);
        assert!(high_freq > low_freq);
    }

    #[test]
    fn signal_sample_is_clamped_to_3gpp_ranges() {
        let geometry = TopoGeometry {
            timestamp: Utc::now(),
            elevation_deg: 45.0,
            azimuth_deg: 180.0,
            slant_range_km: 800.0,
            is_connectable: true,
        };
        let doppler = DopplerResult {
            radial_velocity_km_s: -3.0,
            doppler_shift_hz: -1200.0,
            propagation_delay_s: 0.0027,
        };
        let sample =
            compute_signal_sample(&geometry, &doppler, 1.2, 0.3, &sample_config()).unwrap();
        assert!(sample.rsrp_dbm >= RSRP_MIN_DBM && sample.rsrp_dbm <= RSRP_MAX_DBM);
        assert!(sample.sinr_db >= SINR_MIN_DB && sample.sinr_db <= SINR_MAX_DB);
        assert!(sample.rsrq_db >= RSRQ_MIN_DB && sample.rsrq_db <= RSRQ_MAX_DB);
    }

    #[test]
    fn summary_statistics_count_every_sample() {
        let geometry = TopoGeometry {
            timestamp: Utc::now(),
            elevation_deg: 60.0,
            azimuth_deg: 90.0,
            slant_range_km: 600.0,
            is_connectable: true,
        };
        let doppler = DopplerResult {
            radial_velocity_km_s: 0.0,
            doppler_shift_hz: 0.0,
            propagation_delay_s: 0.002,
        };
        let sample =
            compute_signal_sample(&geometry, &doppler, 0.8, 0.2, &sample_config()).unwrap();
        let aggregate =
            S5Satellite::from_samples("sat-1".to_string(), Constellation::Starlink, vec![sample; 3]);
        assert_eq!(
            aggregate.excellent_count
                + aggregate.good_count
                + aggregate.fair_count
                + aggregate.poor_count,
            3
        );
    }
}
