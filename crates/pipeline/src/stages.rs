//! Concrete `Stage` implementations for S2-S5, each wrapping its crate's
//! real output with the domain checks spec.md §4.10 names (3GPP RSRP range,
//! frame-transform accuracy bound) on top of the generic structural ones.
//! Each stage's validation report is written alongside its output artifact
//! as `<out>/validation/stage{N}_validation.json`.

use frame_transform::S3Satellite;
use orbital_propagation::{S2Satellite, TleRecord};
use physics_constants::{
    LEO_MEAN_MOTION_MAX_REV_DAY, LEO_MEAN_MOTION_MIN_REV_DAY, LEO_RADIUS_MAX_KM, LEO_RADIUS_MIN_KM,
    LEO_SPEED_MAX_KM_S, LEO_SPEED_MIN_KM_S, RSRP_MAX_DBM, RSRP_MIN_DBM,
};
use signal_quality::S5Satellite;
use validation::{Stage, ValidationReport};
use visibility::{S4Satellite, MIN_WINDOW_DURATION_MIN};

/// Maximum frame-transform accuracy estimate (m) before a sample is flagged,
/// per spec.md §4.10's "accuracy estimate ≤ 50 m" domain check.
const MAX_ACCURACY_ESTIMATE_M: f64 = 50.0;

pub struct PropagationStage;

impl Stage for PropagationStage {
    type Input = Vec<TleRecord>;
    type Output = Vec<S2Satellite>;

    fn name(&self) -> &'static str {
        "orbit_propagation"
    }

    fn validate_input(&self, input: &Self::Input) -> ValidationReport {
        let mut report = ValidationReport::new();
        if input.is_empty() {
            report.record_warning("non_empty_batch", "no TLE records supplied");
        } else {
            report.record_pass("non_empty_batch");
        }
        for tle in input {
            report.check_range(
                &format!("{}.mean_motion_rev_day", tle.satellite_id),
                tle.mean_motion_rev_day,
                LEO_MEAN_MOTION_MIN_REV_DAY,
                LEO_MEAN_MOTION_MAX_REV_DAY,
            );
        }
        report
    }

    fn validate_output(&self, output: &Self::Output) -> ValidationReport {
        let mut report = ValidationReport::new();
        for sat in output {
            for state in &sat.states {
                report.check_range(
                    &format!("{}.geocentric_radius_km", sat.satellite_id),
                    state.geocentric_radius_km(),
                    LEO_RADIUS_MIN_KM,
                    LEO_RADIUS_MAX_KM,
                );
                report.check_range(
                    &format!("{}.speed_km_s", sat.satellite_id),
                    state.speed_km_s(),
                    LEO_SPEED_MIN_KM_S,
                    LEO_SPEED_MAX_KM_S,
                );
            }
        }
        report
    }
}

pub struct FrameTransformStage;

impl Stage for FrameTransformStage {
    type Input = Vec<S2Satellite>;
    type Output = Vec<S3Satellite>;

    fn name(&self) -> &'static str {
        "coordinate_transformation"
    }

    fn validate_input(&self, input: &Self::Input) -> ValidationReport {
        let mut report = ValidationReport::new();
        if input.is_empty() {
            report.record_warning("non_empty_batch", "no propagated satellites to transform");
        } else {
            report.record_pass("non_empty_batch");
        }
        report
    }

    fn validate_output(&self, output: &Self::Output) -> ValidationReport {
        let mut report = ValidationReport::new();
        for sat in output {
            for sample in &sat.time_series {
                report.check_range(&format!("{}.latitude_deg", sat.satellite_id), sample.lat_deg, -90.0, 90.0);
                report.check_range(
                    &format!("{}.altitude_m", sat.satellite_id),
                    sample.alt_km * 1000.0,
                    200e3,
                    2e6,
                );
                let check_name = format!("{}.accuracy_estimate_m", sat.satellite_id);
                if sample.accuracy_estimate_m > MAX_ACCURACY_ESTIMATE_M {
                    report.record_error(
                        check_name,
                        format!(
                            "accuracy estimate {:.2} m exceeds the {MAX_ACCURACY_ESTIMATE_M:.0} m bound",
                            sample.accuracy_estimate_m
                        ),
                    );
                } else {
                    report.record_pass(check_name);
                }
            }
        }
        report
    }
}

pub struct VisibilityStage;

impl Stage for VisibilityStage {
    type Input = Vec<S3Satellite>;
    type Output = Vec<S4Satellite>;

    fn name(&self) -> &'static str {
        "link_feasibility"
    }

    fn validate_input(&self, input: &Self::Input) -> ValidationReport {
        let mut report = ValidationReport::new();
        if input.is_empty() {
            report.record_warning("non_empty_batch", "no transformed satellites to assess for visibility");
        } else {
            report.record_pass("non_empty_batch");
        }
        report
    }

    fn validate_output(&self, output: &Self::Output) -> ValidationReport {
        let mut report = ValidationReport::new();
        for sat in output {
            for sample in &sat.geometry {
                let check_name = format!("{}.{}.connectable_elevation", sat.satellite_id, sat.station_id);
                let threshold = sat.constellation.min_elevation_deg();
                if sample.is_connectable && sample.elevation_deg < threshold {
                    report.record_error(
                        check_name,
                        format!("sample marked connectable at {:.2} deg below the {threshold:.1} deg threshold", sample.elevation_deg),
                    );
                } else {
                    report.record_pass(check_name);
                }
            }
            for window in &sat.windows {
                let check_name = format!("{}.{}.window_duration_min", sat.satellite_id, sat.station_id);
                if window.duration_min < MIN_WINDOW_DURATION_MIN {
                    report.record_error(
                        check_name,
                        format!("window duration {:.2} min is below the {MIN_WINDOW_DURATION_MIN:.1} min minimum", window.duration_min),
                    );
                } else {
                    report.record_pass(check_name);
                }
            }
        }
        report
    }
}

pub struct SignalQualityStage;

impl Stage for SignalQualityStage {
    type Input = Vec<S4Satellite>;
    type Output = Vec<S5Satellite>;

    fn name(&self) -> &'static str {
        "signal_analysis"
    }

    fn validate_input(&self, input: &Self::Input) -> ValidationReport {
        let mut report = ValidationReport::new();
        if input.is_empty() {
            report.record_warning("non_empty_batch", "no visibility records to score for signal quality");
        } else {
            report.record_pass("non_empty_batch");
        }
        report
    }

    fn validate_output(&self, output: &Self::Output) -> ValidationReport {
        let mut report = ValidationReport::new();
        for sat in output {
            for sample in &sat.samples {
                let check_name = format!("{}.rsrp_dbm", sat.satellite_id);
                if sample.rsrp_dbm < RSRP_MIN_DBM || sample.rsrp_dbm > RSRP_MAX_DBM {
                    report.record_error(
                        check_name,
                        format!("rsrp_dbm={} outside the 3GPP TS 38.215 range [{RSRP_MIN_DBM}, {RSRP_MAX_DBM}]", sample.rsrp_dbm),
                    );
                } else {
                    report.record_pass(check_name);
                }
                report.check_finite(&format!("{}.sinr_db", sat.satellite_id), sample.sinr_db);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use physics_constants::Constellation;

    #[test]
    fn frame_transform_flags_accuracy_beyond_50m() {
        let stage = FrameTransformStage;
        let sat = S3Satellite {
            satellite_id: "sat-1".to_string(),
            constellation: Constellation::Other,
            epoch: Utc::now(),
            time_series: vec![frame_transform::TransformedState {
                timestamp: Utc::now(),
                icrs_km: [0.0; 3],
                ecef_km: [7000.0, 0.0, 0.0],
                velocity_ecef_km_s: [0.0; 3],
                lat_deg: 0.0,
                lon_deg: 0.0,
                alt_km: 550.0,
                accuracy_estimate_m: 75.0,
            }],
        };
        let report = stage.validate_output(&vec![sat]);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn signal_quality_flags_rsrp_outside_3gpp_range() {
        let stage = SignalQualityStage;
        let sample = signal_quality::compute_signal_sample(
            &visibility::TopoGeometry {
                timestamp: Utc::now(),
                elevation_deg: 45.0,
                azimuth_deg: 0.0,
                slant_range_km: 800.0,
                is_connectable: true,
            },
            &signal_quality::DopplerResult {
                radial_velocity_km_s: 0.0,
                doppler_shift_hz: 0.0,
                propagation_delay_s: 0.0,
            },
            1.0,
            0.2,
            &signal_quality::LinkBudgetConfig {
                tx_power_dbm: 40.0,
                tx_antenna_gain_dbi: 30.0,
                rx_antenna_gain_dbi: 35.0,
                carrier_frequency_ghz: 12.0,
                noise_figure_db: 1.5,
                bandwidth_hz: 20e6,
                resource_block_count: 100.0,
                interference_density_factor: 0.3,
            },
        )
        .unwrap();
        let sat = S5Satellite::from_samples("sat-1".to_string(), Constellation::Other, vec![sample]);
        let report = stage.validate_output(&vec![sat]);
        // Clamping already keeps rsrp_dbm in range, so this is a sanity
        // check that the domain check passes rather than false-positives.
        assert!(report.valid);
    }
}
