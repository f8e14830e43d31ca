//! Property-based tests over the quantified invariants that span multiple
//! stages: clamp ranges always hold regardless of input magnitude, Doppler
//! never reports a superluminal radial velocity ratio, and visibility
//! windows never violate their own minimum-duration contract.

use chrono::{TimeZone, Utc};
use physics_constants::{RSRP_MAX_DBM, RSRP_MIN_DBM, RSRQ_MAX_DB, RSRQ_MIN_DB, SINR_MAX_DB, SINR_MIN_DB};
use proptest::prelude::*;
use signal_quality::{compute_doppler, compute_signal_sample, DopplerResult, LinkBudgetConfig};
use visibility::{segment_visibility_windows, TopoGeometry, MIN_WINDOW_DURATION_MIN};

fn arbitrary_link_budget_config() -> impl Strategy<Value = LinkBudgetConfig> {
    (
        -10.0f64..60.0,
        0.0f64..40.0,
        0.0f64..40.0,
        10.0f64..30.0,
        0.5f64..5.0,
        1e6f64..100e6,
        20.0f64..275.0,
        0.01f64..1.0,
    )
        .prop_map(
            |(
                tx_power_dbm,
                tx_antenna_gain_dbi,
                rx_antenna_gain_dbi,
                carrier_frequency_ghz,
                noise_figure_db,
                bandwidth_hz,
                resource_block_count,
                interference_density_factor,
            )| LinkBudgetConfig {
                tx_power_dbm,
                tx_antenna_gain_dbi,
                rx_antenna_gain_dbi,
                carrier_frequency_ghz,
                noise_figure_db,
                bandwidth_hz,
                resource_block_count,
                interference_density_factor,
            },
        )
}

proptest! {
    #[test]
    fn doppler_ratio_never_exceeds_unity_in_magnitude(
        px in -2000.0f64..2000.0, py in -2000.0f64..2000.0, pz in -2000.0f64..2000.0,
        vx in -8.0f64..8.0, vy in -8.0f64..8.0, vz in -8.0f64..8.0,
    ) {
        let result = compute_doppler([px, py, pz], [vx, vy, vz], 12e9);
        if let Ok(DopplerResult { doppler_shift_hz, .. }) = result {
            prop_assert!((doppler_shift_hz / 12e9).abs() <= 1.0);
        }
    }

    #[test]
    fn signal_sample_metrics_always_stay_within_3gpp_clamp_ranges(
        elevation_deg in 0.0f64..90.0,
        slant_range_km in 200.0f64..3000.0,
        atmospheric_loss_db in 0.0f64..30.0,
        scintillation_db in 0.0f64..5.0,
        config in arbitrary_link_budget_config(),
    ) {
        let geometry = TopoGeometry {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            elevation_deg,
            azimuth_deg: 0.0,
            slant_range_km,
            is_connectable: true,
        };
        let doppler = DopplerResult {
            radial_velocity_km_s: 0.0,
            doppler_shift_hz: 0.0,
            propagation_delay_s: 0.0,
        };

        if let Ok(sample) = compute_signal_sample(&geometry, &doppler, atmospheric_loss_db, scintillation_db, &config) {
            prop_assert!(sample.rsrp_dbm >= RSRP_MIN_DBM && sample.rsrp_dbm <= RSRP_MAX_DBM);
            prop_assert!(sample.sinr_db >= SINR_MIN_DB && sample.sinr_db <= SINR_MAX_DB);
            prop_assert!(sample.rsrq_db >= RSRQ_MIN_DB && sample.rsrq_db <= RSRQ_MAX_DB);
        }
    }

    #[test]
    fn every_reported_visibility_window_meets_its_own_minimum_duration(
        elevations in prop::collection::vec(0.0f64..40.0, 5..60),
    ) {
        let samples: Vec<TopoGeometry> = elevations
            .iter()
            .enumerate()
            .map(|(i, &elevation_deg)| TopoGeometry {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(30 * i as i64),
                elevation_deg,
                azimuth_deg: 0.0,
                slant_range_km: 1000.0,
                is_connectable: visibility::is_connectable(elevation_deg, physics_constants::Constellation::Other),
            })
            .collect();

        let windows = segment_visibility_windows(
            "station-a",
            "sat-1",
            &samples,
            MIN_WINDOW_DURATION_MIN,
        );

        for window in windows {
            prop_assert!(window.duration_min >= MIN_WINDOW_DURATION_MIN);
            prop_assert!(window.end >= window.start);
        }
    }
}
