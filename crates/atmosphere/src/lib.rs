//! ITU-R P.676-13 gaseous absorption and ITU-R P.618-13 tropospheric
//! scintillation models used by stage S5's link budget.
//!
//! Both models require real weather inputs (temperature, pressure, water
//! vapor density, wet-term radio refractivity) — there is no "standard
//! atmosphere" default here, by design: a link budget computed against a
//! silently-assumed atmosphere is worse than one that fails loudly when the
//! caller forgot to supply weather data.
//!
//! The gaseous model implements the dominant non-resonant oxygen term and
//! the leading 22.235 GHz water-vapor line of Annex 2.2's line-by-line sum,
//! not the full multi-line series — adequate for the Ku/Ka frequencies this
//! pipeline targets, where the higher-order lines contribute negligibly.

use physics_constants::ATMOSPHERIC_BLOCKED_SENTINEL_DB;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum AtmosphereError {
    #[error("frequency must be positive, got {0} GHz")]
    NonPositiveFrequency(f64),
}

pub type Result<T> = std::result::Result<T, AtmosphereError>;

/// Surface weather conditions at the ground station. No field has a
/// meaningful default; all must come from observed or forecast data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AtmosphericConditions {
    pub temperature_k: f64,
    pub pressure_hpa: f64,
    pub water_vapor_density_g_m3: f64,
}

/// Equivalent height of the oxygen absorbing layer (km), ITU-R P.676-13.
const OXYGEN_EQUIVALENT_HEIGHT_KM: f64 = 6.0;
/// Equivalent height of the water-vapor absorbing layer (km), ITU-R P.676-13.
const WATER_VAPOR_EQUIVALENT_HEIGHT_KM: f64 = 2.1;
/// Minimum elevation (deg) below which the cosecant slant-path scaling is
/// clamped, since it diverges at the horizon.
const MIN_SLANT_PATH_ELEVATION_DEG: f64 = 5.0;

fn oxygen_specific_attenuation_db_km(frequency_ghz: f64, rp: f64, rt: f64) -> f64 {
    let f2 = frequency_ghz * frequency_ghz;
    (7.2 * rt.powf(2.8) / (f2 + 0.34 * rp * rp * rt.powf(1.6))) * f2 * rp * rp * rt.powf(0.8) * 1e-3
}

fn water_vapor_specific_attenuation_db_km(frequency_ghz: f64, rt: f64, density_g_m3: f64) -> f64 {
    let line = 3.98 / ((frequency_ghz - 22.235).powi(2) + 9.42);
    line * frequency_ghz * frequency_ghz * rt.powf(2.5) * density_g_m3 * 1e-4
}

/// Slant-path gaseous absorption (dB). Returns the "blocked by Earth"
/// sentinel for any negative elevation, per spec.md §4.6, without touching
/// the (possibly invalid) weather inputs at all.
pub fn gaseous_attenuation_db(
    frequency_ghz: f64,
    elevation_deg: f64,
    conditions: &AtmosphericConditions,
) -> Result<f64> {
    if frequency_ghz <= 0.0 {
        return Err(AtmosphereError::NonPositiveFrequency(frequency_ghz));
    }
    if elevation_deg < 0.0 {
        return Ok(ATMOSPHERIC_BLOCKED_SENTINEL_DB);
    }

    let rp = conditions.pressure_hpa / 1013.25;
    let rt = 288.0 / conditions.temperature_k;

    let gamma_o = oxygen_specific_attenuation_db_km(frequency_ghz, rp, rt);
    let gamma_w =
        water_vapor_specific_attenuation_db_km(frequency_ghz, rt, conditions.water_vapor_density_g_m3);

    let clamped_elevation_deg = elevation_deg.max(MIN_SLANT_PATH_ELEVATION_DEG);
    let sin_elevation = clamped_elevation_deg.to_radians().sin();

    Ok((gamma_o * OXYGEN_EQUIVALENT_HEIGHT_KM + gamma_w * WATER_VAPOR_EQUIVALENT_HEIGHT_KM)
        / sin_elevation)
}

/// Inputs to the ITU-R P.618-13 tropospheric scintillation model. As with
/// `AtmosphericConditions`, no field defaults — scintillation is a function
/// of real antenna geometry and a real wet-term refractivity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScintillationInputs {
    pub elevation_deg: f64,
    pub frequency_ghz: f64,
    pub antenna_diameter_m: f64,
    pub antenna_efficiency: f64,
    pub wet_term_radio_refractivity: f64,
}

const EFFECTIVE_TURBULENCE_HEIGHT_M: f64 = 1000.0;
const EFFECTIVE_EARTH_RADIUS_KM: f64 = 8500.0;
const SCINTILLATION_MIN_ELEVATION_DEG: f64 = 5.0;
const SCINTILLATION_MAX_ELEVATION_DEG: f64 = 90.0;

/// Scintillation standard deviation (dB) per ITU-R P.618-13 §2.4.1. Elevation
/// outside the model's valid [5, 90] degree range is clamped to the nearer
/// bound with a warning, rather than rejected outright, since scintillation
/// is small at high elevation and the clamp only ever under-estimates it.
pub fn scintillation_intensity_db(inputs: &ScintillationInputs) -> f64 {
    let elevation_deg = if inputs.elevation_deg < SCINTILLATION_MIN_ELEVATION_DEG
        || inputs.elevation_deg > SCINTILLATION_MAX_ELEVATION_DEG
    {
        warn!(
            elevation_deg = inputs.elevation_deg,
            "scintillation elevation outside ITU-R P.618-13 validity range, clamping"
        );
        inputs
            .elevation_deg
            .clamp(SCINTILLATION_MIN_ELEVATION_DEG, SCINTILLATION_MAX_ELEVATION_DEG)
    } else {
        inputs.elevation_deg
    };

    let sigma_ref = 3.6e-3 + inputs.wet_term_radio_refractivity * 1e-4;
    let sin_el = elevation_deg.to_radians().sin();
    let sigma = sigma_ref * inputs.frequency_ghz.powf(7.0 / 12.0) / sin_el.powf(1.2);

    let path_length_m = 2.0 * EFFECTIVE_TURBULENCE_HEIGHT_M
        / ((sin_el * sin_el + 2.0 * EFFECTIVE_TURBULENCE_HEIGHT_M / (EFFECTIVE_EARTH_RADIUS_KM * 1000.0))
            .sqrt()
            + sin_el);

    let effective_diameter_m = (inputs.antenna_efficiency.max(0.0).sqrt()) * inputs.antenna_diameter_m;
    let x = 1.22 * effective_diameter_m * effective_diameter_m * (inputs.frequency_ghz / path_length_m);

    let g = (3.86 * (x * x + 1.0).powf(11.0 / 12.0) * ((11.0 / 12.0) * (1.0 / x).atan()).sin()
        - 7.08 * x.powf(5.0 / 6.0))
    .max(0.0)
    .sqrt();

    sigma * g.max(1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typical_conditions() -> AtmosphericConditions {
        AtmosphericConditions {
            temperature_k: 288.15,
            pressure_hpa: 1013.25,
            water_vapor_density_g_m3: 7.5,
        }
    }

    #[test]
    fn negative_elevation_is_blocked() {
        let attenuation =
            gaseous_attenuation_db(20.0, -5.0, &typical_conditions()).unwrap();
        assert_eq!(attenuation, ATMOSPHERIC_BLOCKED_SENTINEL_DB);
    }

    #[test]
    fn attenuation_decreases_with_elevation() {
        let low = gaseous_attenuation_db(20.0, 10.0, &typical_conditions()).unwrap();
        let high = gaseous_attenuation_db(20.0, 80.0, &typical_conditions()).unwrap();
        assert!(high < low);
    }

    #[test]
    fn attenuation_near_water_line_exceeds_offline_frequency() {
        let on_line = gaseous_attenuation_db(22.235, 45.0, &typical_conditions()).unwrap();
        let off_line = gaseous_attenuation_db(15.0, 45.0, &typical_conditions()).unwrap();
        assert!(on_line > off_line);
    }

    #[test]
    fn rejects_non_positive_frequency() {
        assert!(matches!(
            gaseous_attenuation_db(0.0, 45.0, &typical_conditions()),
            Err(AtmosphereError::NonPositiveFrequency(_))
        ));
    }

    #[test]
    fn scintillation_is_finite_and_nonnegative_at_typical_inputs() {
        let inputs = ScintillationInputs {
            elevation_deg: 30.0,
            frequency_ghz: 20.0,
            antenna_diameter_m: 0.6,
            antenna_efficiency: 0.65,
            wet_term_radio_refractivity: 42.0,
        };
        let sigma = scintillation_intensity_db(&inputs);
        assert!(sigma.is_finite());
        assert!(sigma >= 0.0);
    }

    #[test]
    fn scintillation_clamps_out_of_range_elevation() {
        let inputs = ScintillationInputs {
            elevation_deg: -10.0,
            frequency_ghz: 20.0,
            antenna_diameter_m: 0.6,
            antenna_efficiency: 0.65,
            wet_term_radio_refractivity: 42.0,
        };
        let sigma = scintillation_intensity_db(&inputs);
        assert!(sigma.is_finite());
    }
}
