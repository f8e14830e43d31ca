//! Pipeline configuration. Every field here is a value a real run must
//! supply — none carry a `Default` impl, so a misconfigured run fails at
//! startup instead of silently propagating a plausible-looking guess all
//! the way to a signal-quality report.

use atmosphere::AtmosphericConditions;
use serde::{Deserialize, Serialize};
use signal_quality::LinkBudgetConfig;
use visibility::GroundStation;
use worker_pool::WorkerPoolConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeGridConfig {
    pub cadence_s: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub path: String,
    pub keep_recent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScintillationConfig {
    pub antenna_diameter_m: f64,
    pub antenna_efficiency: f64,
    pub wet_term_radio_refractivity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub ground_stations: Vec<GroundStation>,
    pub time_grid: TimeGridConfig,
    pub cache: CacheConfig,
    pub atmospheric_conditions: AtmosphericConditions,
    pub scintillation: ScintillationConfig,
    pub link_budget: LinkBudgetConfig,
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
}
