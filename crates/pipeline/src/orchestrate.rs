//! Wires stages S2 (propagation) through S5 (signal quality) together, one
//! satellite at a time, fanned out across the worker pool.
//!
//! HDF5 (via the `coord-cache` crate) is not thread-safe without a
//! special multi-threaded build, so all cache access is serialized behind a
//! single mutex rather than trusted to the underlying library.

use std::sync::Mutex;
use std::time::Instant;

use atmosphere::{gaseous_attenuation_db, scintillation_intensity_db, ScintillationInputs};
use chrono::{DateTime, Utc};
use coord_cache::CoordCache;
use earth_orientation::EarthOrientationTable;
use frame_transform::{geometric_prefilter, teme_to_wgs84, PrefilterStation, S3Satellite, TransformedState};
use orbital_propagation::{dedupe_latest_epoch, propagate_satellite, S2Satellite, TleRecord};
use signal_quality::{compute_doppler, compute_signal_sample, S5Satellite};
use tracing::{info, warn};
use validation::Stage;
use visibility::{compute_topo_geometry, segment_visibility_windows, S4Satellite, MIN_WINDOW_DURATION_MIN};
use worker_pool::{build_thread_pool, resolve_worker_count, run_batch, BatchOutcome};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::stage_result::StageResult;
use crate::stages::{FrameTransformStage, PropagationStage, SignalQualityStage, VisibilityStage};

/// Per-satellite, per-station S4/S5 output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StationLink {
    pub station_id: String,
    pub visibility: S4Satellite,
    pub signal: S5Satellite,
}

/// Everything one satellite produced across stages S2-S5. `s3`/`links` stay
/// empty when the geometric pre-filter rejects the satellite outright, but
/// `s2` is always present — propagation itself succeeded.
#[derive(Debug, Clone)]
pub struct SatelliteArtifacts {
    pub s2: S2Satellite,
    pub s3: Option<S3Satellite>,
    pub links: Vec<StationLink>,
}

fn run_one_satellite(
    tle: &TleRecord,
    start: DateTime<Utc>,
    config: &PipelineConfig,
    eop: &EarthOrientationTable,
    cache: &Mutex<CoordCache>,
) -> Result<SatelliteArtifacts> {
    let s2 = propagate_satellite(tle, start, config.time_grid.cadence_s, config.time_grid.sample_count)?;

    let prefilter_stations: Vec<PrefilterStation> = config
        .ground_stations
        .iter()
        .map(|s| PrefilterStation {
            lat_deg: s.lat_deg,
            lon_deg: s.lon_deg,
            alt_km: s.alt_km,
        })
        .collect();

    if !geometric_prefilter(&s2.states, &prefilter_stations) {
        return Ok(SatelliteArtifacts { s2, s3: None, links: Vec::new() });
    }

    let transformed = transform_with_cache(tle, &s2.states, eop, cache)?;
    let s3 = S3Satellite {
        satellite_id: tle.satellite_id.clone(),
        constellation: tle.constellation,
        epoch: tle.epoch,
        time_series: transformed.clone(),
    };

    let mut links = Vec::new();
    for station in &config.ground_stations {
        let geometry: Vec<_> = transformed
            .iter()
            .map(|state| compute_topo_geometry(station, state, tle.constellation))
            .collect();

        let windows = segment_visibility_windows(
            &station.id,
            &tle.satellite_id,
            &geometry,
            MIN_WINDOW_DURATION_MIN,
        );

        let station_ecef = station.ecef_km();
        let mut samples = Vec::new();
        for (state, geom) in transformed
            .iter()
            .zip(geometry.iter())
            .filter(|(_, geom)| geom.is_connectable)
        {
            let relative_position_km = [
                state.ecef_km[0] - station_ecef[0],
                state.ecef_km[1] - station_ecef[1],
                state.ecef_km[2] - station_ecef[2],
            ];
            let carrier_hz = config.link_budget.carrier_frequency_ghz * 1e9;
            let doppler = compute_doppler(relative_position_km, state.velocity_ecef_km_s, carrier_hz)?;

            let atmospheric_loss_db = gaseous_attenuation_db(
                config.link_budget.carrier_frequency_ghz,
                geom.elevation_deg,
                &config.atmospheric_conditions,
            )?;
            let scintillation_db = scintillation_intensity_db(&ScintillationInputs {
                elevation_deg: geom.elevation_deg,
                frequency_ghz: config.link_budget.carrier_frequency_ghz,
                antenna_diameter_m: config.scintillation.antenna_diameter_m,
                antenna_efficiency: config.scintillation.antenna_efficiency,
                wet_term_radio_refractivity: config.scintillation.wet_term_radio_refractivity,
            });

            samples.push(compute_signal_sample(
                geom,
                &doppler,
                atmospheric_loss_db,
                scintillation_db,
                &config.link_budget,
            )?);
        }

        let signal = S5Satellite::from_samples(tle.satellite_id.clone(), tle.constellation, samples);
        let visibility = S4Satellite {
            satellite_id: tle.satellite_id.clone(),
            constellation: tle.constellation,
            station_id: station.id.clone(),
            geometry,
            windows,
        };

        links.push(StationLink {
            station_id: station.id.clone(),
            visibility,
            signal,
        });
    }

    Ok(SatelliteArtifacts { s2, s3: Some(s3), links })
}

fn transform_with_cache(
    tle: &TleRecord,
    states: &[orbital_propagation::TemeState],
    eop: &EarthOrientationTable,
    cache: &Mutex<CoordCache>,
) -> Result<Vec<TransformedState>> {
    let first = states.first();
    let last = states.last();
    let cache_key = match (first, last) {
        (Some(f), Some(l)) => Some(coord_cache::derive_cache_key(
            &[tle.satellite_id.clone()],
            f.timestamp,
            l.timestamp,
            (f.position_km, f.velocity_km_s),
            (l.position_km, l.velocity_km_s),
        )),
        _ => None,
    };

    if let Some(key) = &cache_key {
        let guard = cache.lock().expect("coord cache mutex poisoned");
        match guard.get(key) {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(err) => warn!(satellite_id = %tle.satellite_id, error = %err, "cache read failed, recomputing"),
        }
    }

    let mut transformed = Vec::with_capacity(states.len());
    for state in states {
        let eop_at_sample = eop.at(state.timestamp)?;
        transformed.push(teme_to_wgs84(state, &eop_at_sample)?);
    }

    if let Some(key) = &cache_key {
        let guard = cache.lock().expect("coord cache mutex poisoned");
        let metadata = serde_json::json!({
            "epoch": tle.epoch,
            "constellation": tle.constellation,
            "sample_count": transformed.len(),
        });
        if let Err(err) = guard.put(key, &tle.satellite_id, &transformed, &metadata) {
            warn!(satellite_id = %tle.satellite_id, error = %err, "cache write failed, continuing without caching");
        }
    }

    Ok(transformed)
}

/// Batch output: one validated envelope per stage (S2-S5), each holding that
/// stage's full-batch output plus its own `Stage::run_validation_checks`
/// report, so every stage gets its own artifact and validation snapshot
/// (spec.md §6).
pub struct PipelineOutput {
    pub stage2: StageResult<Vec<S2Satellite>>,
    pub stage3: StageResult<Vec<S3Satellite>>,
    pub stage4: StageResult<Vec<S4Satellite>>,
    pub stage5: StageResult<Vec<S5Satellite>>,
    pub failures: Vec<(String, String)>,
}

/// Run the full S2-S5 pipeline over a batch of TLEs.
pub fn run_pipeline(
    tle_records: Vec<TleRecord>,
    start: DateTime<Utc>,
    config: &PipelineConfig,
    eop: &EarthOrientationTable,
) -> Result<PipelineOutput> {
    let began = Instant::now();
    let deduped = dedupe_latest_epoch(tle_records);
    if deduped.is_empty() {
        return Err(PipelineError::InputSchemaError(
            "no TLE records to propagate after deduplication".to_string(),
        ));
    }

    let grid_end = start
        + chrono::Duration::milliseconds(
            ((config.time_grid.sample_count.saturating_sub(1)) as f64 * config.time_grid.cadence_s * 1000.0) as i64,
        );
    let (horizon_start, horizon_end) = eop.horizon();
    if start < horizon_start || grid_end > horizon_end {
        return Err(PipelineError::ResourceUnavailable(format!(
            "batch time grid [{start}, {grid_end}] exceeds IERS EOP table horizon [{horizon_start}, {horizon_end}]"
        )));
    }

    let cache = Mutex::new(CoordCache::new(
        config.cache.path.clone(),
        config.cache.keep_recent,
    ));

    let worker_count = resolve_worker_count(&config.worker_pool);
    info!(worker_count, satellite_count = deduped.len(), "starting pipeline batch");
    let pool = build_thread_pool(worker_count)?;

    let outcome: BatchOutcome<SatelliteArtifacts> = run_batch(
        &pool,
        &deduped,
        |tle| tle.satellite_id.clone(),
        |tle| run_one_satellite(tle, start, config, eop, &cache).map_err(|e| e.to_string()),
    );

    let mut s2_batch = Vec::with_capacity(outcome.successes.len());
    let mut s3_batch = Vec::new();
    let mut s4_batch = Vec::new();
    let mut s5_batch = Vec::new();
    for artifact in outcome.successes {
        s2_batch.push(artifact.s2);
        if let Some(s3) = artifact.s3 {
            s3_batch.push(s3);
        }
        for link in artifact.links {
            s4_batch.push(link.visibility);
            s5_batch.push(link.signal);
        }
    }

    let partial_failure_note = (!outcome.failures.is_empty()).then(|| {
        format!(
            "{} of {} satellites failed and were excluded",
            outcome.failures.len(),
            outcome.attempted()
        )
    });

    let propagation_stage = PropagationStage;
    let mut stage2_report = propagation_stage.run_validation_checks(&deduped, &s2_batch);
    if let Some(note) = &partial_failure_note {
        stage2_report.record_warning("partial_satellite_failure", note.clone());
    }
    let stage2 = StageResult::success(propagation_stage.name(), s2_batch.clone(), stage2_report, began.elapsed());

    let frame_transform_stage = FrameTransformStage;
    let stage3_report = frame_transform_stage.run_validation_checks(&s2_batch, &s3_batch);
    let stage3 = StageResult::success(frame_transform_stage.name(), s3_batch.clone(), stage3_report, began.elapsed());

    let visibility_stage = VisibilityStage;
    let stage4_report = visibility_stage.run_validation_checks(&s3_batch, &s4_batch);
    let stage4 = StageResult::success(visibility_stage.name(), s4_batch.clone(), stage4_report, began.elapsed());

    let signal_quality_stage = SignalQualityStage;
    let stage5_report = signal_quality_stage.run_validation_checks(&s4_batch, &s5_batch);
    let stage5 = StageResult::success(signal_quality_stage.name(), s5_batch, stage5_report, began.elapsed());

    Ok(PipelineOutput {
        stage2,
        stage3,
        stage4,
        stage5,
        failures: outcome.failures,
    })
}
