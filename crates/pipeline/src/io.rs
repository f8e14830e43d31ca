//! JSON read/write helpers for the pipeline's input manifests and output
//! artifacts. Kept deliberately thin: this is glue around `serde_json`, not
//! a format of its own.
//!
//! Each stage's batch output is written as its own envelope file under
//! `<out>/stage{2,3,4,5}/<name>_<timestamp>.json`, and its validation report
//! is snapshotted alongside under `<out>/validation/stage{N}_validation.json`
//! (spec.md §6).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use validation::Stage;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::stage_result::StageResult;

pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    read_json(path).map_err(|e| PipelineError::ConfigMissing(format!("{}: {e}", path.display())))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let contents = serde_json::to_string_pretty(value)?;
    fs::write(path, contents)?;
    Ok(())
}

fn stage_dir(out_dir: &Path, stage_number: u8) -> PathBuf {
    out_dir.join(format!("stage{stage_number}"))
}

/// Write one stage's envelope artifact: `{stage, stage_name, data, metadata}`,
/// where `metadata` carries processing duration and the constant academic
/// standard tag spec.md §6 requires on every stage output.
fn write_stage_artifact<T: Serialize>(
    out_dir: &Path,
    stage_number: u8,
    artifact_name: &str,
    timestamp: DateTime<Utc>,
    result: &StageResult<T>,
) -> anyhow::Result<()> {
    let dir = stage_dir(out_dir, stage_number);
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{artifact_name}_{}.json", timestamp.format("%Y%m%dT%H%M%SZ")));

    let envelope = serde_json::json!({
        "stage": stage_number,
        "stage_name": result.stage_name,
        "status": result.status,
        "data": result.data,
        "errors": result.errors,
        "warnings": result.warnings,
        "metadata": {
            "processing_duration_seconds": duration_seconds(result.duration),
            "academic_standard": "Grade_A",
        },
    });

    write_json(&path, &envelope)
}

fn duration_seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

/// Write a stage's validation snapshot to `<out>/validation/stage{N}_validation.json`.
fn write_validation_snapshot<S: Stage>(
    out_dir: &Path,
    stage_number: u8,
    stage: &S,
    output: &S::Output,
) -> anyhow::Result<()> {
    let dir = out_dir.join("validation");
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("stage{stage_number}_validation.json"));
    let snapshot = stage.snapshot(output)?;
    write_json(&path, &snapshot)
}

/// Write every S2-S5 stage artifact plus its validation snapshot under
/// `out_dir`, per spec.md §6's external-interfaces contract.
pub fn write_pipeline_output(
    out_dir: &Path,
    timestamp: DateTime<Utc>,
    output: &crate::orchestrate::PipelineOutput,
) -> anyhow::Result<()> {
    write_stage_artifact(out_dir, 2, "orbit_propagation", timestamp, &output.stage2)?;
    write_stage_artifact(out_dir, 3, "coordinate_transformation", timestamp, &output.stage3)?;
    write_stage_artifact(out_dir, 4, "link_feasibility", timestamp, &output.stage4)?;
    write_stage_artifact(out_dir, 5, "signal_analysis", timestamp, &output.stage5)?;

    if let Some(data) = &output.stage2.data {
        write_validation_snapshot(out_dir, 2, &crate::stages::PropagationStage, data)?;
    }
    if let Some(data) = &output.stage3.data {
        write_validation_snapshot(out_dir, 3, &crate::stages::FrameTransformStage, data)?;
    }
    if let Some(data) = &output.stage4.data {
        write_validation_snapshot(out_dir, 4, &crate::stages::VisibilityStage, data)?;
    }
    if let Some(data) = &output.stage5.data {
        write_validation_snapshot(out_dir, 5, &crate::stages::SignalQualityStage, data)?;
    }

    Ok(())
}
