use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use chrono::Utc;
use pipeline::io::{load_config, read_json, write_pipeline_output};
use tracing_subscriber::EnvFilter;

/// Batch satellite link-feasibility and signal-quality pipeline.
#[derive(Debug, Parser)]
#[command(name = "link-pipeline", version, about)]
struct Args {
    /// Path to the pipeline configuration JSON (ground stations, time grid,
    /// cache settings, atmospheric conditions, link budget).
    #[arg(long)]
    config: PathBuf,

    /// Path to a JSON array of TLE records to propagate.
    #[arg(long)]
    tles: PathBuf,

    /// Path to the IERS Earth orientation parameter table, JSON-encoded.
    #[arg(long)]
    eop: PathBuf,

    /// Output directory root. The batch's stage2-stage5 artifacts and
    /// validation snapshots are written under here.
    #[arg(long)]
    output: PathBuf,
}

fn run() -> anyhow::Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = load_config(&args.config).context("loading pipeline configuration")?;
    let tle_records: Vec<orbital_propagation::TleRecord> =
        read_json(&args.tles).context("loading TLE manifest")?;
    let eop_records: Vec<earth_orientation::EopRecord> =
        read_json(&args.eop).context("loading earth orientation parameter table")?;
    let eop_table = earth_orientation::EarthOrientationTable::new(eop_records)
        .context("building earth orientation parameter table")?;

    let now = Utc::now();
    let output = pipeline::run_pipeline(tle_records, now, &config, &eop_table)
        .context("running link-feasibility pipeline")?;

    tracing::info!(
        propagated = output.stage2.data.as_ref().map(Vec::len).unwrap_or(0),
        failed = output.failures.len(),
        "pipeline batch complete"
    );

    let all_valid = [
        output.stage2.is_ok(),
        output.stage3.is_ok(),
        output.stage4.is_ok(),
        output.stage5.is_ok(),
    ]
    .into_iter()
    .all(|ok| ok);

    write_pipeline_output(&args.output, now, &output).context("writing pipeline output")?;

    Ok(all_valid)
}

/// Exit codes per spec.md §6: 0 success, 1 validation failure (the batch ran
/// and produced output, but one or more stages failed validation), 2 for
/// anything that kept the batch from running at all (bad config, unreadable
/// input, an unavailable resource such as an exhausted IERS horizon).
fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            tracing::error!(error = format!("{err:#}"), "pipeline run failed");
            ExitCode::from(2)
        }
    }
}
