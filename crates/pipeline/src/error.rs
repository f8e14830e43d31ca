//! Pipeline-level error taxonomy. Stage crates keep their own narrow error
//! types (`OrbitalError`, `TransformError`, ...); this enum is what the
//! orchestration layer reports to callers, wrapping the stage error where
//! one exists and adding the categories that only make sense at this level.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("required configuration missing: {0}")]
    ConfigMissing(String),

    #[error("input failed schema validation: {0}")]
    InputSchemaError(String),

    #[error("computed value out of numerical range: {0}")]
    NumericalOutOfRange(String),

    #[error("required resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("cache schema mismatch, forcing recompute: {0}")]
    CacheSchemaMismatch(String),

    #[error("{failed_count} of {attempted} satellites failed and were excluded")]
    PartialSatelliteFailure {
        attempted: usize,
        failed_count: usize,
        failures: Vec<(String, String)>,
    },

    #[error("orbital propagation error: {0}")]
    Orbital(#[from] orbital_propagation::OrbitalError),

    #[error("frame transform error: {0}")]
    Transform(#[from] frame_transform::TransformError),

    #[error("signal quality error: {0}")]
    Signal(#[from] signal_quality::SignalError),

    #[error("atmosphere model error: {0}")]
    Atmosphere(#[from] atmosphere::AtmosphereError),

    #[error("coordinate cache error: {0}")]
    Cache(#[from] coord_cache::CacheError),

    #[error("earth orientation error: {0}")]
    Eop(#[from] earth_orientation::EopError),

    #[error("worker pool error: {0}")]
    WorkerPool(#[from] worker_pool::WorkerPoolError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
