//! CPU-adaptive `rayon` worker pool sizing and per-satellite task
//! containment for stages S3-S5's per-satellite fan-out.
//!
//! Worker count resolution order: the `MAX_WORKERS` environment variable,
//! then an explicit config override, then a live CPU-load probe with
//! 95%/75%/50% tiers, then a floor of 1. A task failing never aborts the
//! batch — each satellite's result is caught, logged, and excluded.

use std::fmt::Display;
use std::io::Read;
use std::time::Duration;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum WorkerPoolError {
    #[error("failed to build rayon thread pool: {0}")]
    Build(#[from] ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, WorkerPoolError>;

const MAX_WORKERS_ENV_VAR: &str = "MAX_WORKERS";
const CPU_PROBE_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Overrides applied before falling back to the CPU-load probe.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub max_workers: Option<usize>,
    pub force_single_thread: bool,
}

fn available_cores() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Sample `/proc/stat`'s aggregate CPU line twice, 100ms apart, and return
/// the fraction of time spent busy (non-idle) over that window. Returns
/// `None` on any platform or parsing failure, so the caller can fall back to
/// a fixed tier rather than guessing.
fn proc_stat_busy_fraction() -> Option<f64> {
    let read_cpu_line = || -> Option<(u64, u64)> {
        let mut contents = String::new();
        std::fs::File::open("/proc/stat").ok()?.read_to_string(&mut contents).ok()?;
        let line = contents.lines().next()?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 4 {
            return None;
        }
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        let total: u64 = fields.iter().sum();
        Some((idle, total))
    };

    let (idle_a, total_a) = read_cpu_line()?;
    std::thread::sleep(CPU_PROBE_SAMPLE_INTERVAL);
    let (idle_b, total_b) = read_cpu_line()?;

    let total_delta = total_b.saturating_sub(total_a);
    if total_delta == 0 {
        return None;
    }
    let idle_delta = idle_b.saturating_sub(idle_a);
    Some(1.0 - (idle_delta as f64 / total_delta as f64))
}

/// Fraction of cores to use at the "moderate load" fallback tier, used both
/// when the live probe is unavailable and as the mid tier of the live probe.
const MODERATE_LOAD_CORE_FRACTION: f64 = 0.75;

fn cpu_probe_worker_count() -> usize {
    let cores = available_cores();
    let fraction = match proc_stat_busy_fraction() {
        Some(busy) if busy < 0.30 => 0.95,
        Some(busy) if busy < 0.50 => 0.75,
        Some(_) => 0.50,
        None => {
            warn!("CPU load probe unavailable, falling back to the moderate-load worker tier");
            MODERATE_LOAD_CORE_FRACTION
        }
    };
    ((cores as f64 * fraction).floor() as usize).max(1)
}

/// Resolve the worker count via `MAX_WORKERS` env var, then config override,
/// then the CPU-load probe, with a floor of 1 thread.
pub fn resolve_worker_count(config: &WorkerPoolConfig) -> usize {
    if config.force_single_thread {
        return 1;
    }

    if let Ok(raw) = std::env::var(MAX_WORKERS_ENV_VAR) {
        if let Ok(parsed) = raw.trim().parse::<usize>() {
            if parsed > 0 {
                info!(parsed, "worker count set via MAX_WORKERS");
                return parsed;
            }
        }
        warn!(raw, "MAX_WORKERS could not be parsed as a positive integer, ignoring");
    }

    if let Some(configured) = config.max_workers {
        if configured > 0 {
            return configured;
        }
    }

    cpu_probe_worker_count()
}

pub fn build_thread_pool(worker_count: usize) -> Result<ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .build()?)
}

/// Outcome of running a batch of per-item tasks: successes plus
/// `(item_id, error_message)` pairs for the ones that failed.
#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    pub successes: Vec<T>,
    pub failures: Vec<(String, String)>,
}

impl<T> BatchOutcome<T> {
    pub fn attempted(&self) -> usize {
        self.successes.len() + self.failures.len()
    }
}

/// Run `work` over every item in `items` on `pool`, in parallel, containing
/// each item's failure independently rather than aborting the batch. Below
/// `PARALLEL_THRESHOLD` items the overhead of the pool isn't worth paying,
/// so the batch runs serially on the calling thread instead.
pub const PARALLEL_THRESHOLD: usize = 5;

pub fn run_batch<I, T, E>(
    pool: &ThreadPool,
    items: &[I],
    id_of: impl Fn(&I) -> String + Sync,
    work: impl Fn(&I) -> std::result::Result<T, E> + Sync,
) -> BatchOutcome<T>
where
    I: Sync,
    T: Send,
    E: Display,
{
    let run_one = |item: &I| -> (String, std::result::Result<T, String>) {
        let id = id_of(item);
        match work(item) {
            Ok(value) => (id, Ok(value)),
            Err(err) => {
                let message = err.to_string();
                warn!(satellite_id = %id, error = %message, "task failed, excluding from batch");
                (id, Err(message))
            }
        }
    };

    let results: Vec<(String, std::result::Result<T, String>)> = if items.len() >= PARALLEL_THRESHOLD
    {
        pool.install(|| items.par_iter().map(run_one).collect())
    } else {
        items.iter().map(run_one).collect()
    };

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for (id, result) in results {
        match result {
            Ok(value) => successes.push(value),
            Err(message) => failures.push((id, message)),
        }
    }

    BatchOutcome { successes, failures }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_single_thread_overrides_everything() {
        let config = WorkerPoolConfig {
            max_workers: Some(8),
            force_single_thread: true,
        };
        assert_eq!(resolve_worker_count(&config), 1);
    }

    #[test]
    fn config_override_is_used_without_env_var() {
        std::env::remove_var(MAX_WORKERS_ENV_VAR);
        let config = WorkerPoolConfig {
            max_workers: Some(3),
            force_single_thread: false,
        };
        assert_eq!(resolve_worker_count(&config), 3);
    }

    #[test]
    fn batch_containment_keeps_successes_when_some_items_fail() {
        let pool = build_thread_pool(2).unwrap();
        let items = vec![1, 2, 3, 4, 5, 6];
        let outcome = run_batch(
            &pool,
            &items,
            |item| item.to_string(),
            |item| {
                if *item % 2 == 0 {
                    Ok(*item * 10)
                } else {
                    Err(format!("odd item {item} rejected"))
                }
            },
        );
        assert_eq!(outcome.successes.len(), 3);
        assert_eq!(outcome.failures.len(), 3);
        assert_eq!(outcome.attempted(), 6);
    }

    #[test]
    fn small_batches_run_serially_without_a_pool_panic() {
        let pool = build_thread_pool(1).unwrap();
        let items = vec![1, 2];
        let outcome = run_batch(&pool, &items, |i| i.to_string(), |i| Ok::<_, String>(*i));
        assert_eq!(outcome.successes.len(), 2);
    }
}
