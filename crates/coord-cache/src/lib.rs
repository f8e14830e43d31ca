//! Content-addressed cache for stage S3 coordinate-transform output.
//!
//! One HDF5 file per cache key, written atomically (tmp + rename) into a
//! cache directory. Each file holds typed `float64` arrays for the cached
//! satellite's per-sample fields plus a fixed-width ASCII timestamp array,
//! so a cache hit is readable by any HDF5 tool, not just this crate's own
//! (de)serializer. File-level attributes carry the schema version, the
//! write time, and a merged S3 metadata blob as JSON text.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use frame_transform::TransformedState;
use hdf5::types::FixedAscii;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

/// Bumped whenever the on-disk layout changes incompatibly. A cache file
/// whose `schema_version` attribute doesn't match this is treated as a
/// miss, never as a hard error.
pub const SCHEMA_VERSION: u32 = 2;

/// Number of most-recently-written cache files retained before older ones
/// are evicted.
pub const DEFAULT_KEEP_RECENT: usize = 5;

/// Width of the fixed-length ASCII timestamp field, per spec.md §4.4.
const TIMESTAMP_FIELD_WIDTH: usize = 64;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
    #[error("cache payload (de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("timestamp '{0}' does not fit the {TIMESTAMP_FIELD_WIDTH}-byte ASCII cache field")]
    TimestampTooLong(String),
    #[error("cached timestamp '{0}' is not valid RFC3339")]
    TimestampParse(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Derive a stable cache key from the inputs that determine an S3 run's
/// output: which satellites, over what epoch range, sampled how. Only the
/// first/last samples of the first/last satellite (by sorted id) are
/// fingerprinted rather than every sample, trading a vanishingly small
/// collision risk for a key that's cheap to compute over large batches.
pub fn derive_cache_key(
    satellite_ids: &[String],
    epoch_start: DateTime<Utc>,
    epoch_end: DateTime<Utc>,
    first_satellite_bounds: ([f64; 3], [f64; 3]),
    last_satellite_bounds: ([f64; 3], [f64; 3]),
) -> String {
    let mut sorted_ids: Vec<&str> = satellite_ids.iter().map(String::as_str).collect();
    sorted_ids.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(sorted_ids.len().to_le_bytes());
    hasher.update(epoch_start.timestamp().to_le_bytes());
    hasher.update(epoch_end.timestamp().to_le_bytes());
    for v in [
        first_satellite_bounds.0,
        first_satellite_bounds.1,
        last_satellite_bounds.0,
        last_satellite_bounds.1,
    ] {
        for component in v {
            hasher.update(component.to_le_bytes());
        }
    }
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut s = String::with_capacity(chars);
    for b in bytes {
        if s.len() >= chars {
            break;
        }
        s.push_str(&format!("{:02x}", b));
    }
    s.truncate(chars);
    s
}

fn write_f64_array(file: &hdf5::File, name: &str, values: &[f64]) -> Result<()> {
    let dataset = file
        .new_dataset::<f64>()
        .deflate(9)
        .shape(values.len())
        .create(name)?;
    dataset.write_raw(values)?;
    Ok(())
}

fn read_f64_array(file: &hdf5::File, name: &str) -> Result<Vec<f64>> {
    Ok(file.dataset(name)?.read_raw()?)
}

fn write_timestamp_array(file: &hdf5::File, states: &[TransformedState]) -> Result<()> {
    let mut fixed = Vec::with_capacity(states.len());
    for state in states {
        let iso = state.timestamp.to_rfc3339();
        let value = FixedAscii::<TIMESTAMP_FIELD_WIDTH>::from_ascii(iso.as_bytes())
            .map_err(|_| CacheError::TimestampTooLong(iso))?;
        fixed.push(value);
    }
    let dataset = file
        .new_dataset::<FixedAscii<TIMESTAMP_FIELD_WIDTH>>()
        .deflate(9)
        .shape(fixed.len())
        .create("timestamp")?;
    dataset.write_raw(&fixed)?;
    Ok(())
}

fn read_timestamp_array(file: &hdf5::File) -> Result<Vec<DateTime<Utc>>> {
    let dataset = file.dataset("timestamp")?;
    let fixed: Vec<FixedAscii<TIMESTAMP_FIELD_WIDTH>> = dataset.read_raw()?;
    fixed
        .into_iter()
        .map(|v| {
            DateTime::parse_from_rfc3339(v.as_str())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| CacheError::TimestampParse(v.as_str().to_string()))
        })
        .collect()
}

/// One HDF5 file per key, holding one satellite's cached S3 output.
pub struct CoordCache {
    dir: PathBuf,
    keep_recent: usize,
}

impl CoordCache {
    pub fn new(dir: impl Into<PathBuf>, keep_recent: usize) -> Self {
        Self {
            dir: dir.into(),
            keep_recent,
        }
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.h5"))
    }

    /// Fetch the cached transformed states for `key`. Returns `Ok(None)` on
    /// a plain miss or a schema-version mismatch — a version bump should
    /// never be a hard failure for the caller, just a forced recompute.
    pub fn get(&self, key: &str) -> Result<Option<Vec<TransformedState>>> {
        let path = self.file_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let file = hdf5::File::open(&path)?;

        let schema_version: u32 = file
            .attr("schema_version")
            .and_then(|a| a.read_scalar())
            .unwrap_or(0);
        if schema_version != SCHEMA_VERSION {
            warn!(key, found = schema_version, expected = SCHEMA_VERSION, "cache entry schema mismatch, treating as miss");
            return Ok(None);
        }

        let lat = read_f64_array(&file, "lat_deg")?;
        let lon = read_f64_array(&file, "lon_deg")?;
        let alt_m = read_f64_array(&file, "alt_m")?;
        let accuracy_m = read_f64_array(&file, "accuracy_estimate_m")?;
        let icrs_x = read_f64_array(&file, "icrs_x_km")?;
        let icrs_y = read_f64_array(&file, "icrs_y_km")?;
        let icrs_z = read_f64_array(&file, "icrs_z_km")?;
        let ecef_x = read_f64_array(&file, "ecef_x_km")?;
        let ecef_y = read_f64_array(&file, "ecef_y_km")?;
        let ecef_z = read_f64_array(&file, "ecef_z_km")?;
        let vel_x = read_f64_array(&file, "velocity_ecef_x_km_s")?;
        let vel_y = read_f64_array(&file, "velocity_ecef_y_km_s")?;
        let vel_z = read_f64_array(&file, "velocity_ecef_z_km_s")?;
        let timestamps = read_timestamp_array(&file)?;

        let n = timestamps.len();
        let mut states = Vec::with_capacity(n);
        for i in 0..n {
            states.push(TransformedState {
                timestamp: timestamps[i],
                icrs_km: [icrs_x[i], icrs_y[i], icrs_z[i]],
                ecef_km: [ecef_x[i], ecef_y[i], ecef_z[i]],
                velocity_ecef_km_s: [vel_x[i], vel_y[i], vel_z[i]],
                lat_deg: lat[i],
                lon_deg: lon[i],
                alt_km: alt_m[i] / 1000.0,
                accuracy_estimate_m: accuracy_m[i],
            });
        }
        Ok(Some(states))
    }

    /// Store `states` under `key`, via a temp file + rename so concurrent
    /// readers never observe a partially written cache file.
    pub fn put(&self, key: &str, satellite_id: &str, states: &[TransformedState], metadata: &JsonValue) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let tmp_path = self.dir.join(format!("{key}.h5.tmp"));
        if tmp_path.exists() {
            std::fs::remove_file(&tmp_path)?;
        }

        {
            let file = hdf5::File::create(&tmp_path)?;

            let lat: Vec<f64> = states.iter().map(|s| s.lat_deg).collect();
            let lon: Vec<f64> = states.iter().map(|s| s.lon_deg).collect();
            let alt_m: Vec<f64> = states.iter().map(|s| s.alt_km * 1000.0).collect();
            let accuracy_m: Vec<f64> = states.iter().map(|s| s.accuracy_estimate_m).collect();
            write_f64_array(&file, "lat_deg", &lat)?;
            write_f64_array(&file, "lon_deg", &lon)?;
            write_f64_array(&file, "alt_m", &alt_m)?;
            write_f64_array(&file, "accuracy_estimate_m", &accuracy_m)?;

            write_f64_array(&file, "icrs_x_km", &states.iter().map(|s| s.icrs_km[0]).collect::<Vec<_>>())?;
            write_f64_array(&file, "icrs_y_km", &states.iter().map(|s| s.icrs_km[1]).collect::<Vec<_>>())?;
            write_f64_array(&file, "icrs_z_km", &states.iter().map(|s| s.icrs_km[2]).collect::<Vec<_>>())?;
            write_f64_array(&file, "ecef_x_km", &states.iter().map(|s| s.ecef_km[0]).collect::<Vec<_>>())?;
            write_f64_array(&file, "ecef_y_km", &states.iter().map(|s| s.ecef_km[1]).collect::<Vec<_>>())?;
            write_f64_array(&file, "ecef_z_km", &states.iter().map(|s| s.ecef_km[2]).collect::<Vec<_>>())?;
            write_f64_array(
                &file,
                "velocity_ecef_x_km_s",
                &states.iter().map(|s| s.velocity_ecef_km_s[0]).collect::<Vec<_>>(),
            )?;
            write_f64_array(
                &file,
                "velocity_ecef_y_km_s",
                &states.iter().map(|s| s.velocity_ecef_km_s[1]).collect::<Vec<_>>(),
            )?;
            write_f64_array(
                &file,
                "velocity_ecef_z_km_s",
                &states.iter().map(|s| s.velocity_ecef_km_s[2]).collect::<Vec<_>>(),
            )?;
            write_timestamp_array(&file, states)?;

            file.new_attr::<u32>().create("schema_version")?.write_scalar(&SCHEMA_VERSION)?;
            let created_at = Utc::now().timestamp();
            file.new_attr::<i64>().create("created_at_unix")?.write_scalar(&created_at)?;

            let merged_metadata = merge_satellite_id(metadata, satellite_id);
            let metadata_json = serde_json::to_string(&merged_metadata)?;
            file.new_attr::<hdf5::types::VarLenAscii>()
                .create("metadata_json")?
                .write_scalar(&hdf5::types::VarLenAscii::from_ascii(metadata_json.as_bytes())?)?;
        }

        std::fs::rename(&tmp_path, self.file_path(key))?;
        self.evict_old_files()
    }

    /// Keep only the `keep_recent` most-recently-written cache files in the
    /// directory, to bound disk usage across repeated pipeline runs.
    fn evict_old_files(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        let mut files: Vec<(PathBuf, std::time::SystemTime)> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("h5"))
            .filter_map(|path| {
                let modified = std::fs::metadata(&path).ok()?.modified().ok()?;
                Some((path, modified))
            })
            .collect();

        if files.len() <= self.keep_recent {
            return Ok(());
        }

        files.sort_by_key(|(_, modified)| *modified);
        let evict_count = files.len() - self.keep_recent;
        for (path, _) in files.into_iter().take(evict_count) {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn merge_satellite_id(metadata: &JsonValue, satellite_id: &str) -> JsonValue {
    let mut merged = metadata.clone();
    if let JsonValue::Object(map) = &mut merged {
        map.insert("satellite_id".to_string(), JsonValue::String(satellite_id.to_string()));
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_states() -> Vec<TransformedState> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..3)
            .map(|i| TransformedState {
                timestamp: t0 + chrono::Duration::seconds(60 * i),
                icrs_km: [7000.0 + i as f64, 0.0, 0.0],
                ecef_km: [7000.0 + i as f64, 1.0, 2.0],
                velocity_ecef_km_s: [0.1, 7.5, 0.0],
                lat_deg: 10.0 + i as f64,
                lon_deg: 20.0 + i as f64,
                alt_km: 550.0,
                accuracy_estimate_m: 0.5,
            })
            .collect()
    }

    #[test]
    fn cache_key_is_stable_and_order_independent() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let bounds = ([1.0, 2.0, 3.0], [4.0, 5.0, 6.0]);

        let key_a = derive_cache_key(&["sat-b".to_string(), "sat-a".to_string()], start, end, bounds, bounds);
        let key_b = derive_cache_key(&["sat-a".to_string(), "sat-b".to_string()], start, end, bounds, bounds);
        assert_eq!(key_a, key_b);
        assert_eq!(key_a.len(), 16);
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CoordCache::new(dir.path(), DEFAULT_KEEP_RECENT);
        let states = sample_states();
        let metadata = serde_json::json!({"accuracy_model": "bowring"});
        cache.put("abc123", "sat-1", &states, &metadata).unwrap();

        let fetched = cache.get("abc123").unwrap().unwrap();
        assert_eq!(fetched.len(), states.len());
        for (a, b) in fetched.iter().zip(states.iter()) {
            assert!((a.lat_deg - b.lat_deg).abs() < 1e-9);
            assert!((a.lon_deg - b.lon_deg).abs() < 1e-9);
            assert!((a.alt_km - b.alt_km).abs() < 1e-6);
            assert_eq!(a.timestamp.timestamp(), b.timestamp.timestamp());
        }
    }

    #[test]
    fn get_on_missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CoordCache::new(dir.path(), DEFAULT_KEEP_RECENT);
        assert!(cache.get("nope").unwrap().is_none());
    }

    #[test]
    fn eviction_keeps_only_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CoordCache::new(dir.path(), 2);
        let states = sample_states();
        for i in 0..4 {
            cache.put(&format!("key{i}"), "sat-1", &states, &serde_json::json!({})).unwrap();
        }
        let remaining = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().and_then(|x| x.to_str()) == Some("h5"))
            .count();
        assert!(remaining <= 2);
    }
}
