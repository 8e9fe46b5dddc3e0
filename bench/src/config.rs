//! Run configuration.
//!
//! Defaults come from [`BenchConfig::new`]; [`BenchConfig::from_env`] overlays
//! `GEOBENCH_*` environment variables (a `.env` file in the working directory
//! is loaded first). The CLI applies its flags on top of that.
//!
//! | Variable                   | Field             |
//! |----------------------------|-------------------|
//! | `GEOBENCH_NODES`           | `node_count`      |
//! | `GEOBENCH_SEED`            | `seed`            |
//! | `GEOBENCH_TIMEOUT_SECS`    | `stage_timeout`   |
//! | `GEOBENCH_CENTROID_SAMPLE` | `centroid_sample` |
//! | `GEOBENCH_IO_COUNTERS`     | `io_counters`     |
//! | `GEOBENCH_REPLICA_DIR`     | `replica_dir`     |

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use geo_core::constants::{DEFAULT_NODE_COUNT, ZOOM_11_RADIUS, ZOOM_13_RADIUS, ZOOM_16_RADIUS};
use geo_store::StorePaths;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::error::BenchError;

/// Records read by the centroid pass unless configured otherwise.
pub const DEFAULT_CENTROID_SAMPLE: usize = 10_000;

/// One nine-square query radius.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoomLevel {
    pub label: String,
    /// Half-width of each tile, in degrees.
    pub radius: f64,
}

impl ZoomLevel {
    pub fn new(label: impl Into<String>, radius: f64) -> Self {
        Self {
            label: label.into(),
            radius,
        }
    }

    /// Zoom 16, 13 and 11 of a web map, most local first.
    pub fn default_ladder() -> Vec<Self> {
        vec![
            Self::new("zoom-16", ZOOM_16_RADIUS),
            Self::new("zoom-13", ZOOM_13_RADIUS),
            Self::new("zoom-11", ZOOM_11_RADIUS),
        ]
    }

    pub fn stage_name(&self) -> String {
        format!("{}-query", self.label)
    }
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Root under which the run's stores are created.
    pub work_dir: PathBuf,
    /// Location of the replication target. Defaults to `work_dir/replica`.
    pub replica_dir: Option<PathBuf>,
    /// Synthetic records inserted by a random run.
    pub node_count: usize,
    /// Seed for the workload RNG; entropy when unset.
    pub seed: Option<u64>,
    pub zoom_levels: Vec<ZoomLevel>,
    /// Records read by the centroid pass; every record when unset.
    pub centroid_sample: Option<usize>,
    /// Bound on index readiness and replication waits.
    pub stage_timeout: Option<Duration>,
    /// Record storage counter deltas per stage.
    pub io_counters: bool,
}

impl BenchConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            replica_dir: None,
            node_count: DEFAULT_NODE_COUNT,
            seed: None,
            zoom_levels: ZoomLevel::default_ladder(),
            centroid_sample: Some(DEFAULT_CENTROID_SAMPLE),
            stage_timeout: None,
            io_counters: true,
        }
    }

    /// Defaults overlaid with `GEOBENCH_*` variables from the process
    /// environment and `.env`.
    pub fn from_env(work_dir: impl Into<PathBuf>) -> Result<Self, BenchError> {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(work_dir, |key| env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable.
    pub fn from_lookup(
        work_dir: impl Into<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, BenchError> {
        let mut config = Self::new(work_dir);

        if let Some(n) = parse_var::<usize>(&lookup, "GEOBENCH_NODES")? {
            config.node_count = n;
        }
        if let Some(seed) = parse_var::<u64>(&lookup, "GEOBENCH_SEED")? {
            config.seed = Some(seed);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "GEOBENCH_TIMEOUT_SECS")? {
            config.stage_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(sample) = parse_var::<usize>(&lookup, "GEOBENCH_CENTROID_SAMPLE")? {
            config.centroid_sample = (sample > 0).then_some(sample);
        }
        if let Some(enabled) = parse_var::<bool>(&lookup, "GEOBENCH_IO_COUNTERS")? {
            config.io_counters = enabled;
        }
        if let Some(dir) = lookup("GEOBENCH_REPLICA_DIR").filter(|s| !s.is_empty()) {
            config.replica_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.zoom_levels.is_empty() {
            return Err(BenchError::Config("at least one zoom level is required".into()));
        }
        for (i, level) in self.zoom_levels.iter().enumerate() {
            if !(level.radius.is_finite() && level.radius > 0.0) {
                return Err(BenchError::Config(format!(
                    "zoom level '{}' has invalid radius {}",
                    level.label, level.radius
                )));
            }
            if self.zoom_levels[..i].iter().any(|l| l.label == level.label) {
                return Err(BenchError::Config(format!(
                    "zoom level '{}' is listed twice",
                    level.label
                )));
            }
        }
        if self.centroid_sample == Some(0) {
            return Err(BenchError::Config("centroid sample must be > 0".into()));
        }
        Ok(())
    }

    pub fn primary_dir(&self) -> PathBuf {
        self.work_dir.join("primary")
    }

    pub fn replica_dir(&self) -> PathBuf {
        self.replica_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("replica"))
    }

    pub fn primary_paths(&self) -> StorePaths {
        StorePaths::under(self.primary_dir())
    }

    /// Existing dataset log with a fresh index and chunk store in the work
    /// directory.
    pub fn dataset_paths(&self, dataset_dir: &Path) -> StorePaths {
        StorePaths::for_dataset(dataset_dir, self.primary_dir())
    }

    pub fn replica_paths(&self) -> StorePaths {
        StorePaths::under(self.replica_dir())
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, BenchError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| BenchError::Config(format!("{key}={raw} is not a valid value"))),
        _ => Ok(None),
    }
}
