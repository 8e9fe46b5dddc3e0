//! The staged benchmark pipeline.
//!
//! A run is `insert` (random runs only), `index`, `centroid`, one
//! `<zoom>-query` per configured zoom level, `full-map-query`,
//! `replication`, then the synthetic `total`. Stages run strictly in order;
//! the first error ends the run and hands back the timings recorded so far.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use geo_core::types::GeoPoint;
use geo_store::{CounterSource, GeoDb, GeoStore, StoreError, StorePaths};
use rand::rngs::StdRng;
use serde::Serialize;

use crate::centroid::estimate_centroid;
use crate::config::BenchConfig;
use crate::error::{BenchError, RunFailure};
use crate::query::{full_map_query, nine_square};
use crate::replicate::{ReplicationDriver, ReplicationSummary};
use crate::timer::{PerfTimer, StageTiming, TOTAL_STAGE};
use crate::workload::insert_workload;

pub const INSERT_STAGE: &str = "insert";
pub const INDEX_STAGE: &str = "index";
pub const CENTROID_STAGE: &str = "centroid";
pub const FULL_MAP_STAGE: &str = "full-map-query";
pub const REPLICATION_STAGE: &str = "replication";

/// Observer of stage boundaries.
pub trait Progress {
    fn stage_started(&mut self, stage: &str);

    /// `detail` is a short stage-specific result, e.g. a record count.
    fn stage_finished(&mut self, timing: &StageTiming, detail: Option<&str>);
}

/// Progress observer that ignores everything.
pub struct NoProgress;

impl Progress for NoProgress {
    fn stage_started(&mut self, _stage: &str) {}

    fn stage_finished(&mut self, _timing: &StageTiming, _detail: Option<&str>) {}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RunSource {
    Random { nodes: usize },
    Dataset { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoomResult {
    pub label: String,
    pub radius: f64,
    pub count: u64,
}

/// Everything a successful run measured.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub source: RunSource,
    /// Stage timings in execution order; the last one is `total`.
    pub stages: Vec<StageTiming>,
    pub indexed: u64,
    pub centroid: GeoPoint,
    pub zoom_results: Vec<ZoomResult>,
    pub full_map_count: u64,
    pub replication: ReplicationSummary,
    /// Log entries held by the replica after replication.
    pub replica_entries: u64,
    pub replica_dir: PathBuf,
}

impl RunResult {
    pub fn total(&self) -> Option<&StageTiming> {
        self.stages.last().filter(|s| s.name == TOTAL_STAGE)
    }

    pub fn stage(&self, name: &str) -> Option<&StageTiming> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// Insert `config.node_count` random nodes into a fresh primary store and run
/// every stage against it.
pub fn run_random(
    config: &BenchConfig,
    progress: &mut dyn Progress,
) -> Result<RunResult, RunFailure> {
    let nodes = config.node_count;
    log::info!("Random run with {nodes} nodes in {}", config.work_dir.display());
    execute(
        config,
        config.primary_paths(),
        RunSource::Random { nodes },
        Some(config.rng()),
        progress,
    )
}

/// Run every stage but `insert` against an existing dataset. The dataset's
/// log is used in place; its index and chunk store are rebuilt under the
/// work directory.
pub fn run_dataset(
    dataset_dir: &Path,
    config: &BenchConfig,
    progress: &mut dyn Progress,
) -> Result<RunResult, RunFailure> {
    let dataset_log = StorePaths::under(dataset_dir).log;
    if !dataset_log.is_file() {
        return Err(RunFailure::new(
            BenchError::Config(format!("no dataset log at {}", dataset_log.display())),
            Vec::new(),
        ));
    }
    log::info!("Dataset run over {}", dataset_dir.display());
    execute(
        config,
        config.dataset_paths(dataset_dir),
        RunSource::Dataset {
            path: dataset_dir.to_path_buf(),
        },
        None,
        progress,
    )
}

fn execute(
    config: &BenchConfig,
    paths: StorePaths,
    source: RunSource,
    rng: Option<StdRng>,
    progress: &mut dyn Progress,
) -> Result<RunResult, RunFailure> {
    config
        .validate()
        .map_err(|e| RunFailure::new(e, Vec::new()))?;
    for dir in [config.primary_dir(), config.replica_dir()] {
        ensure_fresh(&dir).map_err(|e| RunFailure::new(e, Vec::new()))?;
    }
    let primary = open_store(paths, &config.primary_dir())
        .map_err(|e| RunFailure::new(e, Vec::new()))?;

    let mut pipeline = Pipeline::new(primary, config, progress);
    match pipeline.run(source, rng) {
        Ok(result) => Ok(result),
        Err(error) => {
            log::error!("Run aborted: {error}");
            Err(RunFailure::new(error, pipeline.timer.into_stages()))
        }
    }
}

/// Reject a store directory left behind by an earlier run.
///
/// A missing directory is fine; anything that is not a readable directory
/// is left for the store to report when it is opened.
fn ensure_fresh(dir: &Path) -> Result<(), BenchError> {
    let Ok(mut entries) = fs::read_dir(dir) else {
        return Ok(());
    };
    if entries.next().is_some() {
        return Err(BenchError::Config(format!(
            "{} is not empty; use a fresh work directory",
            dir.display()
        )));
    }
    Ok(())
}

fn open_store(paths: StorePaths, dir: &Path) -> Result<Arc<GeoDb>, BenchError> {
    GeoDb::open(paths)
        .map(Arc::new)
        .map_err(|source| BenchError::Store {
            path: dir.to_path_buf(),
            source,
        })
}

/// Map a failed readiness wait to the stage that was waiting.
fn wait_error(stage: &str, e: StoreError) -> BenchError {
    match e {
        StoreError::Timeout(after) => BenchError::Timeout {
            stage: stage.to_string(),
            after,
        },
        other => BenchError::Index(other),
    }
}

struct Pipeline<'a> {
    store: Arc<GeoDb>,
    config: &'a BenchConfig,
    progress: &'a mut dyn Progress,
    timer: PerfTimer,
}

impl<'a> Pipeline<'a> {
    fn new(store: Arc<GeoDb>, config: &'a BenchConfig, progress: &'a mut dyn Progress) -> Self {
        let timer = if config.io_counters {
            let counters: Arc<dyn CounterSource> = store.clone();
            PerfTimer::with_counters(counters)
        } else {
            PerfTimer::new()
        };
        Self {
            store,
            config,
            progress,
            timer,
        }
    }

    /// Time `work` as stage `name`. A failing stage is left out of the
    /// recorded timings.
    fn stage<T>(
        &mut self,
        name: &str,
        work: impl FnOnce(&Arc<GeoDb>) -> Result<T, BenchError>,
        detail: impl FnOnce(&T) -> String,
    ) -> Result<T, BenchError> {
        log::info!("Stage {name} started");
        self.progress.stage_started(name);
        self.timer.start(name)?;

        let value = work(&self.store)?;

        let timing = self.timer.end()?;
        let detail = detail(&value);
        log::info!("Stage {name} finished in {:.3} ms ({detail})", timing.millis());
        self.progress.stage_finished(&timing, Some(&detail));
        Ok(value)
    }

    fn run(&mut self, source: RunSource, rng: Option<StdRng>) -> Result<RunResult, BenchError> {
        let config = self.config;
        let timeout = config.stage_timeout;

        if let (RunSource::Random { nodes }, Some(mut rng)) = (&source, rng) {
            let nodes = *nodes;
            self.stage(
                INSERT_STAGE,
                |store| insert_workload(&**store, nodes, &mut rng),
                |n| n.to_string(),
            )?;
        }

        let indexed = self.stage(
            INDEX_STAGE,
            |store| {
                store.ready(timeout).map_err(|e| wait_error(INDEX_STAGE, e))?;
                store.len().map_err(BenchError::Index)
            },
            |n| n.to_string(),
        )?;

        let sample = config.centroid_sample;
        let centroid = self.stage(
            CENTROID_STAGE,
            |store| estimate_centroid(&**store, sample),
            |c| c.to_string(),
        )?;

        let mut zoom_results = Vec::with_capacity(config.zoom_levels.len());
        for level in &config.zoom_levels {
            let stage = level.stage_name();
            let count = self.stage(
                &stage,
                |store| nine_square(&**store, &stage, centroid, level.radius),
                |n| n.to_string(),
            )?;
            zoom_results.push(ZoomResult {
                label: level.label.clone(),
                radius: level.radius,
                count,
            });
        }

        let full_map_count = self.stage(
            FULL_MAP_STAGE,
            |store| full_map_query(&**store, FULL_MAP_STAGE),
            |n| n.to_string(),
        )?;

        let replica_dir = config.replica_dir();
        let replica_paths = config.replica_paths();
        let (replication, replica_entries) = self.stage(
            REPLICATION_STAGE,
            |store| replicate_into(store, replica_paths, &replica_dir, timeout),
            |(summary, _)| summary.to_string(),
        )?;

        let total = self.timer.total()?;
        log::info!("Run finished in {:.3} ms", total.millis());

        Ok(RunResult {
            source,
            stages: self.timer.stages().to_vec(),
            indexed,
            centroid,
            zoom_results,
            full_map_count,
            replication,
            replica_entries,
            replica_dir,
        })
    }
}

/// Open the replica and replicate the primary into it (and back).
fn replicate_into(
    primary: &Arc<GeoDb>,
    replica_paths: StorePaths,
    replica_dir: &Path,
    timeout: Option<Duration>,
) -> Result<(ReplicationSummary, u64), BenchError> {
    let replica = open_store(replica_paths, replica_dir)?;
    let mut driver = ReplicationDriver::new(timeout);
    let summary = driver.replicate(primary.clone(), replica.clone(), || {
        log::info!("Replication complete in both directions");
    })?;
    let entries = replica.log_len().map_err(BenchError::Replication)?;
    Ok((summary, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        started: Vec<String>,
        finished: Vec<(String, Option<String>)>,
    }

    impl Progress for Recorder {
        fn stage_started(&mut self, stage: &str) {
            self.started.push(stage.to_string());
        }

        fn stage_finished(&mut self, timing: &StageTiming, detail: Option<&str>) {
            self.finished
                .push((timing.name.clone(), detail.map(str::to_string)));
        }
    }

    fn small_config(dir: &TempDir) -> BenchConfig {
        let mut config = BenchConfig::new(dir.path());
        config.node_count = 20;
        config.seed = Some(11);
        config.stage_timeout = Some(Duration::from_secs(60));
        config
    }

    #[test]
    fn progress_sees_every_stage_in_order() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::default();
        let result = run_random(&small_config(&dir), &mut recorder).unwrap();

        let expected = [
            "insert",
            "index",
            "centroid",
            "zoom-16-query",
            "zoom-13-query",
            "zoom-11-query",
            "full-map-query",
            "replication",
        ];
        assert_eq!(recorder.started, expected);
        let finished: Vec<&str> = recorder.finished.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(finished, expected);
        assert_eq!(recorder.finished[0].1.as_deref(), Some("20"));
        assert_eq!(result.total().map(|t| t.name.as_str()), Some("total"));
    }

    #[test]
    fn io_counters_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let mut config = small_config(&dir);
        config.io_counters = false;
        let result = run_random(&config, &mut NoProgress).unwrap();
        assert!(result.stages.iter().all(|s| s.counters.is_empty()));
    }

    #[test]
    fn insert_stage_counts_log_writes() {
        let dir = TempDir::new().unwrap();
        let result = run_random(&small_config(&dir), &mut NoProgress).unwrap();
        let insert = result.stage("insert").unwrap();
        assert_eq!(insert.counter("log_writes"), Some(20));
    }

    #[test]
    fn invalid_config_fails_before_any_stage() {
        let dir = TempDir::new().unwrap();
        let mut config = small_config(&dir);
        config.zoom_levels.clear();
        let failure = run_random(&config, &mut NoProgress).unwrap_err();
        assert!(matches!(failure.error, BenchError::Config(_)));
        assert!(failure.completed.is_empty());
    }
}
