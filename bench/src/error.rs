use std::path::PathBuf;
use std::time::Duration;

use geo_store::StoreError;
use thiserror::Error;

use crate::timer::StageTiming;

/// Why a benchmark stage (or the run set-up) failed. Every variant is fatal
/// to the run.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("batch write failed: {0}")]
    BatchWrite(#[source] StoreError),
    #[error("index did not become ready: {0}")]
    Index(#[source] StoreError),
    #[error("centroid scan failed: {0}")]
    Scan(#[source] StoreError),
    #[error("{stage} failed on {target}: {source}")]
    Query {
        stage: String,
        target: String,
        #[source]
        source: StoreError,
    },
    #[error("replication failed: {0}")]
    Replication(#[source] StoreError),
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: String, after: Duration },
    #[error("failed to open store at {}: {source}", .path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// A run that stopped early: the fatal error plus the stages that had
/// finished before it.
#[derive(Debug, Error)]
#[error("benchmark aborted: {error}")]
pub struct RunFailure {
    #[source]
    pub error: BenchError,
    pub completed: Vec<StageTiming>,
}

impl RunFailure {
    pub fn new(error: BenchError, completed: Vec<StageTiming>) -> Self {
        Self { error, completed }
    }
}
