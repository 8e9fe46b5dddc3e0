use std::time::Duration;

use thiserror::Error;

/// Failures raised by the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to encode document: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode document: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("malformed log value: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid coordinates for key '{key}': ({lat}, {lon})")]
    InvalidCoordinates { key: String, lat: f64, lon: f64 },
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
    #[error("corrupt store: {0}")]
    Corrupt(String),
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
    #[error("indexer unavailable: {0}")]
    Indexer(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("replication: {0}")]
    Replication(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
