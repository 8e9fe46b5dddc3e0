//! Append-only geospatial store.
//!
//! A store instance is three parts located by [`StorePaths`]:
//! - [`changelog::ChangeLog`]: the append-only SQLite log of puts and deletes
//! - [`index::SpatialIndex`]: an SQLite R*Tree over the live documents
//! - [`chunk::ChunkStore`]: the chunked blob file holding document bodies
//!
//! [`GeoDb`] ties them together and implements the traits the benchmark
//! harness drives: [`GeoStore`], [`CounterSource`] and
//! [`replication::ReplicationEndpoint`].

pub mod changelog;
pub mod chunk;
pub mod db;
pub mod error;
pub mod index;
pub mod paths;
pub mod replication;

use std::time::Duration;

use geo_core::types::{BoundingBox, Node};

pub use changelog::BatchOp;
pub use db::{GeoDb, IoStats};
pub use error::{Result, StoreError};
pub use paths::StorePaths;
pub use replication::{ReplicationEndpoint, ReplicationMessage, ReplicationStats};

/// Lazy stream of range query results; the iterator ending is end-of-data.
pub type QueryStream<'a> = Box<dyn Iterator<Item = Result<Node>> + 'a>;

/// Write, readiness and range-query surface of a store instance.
pub trait GeoStore {
    /// Commit `ops` atomically, in order.
    fn batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// Block until every write committed so far is visible to queries.
    fn ready(&self, timeout: Option<Duration>) -> Result<()>;

    fn query(&self, bbox: BoundingBox) -> QueryStream<'_>;
}

/// Source of monotonically increasing engine counters.
pub trait CounterSource: Send + Sync {
    /// Current counter values, in reporting order. Names are unique.
    fn counter_snapshot(&self) -> Vec<(&'static str, u64)>;
}
