//! geobench: staged benchmark of an append-only, replicated geospatial store.
//!
//! A run inserts (or loads) point nodes, waits for the spatial index, then
//! times centroid estimation, nine-square zoom queries, a full-map scan and
//! duplex replication into a second store.
//!
//! Modules:
//! - [`config`]: run configuration from defaults, environment and CLI
//! - [`timer`]: named-stage stopwatch with storage counter deltas
//! - [`workload`]: synthetic node generation and dataset writing
//! - [`centroid`] / [`query`]: the read stages
//! - [`replicate`]: the duplex replication driver
//! - [`orchestrator`]: the pipeline tying the stages together
//! - [`report`]: human-readable output

pub mod centroid;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod query;
pub mod replicate;
pub mod report;
pub mod timer;
pub mod workload;
