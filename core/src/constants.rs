//! Constants shared by the store and the benchmark harness.

/// Smallest valid latitude, in degrees.
pub const MIN_LAT: f64 = -90.0;
/// Largest valid latitude, in degrees.
pub const MAX_LAT: f64 = 90.0;
/// Smallest valid longitude, in degrees.
pub const MIN_LON: f64 = -180.0;
/// Largest valid longitude, in degrees.
pub const MAX_LON: f64 = 180.0;

/// Record count at which synthetic coordinates cover the whole globe.
///
/// Smaller workloads are squeezed toward (0, 0) proportionally so that the
/// zoom queries still hit data.
pub const FULL_DISPERSION_COUNT: usize = 500_000;

/// Default synthetic workload size for `geobench random`.
pub const DEFAULT_NODE_COUNT: usize = 100;

/// Chunk size of the blob store, in bytes.
pub const CHUNK_SIZE: usize = 4096;

/// Query radius (degrees) of the nine-square grid, by web-map zoom level.
pub const ZOOM_16_RADIUS: f64 = 0.005;
pub const ZOOM_13_RADIUS: f64 = 0.044;
pub const ZOOM_11_RADIUS: f64 = 0.176;
