//! Synthetic workload: uniformly dispersed point nodes.

use std::path::Path;
use std::time::Duration;

use geo_core::constants::{FULL_DISPERSION_COUNT, MAX_LAT, MAX_LON};
use geo_core::types::Node;
use geo_store::{BatchOp, GeoDb, GeoStore, StorePaths};
use rand::Rng;

use crate::error::BenchError;

/// Fraction of the globe the workload spreads over: `min(1, n / 500000)`.
///
/// Small workloads are packed around (0, 0) so that the zoom queries around
/// the centroid still find something.
pub fn dispersion_ratio(n: usize) -> f64 {
    (n as f64 / FULL_DISPERSION_COUNT as f64).min(1.0)
}

/// `n` nodes with lat in `[-90r, 90r)` and lon in `[-180r, 180r)`.
pub fn generate_nodes(n: usize, rng: &mut impl Rng) -> Vec<Node> {
    let r = dispersion_ratio(n);
    let (lat_max, lon_max) = (MAX_LAT * r, MAX_LON * r);
    (0..n)
        .map(|_| {
            if r == 0.0 {
                return Node::point(0.0, 0.0);
            }
            Node::point(rng.gen_range(-lat_max..lat_max), rng.gen_range(-lon_max..lon_max))
        })
        .collect()
}

/// Puts keyed `"0"` to `"n-1"` in generation order.
pub fn workload_batch(nodes: Vec<Node>) -> Vec<BatchOp> {
    nodes
        .into_iter()
        .enumerate()
        .map(|(i, node)| BatchOp::put(i.to_string(), node))
        .collect()
}

/// Generate `n` nodes and commit them to `store` in a single batch.
pub fn insert_workload(
    store: &dyn GeoStore,
    n: usize,
    rng: &mut impl Rng,
) -> Result<usize, BenchError> {
    let ops = workload_batch(generate_nodes(n, rng));
    log::debug!("Inserting {n} nodes in one batch");
    store.batch(ops).map_err(BenchError::BatchWrite)?;
    Ok(n)
}

/// Write a reusable dataset of `n` nodes into `dir` and wait for it to be
/// indexed.
pub fn generate_dataset(
    dir: &Path,
    n: usize,
    rng: &mut impl Rng,
    timeout: Option<Duration>,
) -> Result<StorePaths, BenchError> {
    let paths = StorePaths::under(dir);
    let store = GeoDb::open(paths.clone()).map_err(|source| BenchError::Store {
        path: dir.to_path_buf(),
        source,
    })?;
    insert_workload(&store, n, rng)?;
    store.ready(timeout).map_err(BenchError::Index)?;
    log::info!("Wrote {n} nodes to {}", dir.display());
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_within(nodes: &[Node], r: f64) {
        for node in nodes {
            assert!(node.lat >= -90.0 * r && node.lat < 90.0 * r, "lat {}", node.lat);
            assert!(node.lon >= -180.0 * r && node.lon < 180.0 * r, "lon {}", node.lon);
        }
    }

    #[test]
    fn ratio_scales_then_saturates() {
        assert_eq!(dispersion_ratio(0), 0.0);
        assert_eq!(dispersion_ratio(250_000), 0.5);
        assert_eq!(dispersion_ratio(500_000), 1.0);
        assert_eq!(dispersion_ratio(500_001), 1.0);
    }

    #[test]
    fn small_workload_stays_in_scaled_box() {
        let mut rng = StdRng::seed_from_u64(1);
        let nodes = generate_nodes(1000, &mut rng);
        assert_eq!(nodes.len(), 1000);
        assert_within(&nodes, dispersion_ratio(1000));
    }

    #[test]
    fn large_workload_covers_whole_globe_bounds() {
        let mut rng = StdRng::seed_from_u64(2);
        let nodes = generate_nodes(500_001, &mut rng);
        assert_within(&nodes, 1.0);
        assert!(nodes.iter().all(Node::is_valid));
        assert!(nodes.iter().any(|n| n.lat.abs() > 80.0));
    }

    #[test]
    fn same_seed_same_workload() {
        let a = generate_nodes(50, &mut StdRng::seed_from_u64(9));
        let b = generate_nodes(50, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn batch_keys_are_sequential() {
        let ops = workload_batch(vec![Node::point(0.0, 0.0); 3]);
        let keys: Vec<&str> = ops
            .iter()
            .map(|op| match op {
                BatchOp::Put { key, .. } => key.as_str(),
                BatchOp::Del { key } => key.as_str(),
            })
            .collect();
        assert_eq!(keys, ["0", "1", "2"]);
    }
}
