use geo_core::types::{BoundingBox, GeoPoint};
use geo_store::GeoStore;

use crate::error::BenchError;

/// Mean position of the first `sample` records of a whole-map query, or of
/// every record when `sample` is `None`.
///
/// An empty store has no centroid; the origin is returned so the zoom stages
/// can still run.
pub fn estimate_centroid(
    store: &dyn GeoStore,
    sample: Option<usize>,
) -> Result<GeoPoint, BenchError> {
    let limit = sample.unwrap_or(usize::MAX);

    let (mut lat_sum, mut lon_sum, mut count) = (0.0, 0.0, 0u64);
    for row in store.query(BoundingBox::world()).take(limit) {
        let node = row.map_err(BenchError::Scan)?;
        lat_sum += node.lat;
        lon_sum += node.lon;
        count += 1;
    }

    if count == 0 {
        log::warn!("Centroid scan found no records; using (0, 0)");
        return Ok(GeoPoint::default());
    }

    let centroid = GeoPoint::new(lat_sum / count as f64, lon_sum / count as f64);
    log::debug!("Centroid {centroid} from {count} records");
    Ok(centroid)
}
