//! Zoom-level ("nine-square") and full-map range queries.

use geo_core::types::{BoundingBox, GeoPoint};
use geo_store::GeoStore;

use crate::error::BenchError;

/// The 3×3 grid of square tiles, half-width `radius`, centered on `center`.
///
/// Tile centers sit at `{lat-2d, lat, lat+2d} × {lon-2d, lon, lon+2d}`, so
/// neighbouring tiles share an edge. Rows run south to north, west to east
/// within a row.
pub fn nine_square_tiles(center: GeoPoint, radius: f64) -> [BoundingBox; 9] {
    let step = 2.0 * radius;
    std::array::from_fn(|i| {
        let row = (i / 3) as f64 - 1.0;
        let col = (i % 3) as f64 - 1.0;
        BoundingBox::around(
            GeoPoint::new(center.lat + row * step, center.lon + col * step),
            radius,
        )
    })
}

/// Sum of per-tile record counts over the nine tiles around `center`.
///
/// A record on a shared edge is counted once for every tile it falls in.
/// The first failing tile aborts the stage; later tiles are not queried.
pub fn nine_square(
    store: &dyn GeoStore,
    stage: &str,
    center: GeoPoint,
    radius: f64,
) -> Result<u64, BenchError> {
    let mut total = 0;
    for (i, tile) in nine_square_tiles(center, radius).into_iter().enumerate() {
        total += count_box(store, tile).map_err(|source| BenchError::Query {
            stage: stage.to_string(),
            target: format!("tile {} ({tile})", i + 1),
            source,
        })?;
    }
    log::debug!("{stage}: {total} records around {center}");
    Ok(total)
}

/// Count of every record on the map, drained without collecting.
pub fn full_map_query(store: &dyn GeoStore, stage: &str) -> Result<u64, BenchError> {
    let world = BoundingBox::world();
    count_box(store, world).map_err(|source| BenchError::Query {
        stage: stage.to_string(),
        target: format!("world ({world})"),
        source,
    })
}

fn count_box(store: &dyn GeoStore, bbox: BoundingBox) -> geo_store::Result<u64> {
    let mut count = 0;
    for row in store.query(bbox) {
        row?;
        count += 1;
    }
    Ok(count)
}
