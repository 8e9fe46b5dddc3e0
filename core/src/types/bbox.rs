use serde::{Deserialize, Serialize};

use crate::constants::{MAX_LAT, MAX_LON, MIN_LAT, MIN_LON};
use crate::types::GeoPoint;

/// Latitude and longitude intervals, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// `[min, max]` latitude.
    pub lat: [f64; 2],
    /// `[min, max]` longitude.
    pub lon: [f64; 2],
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            lat: [min_lat, max_lat],
            lon: [min_lon, max_lon],
        }
    }

    /// The full valid extent of the globe.
    pub fn world() -> Self {
        Self::new(MIN_LAT, MAX_LAT, MIN_LON, MAX_LON)
    }

    /// Square box of half-width `radius` degrees centered on `center`.
    pub fn around(center: GeoPoint, radius: f64) -> Self {
        Self::new(
            center.lat - radius,
            center.lat + radius,
            center.lon - radius,
            center.lon + radius,
        )
    }

    pub fn min_lat(&self) -> f64 {
        self.lat[0]
    }

    pub fn max_lat(&self) -> f64 {
        self.lat[1]
    }

    pub fn min_lon(&self) -> f64 {
        self.lon[0]
    }

    pub fn max_lon(&self) -> f64 {
        self.lon[1]
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.lat[0] + self.lat[1]) / 2.0,
            (self.lon[0] + self.lon[1]) / 2.0,
        )
    }

    pub fn lat_span(&self) -> f64 {
        self.lat[1] - self.lat[0]
    }

    pub fn lon_span(&self) -> f64 {
        self.lon[1] - self.lon[0]
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat[0] && lat <= self.lat[1] && lon >= self.lon[0] && lon <= self.lon[1]
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lat [{}, {}] lon [{}, {}]",
            self.lat[0], self.lat[1], self.lon[0], self.lon[1]
        )
    }
}
