use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_LAT, MAX_LON, MIN_LAT, MIN_LON};

/// Discriminant of a stored geo entity.
///
/// Only point nodes are generated by the benchmark; the variant is still
/// written into every document so that datasets produced elsewhere decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Node,
}

/// A geotagged point record as written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub lat: f64,
    pub lon: f64,
}

impl Node {
    pub fn point(lat: f64, lon: f64) -> Self {
        Self {
            kind: NodeKind::Node,
            lat,
            lon,
        }
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lon: self.lon,
        }
    }

    /// True when both coordinates lie inside the valid degree ranges.
    pub fn is_valid(&self) -> bool {
        (MIN_LAT..=MAX_LAT).contains(&self.lat) && (MIN_LON..=MAX_LON).contains(&self.lon)
    }
}

/// A (lat, lon) pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_json_uses_type_tag() {
        let json = serde_json::to_string(&Node::point(1.5, -2.25)).unwrap();
        assert_eq!(json, r#"{"type":"node","lat":1.5,"lon":-2.25}"#);

        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Node::point(1.5, -2.25));
    }

    #[test]
    fn validity_checks_both_axes() {
        assert!(Node::point(90.0, -180.0).is_valid());
        assert!(!Node::point(90.5, 0.0).is_valid());
        assert!(!Node::point(0.0, 180.01).is_valid());
    }
}
