//! Data types shared by the store and the benchmark harness.

mod bbox;
mod node;

pub use bbox::BoundingBox;
pub use node::{GeoPoint, Node, NodeKind};
