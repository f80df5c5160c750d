//! Basemap feature index.
//!
//! Parses a downloaded basemap source (a GeoJSON feature collection where
//! each feature is one map tile) and answers a single question: which tiles
//! intersect a given rectangular area?

pub mod error;
mod index;
pub mod models;

pub use crate::index::{FeatureIndex, intersecting_tiles};
pub use crate::models::{Bounds, Coordinate, TileCoord, TileFeature};
