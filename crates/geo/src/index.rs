//! GeoJSON basemap source parsing and tile intersection.
//!
//! A basemap source is a GeoJSON `FeatureCollection` where every tile is a
//! `Polygon` (or `MultiPolygon`) feature carrying two properties:
//!
//! ```json
//! { "id": [x, y, z], "url": "https://tiles.example.com/z/x/y.png" }
//! ```
//!
//! Features with any other geometry are ignored. A polygon feature without a
//! valid `id` or `url` rejects the entire file: a partial tile set would be
//! silently wrong, an error is not.

use crate::error::{ErrorKind, Result};
use crate::models::{Bounds, TileCoord, TileFeature};
use exn::{OptionExt, ResultExt};
use geo::{Coord, Intersects, LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

type Ring = Vec<Vec<f64>>;

#[derive(Deserialize)]
struct RawCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<RawFeature>,
}

#[derive(Deserialize)]
struct RawFeature {
    geometry: Option<RawGeometry>,
    #[serde(default)]
    properties: Option<RawProperties>,
}

#[derive(Deserialize)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: serde_json::Value,
}

#[derive(Deserialize)]
struct RawProperties {
    id: Option<[u32; 3]>,
    url: Option<String>,
}

/// Parsed tile features, ready for repeated intersection queries.
#[derive(Debug, Clone, Default)]
pub struct FeatureIndex {
    features: Vec<(TileFeature, MultiPolygon<f64>)>,
}

impl FeatureIndex {
    /// Parse a GeoJSON document.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let collection: RawCollection = serde_json::from_slice(bytes).or_raise(|| ErrorKind::Parse)?;
        if collection.kind != "FeatureCollection" {
            exn::bail!(ErrorKind::Parse);
        }
        let mut features = Vec::with_capacity(collection.features.len());
        for (index, feature) in collection.features.into_iter().enumerate() {
            let Some(geometry) = feature.geometry else {
                continue;
            };
            let Some(shape) = to_multi_polygon(index, geometry)? else {
                tracing::trace!(index, "skipping non-polygon feature");
                continue;
            };
            let properties = feature.properties.ok_or_raise(|| ErrorKind::InvalidFeature(index, "missing properties"))?;
            let [x, y, z] = properties.id.ok_or_raise(|| ErrorKind::InvalidFeature(index, "missing tile id"))?;
            let z = u8::try_from(z).or_raise(|| ErrorKind::InvalidFeature(index, "zoom out of range"))?;
            let url = properties.url.ok_or_raise(|| ErrorKind::InvalidFeature(index, "missing url"))?;
            features.push((TileFeature::new(TileCoord::new(z, x, y), url), shape));
        }
        tracing::debug!(tiles = features.len(), "parsed basemap features");
        Ok(Self { features })
    }

    /// Read and parse a GeoJSON file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        Self::parse(&bytes)
    }

    /// Number of tile features in the index.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Every tile whose geometry intersects (or touches) `bounds`.
    pub fn intersecting(&self, bounds: &Bounds) -> BTreeSet<TileFeature> {
        let rect = bounds.to_rect();
        self.features
            .iter()
            .filter(|(_, shape)| shape.intersects(&rect))
            .map(|(feature, _)| feature.clone())
            .collect()
    }
}

/// Tiles in the basemap source file at `path` that intersect `bounds`.
///
/// Blocking: call from [`spawn_blocking`](https://docs.rs/tokio/latest/tokio/task/fn.spawn_blocking.html)
/// in async code.
pub fn intersecting_tiles(bounds: &Bounds, path: impl AsRef<Path>) -> Result<BTreeSet<TileFeature>> {
    Ok(FeatureIndex::open(path)?.intersecting(bounds))
}

fn to_multi_polygon(index: usize, geometry: RawGeometry) -> Result<Option<MultiPolygon<f64>>> {
    let polygons = match geometry.kind.as_str() {
        "Polygon" => {
            let rings: Vec<Ring> = serde_json::from_value(geometry.coordinates)
                .or_raise(|| ErrorKind::InvalidFeature(index, "malformed polygon"))?;
            vec![to_polygon(index, rings)?]
        },
        "MultiPolygon" => {
            let parts: Vec<Vec<Ring>> = serde_json::from_value(geometry.coordinates)
                .or_raise(|| ErrorKind::InvalidFeature(index, "malformed multipolygon"))?;
            parts.into_iter().map(|rings| to_polygon(index, rings)).collect::<Result<Vec<_>>>()?
        },
        _ => return Ok(None),
    };
    Ok(Some(MultiPolygon::new(polygons)))
}

fn to_polygon(index: usize, rings: Vec<Ring>) -> Result<Polygon<f64>> {
    let mut rings = rings.into_iter().map(|ring| to_line_string(index, ring));
    let exterior = rings.next().ok_or_raise(|| ErrorKind::InvalidFeature(index, "polygon without rings"))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn to_line_string(index: usize, ring: Ring) -> Result<LineString<f64>> {
    ring.into_iter()
        .map(|position| match position.as_slice() {
            // Anything past (x, y) is altitude, which tiles don't care about.
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => exn::bail!(ErrorKind::InvalidFeature(index, "position needs two values")),
        })
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}
