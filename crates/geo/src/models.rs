//! Geographic value types shared by every crate in the workspace.

use geo::{Coord, Rect};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::str::FromStr;

/// A point on the globe, in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}
impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}
impl From<Coordinate> for Coord<f64> {
    fn from(c: Coordinate) -> Self {
        // GeoJSON (and `geo`) order positions as (x = longitude, y = latitude).
        Coord { x: c.longitude, y: c.latitude }
    }
}

/// A rectangular geographic region.
///
/// Regions crossing the antimeridian are not supported; `west` must be less
/// than `east` for the rectangle to mean what the caller expects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub south_west: Coordinate,
    pub north_east: Coordinate,
}
impl Bounds {
    pub fn new(south_west: Coordinate, north_east: Coordinate) -> Self {
        Self { south_west, north_east }
    }

    /// Build bounds from the four edges, in the order maps usually print them.
    pub fn from_edges(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self::new(Coordinate::new(south, west), Coordinate::new(north, east))
    }

    pub fn south(&self) -> f64 {
        self.south_west.latitude
    }

    pub fn west(&self) -> f64 {
        self.south_west.longitude
    }

    pub fn north(&self) -> f64 {
        self.north_east.latitude
    }

    pub fn east(&self) -> f64 {
        self.north_east.longitude
    }

    /// The bounds as a planar rectangle for intersection tests.
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(Coord::from(self.south_west), Coord::from(self.north_east))
    }
}

/// Slippy-map tile address.
///
/// The key form `z/x/y` (see [`Display`](fmt::Display)) is the global
/// identity of a tile: two areas needing the same tile share one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}
impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Relative path a downloaded tile is stored under.
    pub fn path(&self) -> PathBuf {
        [self.z.to_string(), self.x.to_string(), self.y.to_string()].iter().collect()
    }
}
impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Returned when a tile key isn't of the form `z/x/y`.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("invalid tile key")]
pub struct InvalidTileKey;

impl FromStr for TileCoord {
    type Err = InvalidTileKey;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let (Some(z), Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
            return Err(InvalidTileKey);
        };
        Ok(Self {
            z: z.parse().map_err(|_| InvalidTileKey)?,
            x: x.parse().map_err(|_| InvalidTileKey)?,
            y: y.parse().map_err(|_| InvalidTileKey)?,
        })
    }
}

/// A tile advertised by a basemap source file.
///
/// Equality and ordering only consider the [`TileCoord`], so a set of
/// features never holds the same tile twice.
#[derive(Debug, Clone)]
pub struct TileFeature {
    pub coord: TileCoord,
    pub url: String,
}
impl TileFeature {
    pub fn new(coord: TileCoord, url: impl Into<String>) -> Self {
        Self { coord, url: url.into() }
    }
}
impl PartialEq for TileFeature {
    fn eq(&self, other: &Self) -> bool {
        self.coord == other.coord
    }
}
impl Eq for TileFeature {}
impl PartialOrd for TileFeature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TileFeature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.coord.cmp(&other.coord)
    }
}
impl Hash for TileFeature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.coord.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::Path;

    #[test]
    fn test_bounds_to_rect() {
        let rect = Bounds::from_edges(-1.0, -2.0, 3.0, 4.0).to_rect();
        assert_eq!(rect.min(), Coord { x: -2.0, y: -1.0 });
        assert_eq!(rect.max(), Coord { x: 4.0, y: 3.0 });
    }

    #[test]
    fn test_bounds_to_rect_normalizes_corners() {
        // Swapped corners still describe the same rectangle.
        let rect = Bounds::from_edges(3.0, 4.0, -1.0, -2.0).to_rect();
        assert_eq!(rect.min(), Coord { x: -2.0, y: -1.0 });
    }

    #[test]
    fn test_tile_key() {
        let coord = TileCoord::new(10, 512, 511);
        assert_eq!(coord.to_string(), "10/512/511");
        assert_eq!("10/512/511".parse::<TileCoord>().unwrap(), coord);
        assert_eq!(coord.path(), Path::new("10/512/511"));
    }

    #[rstest]
    #[case("")]
    #[case("10/512")]
    #[case("10/512/511/1")]
    #[case("256/1/1")]
    #[case("a/b/c")]
    #[case("10/-1/0")]
    fn test_invalid_tile_key(#[case] key: &str) {
        assert_eq!(key.parse::<TileCoord>(), Err(InvalidTileKey));
    }

    #[test]
    fn test_feature_identity_is_coord() {
        let a = TileFeature::new(TileCoord::new(1, 0, 0), "https://a.example.com/1/0/0.png");
        let b = TileFeature::new(TileCoord::new(1, 0, 0), "https://b.example.com/1/0/0.png");
        assert_eq!(a, b);
        let set: std::collections::BTreeSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }
}
