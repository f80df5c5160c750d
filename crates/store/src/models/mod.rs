mod area;
mod tile;

pub(crate) use self::area::AreaRow;
pub(crate) use self::tile::TileRow;
use crate::error::{Error, ErrorKind};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use tilesync_geo::{Bounds, TileCoord, TileFeature};
use time::UtcDateTime;

/// Lifecycle of an offline area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum AreaState {
    #[display("pending")]
    Pending,
    #[display("in progress")]
    InProgress,
    #[display("downloaded")]
    Downloaded,
    #[display("failed")]
    Failed,
}
impl From<AreaState> for i64 {
    fn from(state: AreaState) -> Self {
        match state {
            AreaState::Pending => 0,
            AreaState::InProgress => 1,
            AreaState::Downloaded => 2,
            AreaState::Failed => 3,
        }
    }
}
impl TryFrom<i64> for AreaState {
    type Error = Error;
    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Pending,
            1 => Self::InProgress,
            2 => Self::Downloaded,
            3 => Self::Failed,
            _ => exn::bail!(ErrorKind::InvalidData("area state")),
        })
    }
}

/// Download state of a single tile.
///
/// The stored value doubles as a progress rank: an upsert may only move a
/// tile to a state of higher rank, never back down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum TileState {
    #[display("pending")]
    Pending,
    #[display("failed")]
    Failed,
    #[display("in progress")]
    InProgress,
    #[display("downloaded")]
    Downloaded,
}
impl TileState {
    pub fn rank(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Failed => 1,
            Self::InProgress => 2,
            Self::Downloaded => 3,
        }
    }
}
impl From<TileState> for i64 {
    fn from(state: TileState) -> Self {
        state.rank()
    }
}
impl TryFrom<i64> for TileState {
    type Error = Error;
    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Pending,
            1 => Self::Failed,
            2 => Self::InProgress,
            3 => Self::Downloaded,
            _ => exn::bail!(ErrorKind::InvalidData("tile state")),
        })
    }
}

/// A user-selected region to make available offline.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineArea {
    pub id: String,
    pub bounds: Bounds,
    pub state: AreaState,
    pub requested_at: UtcDateTime,
}
impl OfflineArea {
    /// A freshly requested area, not yet processed.
    pub fn pending(id: impl Into<String>, bounds: Bounds) -> Self {
        Self { id: id.into(), bounds, state: AreaState::Pending, requested_at: UtcDateTime::now() }
    }

    pub fn with_state(self, state: AreaState) -> Self {
        Self { state, ..self }
    }
}

/// A map tile tracked for offline use.
///
/// Identity is the tile coordinate alone: two `Tile` values for the same
/// coordinate compare equal whatever their state or URL.
#[derive(Debug, Clone)]
pub struct Tile {
    pub coord: TileCoord,
    pub url: String,
    /// Location relative to the tiles directory.
    pub path: PathBuf,
    pub state: TileState,
}
impl Tile {
    pub fn new(coord: TileCoord, url: impl Into<String>, state: TileState) -> Self {
        Self { coord, url: url.into(), path: coord.path(), state }
    }

    /// The tile's key, `z/x/y`.
    pub fn key(&self) -> String {
        self.coord.to_string()
    }

    pub fn with_state(self, state: TileState) -> Self {
        Self { state, ..self }
    }
}
impl From<TileFeature> for Tile {
    fn from(feature: TileFeature) -> Self {
        Self::new(feature.coord, feature.url, TileState::Pending)
    }
}
impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.coord, self.state)
    }
}
impl PartialEq for Tile {
    fn eq(&self, other: &Self) -> bool {
        self.coord == other.coord
    }
}
impl Eq for Tile {}
impl PartialOrd for Tile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Tile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.coord.cmp(&other.coord)
    }
}
impl Hash for Tile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.coord.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_tile_state_rank_order() {
        assert!(TileState::Pending < TileState::Failed);
        assert!(TileState::Failed < TileState::InProgress);
        assert!(TileState::InProgress < TileState::Downloaded);
    }

    #[rstest]
    #[case(TileState::Pending)]
    #[case(TileState::Failed)]
    #[case(TileState::InProgress)]
    #[case(TileState::Downloaded)]
    fn test_tile_state_storage_value(#[case] state: TileState) {
        assert_eq!(TileState::try_from(i64::from(state)).unwrap(), state);
    }

    #[rstest]
    #[case(-1)]
    #[case(4)]
    fn test_invalid_states(#[case] value: i64) {
        assert!(matches!(&*TileState::try_from(value).unwrap_err(), ErrorKind::InvalidData(_)));
        assert!(matches!(&*AreaState::try_from(value).unwrap_err(), ErrorKind::InvalidData(_)));
    }

    #[test]
    fn test_tile_from_feature_is_pending() {
        let tile = Tile::from(TileFeature::new(TileCoord::new(3, 1, 2), "https://t.example.com/3/1/2.png"));
        assert_eq!(tile.state, TileState::Pending);
        assert_eq!(tile.path, PathBuf::from("3/1/2"));
        assert_eq!(tile.key(), "3/1/2");
    }

    #[test]
    fn test_tile_identity_ignores_state() {
        let a = Tile::new(TileCoord::new(1, 0, 0), "u", TileState::Pending);
        let b = a.clone().with_state(TileState::Downloaded);
        assert_eq!(a, b);
    }
}
