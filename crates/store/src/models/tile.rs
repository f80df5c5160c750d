use super::{Tile, TileState};
use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};
use std::path::PathBuf;
use tilesync_geo::TileCoord;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TileRow {
    pub(crate) id: String,
    pub(crate) url: String,
    pub(crate) path: String,
    pub(crate) state: i64,
}
impl TryFrom<&Tile> for TileRow {
    type Error = Error;
    fn try_from(tile: &Tile) -> Result<Self, Self::Error> {
        Ok(Self {
            id: tile.key(),
            url: tile.url.clone(),
            path: tile.path.to_str().ok_or_raise(|| ErrorKind::InvalidData("tile path"))?.to_string(),
            state: tile.state.into(),
        })
    }
}
impl TryFrom<TileRow> for Tile {
    type Error = Error;
    fn try_from(row: TileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            coord: row.id.parse::<TileCoord>().or_raise(|| ErrorKind::InvalidData("tile key"))?,
            url: row.url,
            path: PathBuf::from(row.path),
            state: TileState::try_from(row.state)?,
        })
    }
}
