use super::{AreaState, OfflineArea};
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use tilesync_geo::Bounds;
use time::UtcDateTime;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AreaRow {
    pub(crate) id: String,
    pub(crate) south: f64,
    pub(crate) west: f64,
    pub(crate) north: f64,
    pub(crate) east: f64,
    pub(crate) state: i64,
    pub(crate) requested_at: i64,
}
impl From<&OfflineArea> for AreaRow {
    fn from(area: &OfflineArea) -> Self {
        Self {
            id: area.id.clone(),
            south: area.bounds.south(),
            west: area.bounds.west(),
            north: area.bounds.north(),
            east: area.bounds.east(),
            state: area.state.into(),
            requested_at: area.requested_at.unix_timestamp(),
        }
    }
}
impl TryFrom<AreaRow> for OfflineArea {
    type Error = Error;
    fn try_from(row: AreaRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            bounds: Bounds::from_edges(row.south, row.west, row.north, row.east),
            state: AreaState::try_from(row.state)?,
            requested_at: UtcDateTime::from_unix_timestamp(row.requested_at)
                .or_raise(|| ErrorKind::InvalidData("request date"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_to_model() {
        let requested = UtcDateTime::now();
        let row = AreaRow {
            id: "a1".to_string(),
            south: 1.0,
            west: 2.0,
            north: 3.0,
            east: 4.0,
            state: 1,
            requested_at: requested.unix_timestamp(),
        };
        let area = OfflineArea::try_from(row).unwrap();
        assert_eq!(area.state, AreaState::InProgress);
        assert_eq!(area.bounds, Bounds::from_edges(1.0, 2.0, 3.0, 4.0));
        // Unix timestamps are whole seconds.
        assert_eq!(area.requested_at, requested.replace_nanosecond(0).unwrap());
    }

    #[test]
    fn test_model_to_row() {
        let area = OfflineArea::pending("a1", Bounds::from_edges(1.0, 2.0, 3.0, 4.0));
        let row = AreaRow::from(&area);
        assert_eq!((row.south, row.west, row.north, row.east), (1.0, 2.0, 3.0, 4.0));
        assert_eq!(row.state, 0);
    }
}
