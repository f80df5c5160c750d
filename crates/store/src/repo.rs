//! Repository for offline areas and the tiles they need.
//!
//! Areas and tiles are many-to-many: overlapping areas share tile records, so
//! a tile downloaded for one area is immediately available to every other
//! area that covers it. Tiles are only deleted when the last area referencing
//! them goes away.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{AreaRow, OfflineArea, Tile, TileRow, TileState};
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::sync::Arc;
use tilesync_geo::TileCoord;
use tokio::sync::watch;

/// Repository for managing offline areas and tiles in the store database.
///
/// Every committed write bumps a change counter shared by all repositories
/// created from the same [`Database`]; the `*_stream` methods re-run their
/// query whenever it moves.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
    changes: Arc<watch::Sender<u64>>,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone(), changes: db.changes() }
    }
}
impl Repository {
    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Emit the result of `query` now, and again after every committed write.
    ///
    /// A failing query is emitted once and then ends the stream.
    fn live<T, F, Fut>(&self, query: F) -> impl Stream<Item = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: Fn(Repository) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send,
    {
        let repo = self.clone();
        let mut changes = self.changes.subscribe();
        stream! {
            loop {
                // Anything written from here on must trigger another pass.
                drop(changes.borrow_and_update());
                match query(repo.clone()).await {
                    Ok(value) => yield Ok(value),
                    Err(err) => {
                        yield Err(err);
                        return;
                    },
                }
                if changes.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    // =========================================================================
    // Offline areas
    // =========================================================================

    /// Insert an area, or replace the bounds and state of an existing one.
    ///
    /// The original request time of an existing area is kept.
    pub async fn insert_or_update_offline_area(&self, area: &OfflineArea) -> Result<()> {
        let row = AreaRow::from(area);
        sqlx::query(include_str!("../queries/upsert_area.sql"))
            .bind(row.id)
            .bind(row.south)
            .bind(row.west)
            .bind(row.north)
            .bind(row.east)
            .bind(row.state)
            .bind(row.requested_at)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        self.notify();
        Ok(())
    }

    /// Get an area by ID.
    ///
    /// Returns [`ErrorKind::NotFound`] if no area has that ID.
    pub async fn get_offline_area_by_id(&self, id: impl AsRef<str>) -> Result<OfflineArea> {
        let id = id.as_ref();
        let row: Option<AreaRow> = sqlx::query_as(include_str!("../queries/get_area_by_id.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        match row {
            Some(row) => row.try_into(),
            None => exn::bail!(ErrorKind::NotFound(id.to_string())),
        }
    }

    /// All areas, oldest request first.
    pub async fn list_offline_areas(&self) -> Result<Vec<OfflineArea>> {
        let rows: Vec<AreaRow> = sqlx::query_as(include_str!("../queries/list_areas.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(OfflineArea::try_from).collect()
    }

    /// Live list of all areas.
    pub fn offline_areas_stream(&self) -> impl Stream<Item = Result<Vec<OfflineArea>>> + Send + 'static {
        self.live(|repo| async move { repo.list_offline_areas().await })
    }

    /// Delete an area along with every tile no other area references.
    ///
    /// Returns the deleted tiles so their files can be cleaned up. Returns
    /// [`ErrorKind::NotFound`] if no area has that ID.
    pub async fn delete_offline_area(&self, id: impl AsRef<str>) -> Result<Vec<Tile>> {
        let id = id.as_ref();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let orphans: Vec<TileRow> = sqlx::query_as(include_str!("../queries/list_tiles_orphaned_by_area.sql"))
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let deleted = sqlx::query(include_str!("../queries/delete_area.sql"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if deleted.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            exn::bail!(ErrorKind::NotFound(id.to_string()));
        }
        for orphan in &orphans {
            sqlx::query(include_str!("../queries/delete_tile.sql"))
                .bind(&orphan.id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        self.notify();
        tracing::debug!(area = id, tiles = orphans.len(), "deleted offline area");
        orphans.into_iter().map(Tile::try_from).collect()
    }

    // =========================================================================
    // Tiles
    // =========================================================================

    /// Insert a tile, or move an existing one to `tile.state`.
    ///
    /// An existing tile is only updated when the new state ranks above its
    /// current one (see [`TileState`]); a request can never undo progress.
    pub async fn insert_or_update_tile(&self, tile: &Tile) -> Result<()> {
        let row = TileRow::try_from(tile)?;
        sqlx::query(include_str!("../queries/upsert_tile.sql"))
            .bind(row.id)
            .bind(row.url)
            .bind(row.path)
            .bind(row.state)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        self.notify();
        Ok(())
    }

    /// Move a tile from `expected` to `new`, only if it is still in `expected`.
    ///
    /// Returns whether the transition happened.
    pub async fn compare_and_set_tile_state(
        &self,
        coord: TileCoord,
        expected: TileState,
        new: TileState,
    ) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/compare_and_set_tile_state.sql"))
            .bind(i64::from(new))
            .bind(coord.to_string())
            .bind(i64::from(expected))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let changed = result.rows_affected() > 0;
        if changed {
            self.notify();
        }
        Ok(changed)
    }

    /// All known tiles.
    pub async fn list_tiles(&self) -> Result<BTreeSet<Tile>> {
        let rows: Vec<TileRow> = sqlx::query_as(include_str!("../queries/list_tiles.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Tile::try_from).collect()
    }

    /// Live set of all known tiles.
    pub fn tiles_stream(&self) -> impl Stream<Item = Result<BTreeSet<Tile>>> + Send + 'static {
        self.live(|repo| async move { repo.list_tiles().await })
    }

    /// Tiles currently in any of `states`.
    pub async fn tiles_in_states(&self, states: &[TileState]) -> Result<BTreeSet<Tile>> {
        let mut tiles = BTreeSet::new();
        for state in states {
            let rows: Vec<TileRow> = sqlx::query_as(include_str!("../queries/list_tiles_in_state.sql"))
                .bind(i64::from(*state))
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
            for row in rows {
                tiles.insert(Tile::try_from(row)?);
            }
        }
        Ok(tiles)
    }

    /// Tiles linked to one area.
    pub async fn tiles_for_area(&self, id: impl AsRef<str>) -> Result<BTreeSet<Tile>> {
        let rows: Vec<TileRow> = sqlx::query_as(include_str!("../queries/list_tiles_for_area.sql"))
            .bind(id.as_ref())
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Tile::try_from).collect()
    }

    // =========================================================================
    // Combined
    // =========================================================================

    /// Record an area as in progress along with the tiles it needs.
    ///
    /// Everything happens in one transaction: the area is upserted, every
    /// tile is upserted (rank-guarded, exactly like
    /// [`insert_or_update_tile`](Self::insert_or_update_tile)) and linked to
    /// the area. Either all of it lands or none of it does.
    pub async fn enqueue_area<'a>(
        &self,
        area: &OfflineArea,
        tiles: impl IntoIterator<Item = &'a Tile>,
    ) -> Result<()> {
        let area_row = AreaRow::from(area);
        let tile_rows = tiles.into_iter().map(TileRow::try_from).collect::<Result<Vec<_>>>()?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/upsert_area.sql"))
            .bind(&area_row.id)
            .bind(area_row.south)
            .bind(area_row.west)
            .bind(area_row.north)
            .bind(area_row.east)
            .bind(area_row.state)
            .bind(area_row.requested_at)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for row in &tile_rows {
            sqlx::query(include_str!("../queries/upsert_tile.sql"))
                .bind(&row.id)
                .bind(&row.url)
                .bind(&row.path)
                .bind(row.state)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            sqlx::query(include_str!("../queries/link_area_tile.sql"))
                .bind(&area_row.id)
                .bind(&row.id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        self.notify();
        tracing::debug!(area = %area_row.id, tiles = tile_rows.len(), "enqueued offline area");
        Ok(())
    }
}
