//! Turning "make this area available offline" into tiles to download.
//!
//! A request goes through a fixed pipeline, one step after the other:
//!
//! 1. The area is stored as `PENDING`.
//! 2. The active project is resolved.
//! 3. Its basemap source file(s) are fetched.
//! 4. The tiles intersecting the area are computed from those files.
//! 5. The area (now `IN_PROGRESS`) and its tiles are stored in one go.
//! 6. The download scheduler is poked.
//!
//! The tile set is computed from scratch every time. Tiles shared with other
//! areas are never moved backwards: a tile already downloaded for one area
//! stays downloaded when another area asks for it.

use crate::error::{ErrorKind, Result};
use crate::project::ProjectSource;
use crate::recover::{log_and_complete, recover_with};
use crate::scheduler::TileDownloadScheduler;
use async_stream::stream;
use exn::{OptionExt, ResultExt};
use futures::{Stream, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tilesync_geo::{Bounds, TileCoord, TileFeature, intersecting_tiles};
use tilesync_source::{BaseMapSourceFetcher, Project};
use tilesync_store::error::{Error as StoreError, ErrorKind as StoreErrorKind};
use tilesync_store::{AreaState, OfflineArea, Repository, Tile, TileState};
use tokio::task::JoinHandle;
use tracing::instrument;

/// A request accepted by [`OfflineAreaCoordinator::request_area`].
#[derive(Debug)]
pub struct AreaRequest {
    /// ID of the newly created area.
    pub id: String,
    /// Completes once the request has been processed, successfully or not.
    /// Failures are logged, never returned.
    pub handle: JoinHandle<()>,
}

/// Entry point for offline areas.
#[derive(Clone)]
pub struct OfflineAreaCoordinator {
    repo: Repository,
    sources: BaseMapSourceFetcher,
    projects: Arc<dyn ProjectSource>,
    scheduler: Arc<dyn TileDownloadScheduler>,
}
impl OfflineAreaCoordinator {
    pub fn new(
        repo: Repository,
        sources: BaseMapSourceFetcher,
        projects: Arc<dyn ProjectSource>,
        scheduler: Arc<dyn TileDownloadScheduler>,
    ) -> Self {
        Self { repo, sources, projects, scheduler }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Ask for `bounds` to be made available offline.
    ///
    /// Returns straight away; the work happens on a spawned task. Must be
    /// called from within a tokio runtime.
    pub fn request_area(&self, bounds: Bounds) -> AreaRequest {
        let area = OfflineArea::pending(uuid::Uuid::new_v4().to_string(), bounds);
        let id = area.id.clone();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            log_and_complete(this.enqueue_pipeline(area), "offline area request").await;
        });
        AreaRequest { id, handle }
    }

    #[instrument("processing offline area request", skip_all, fields(area = %area.id))]
    async fn enqueue_pipeline(&self, area: OfflineArea) -> Result<()> {
        self.repo.insert_or_update_offline_area(&area).await.or_raise(|| ErrorKind::Store)?;
        let project = self.active_project().await?;
        let features = self.compute_tiles(&project, &area.bounds).await?;
        let tiles: Vec<Tile> = features.into_iter().map(Tile::from).collect();
        self.repo
            .enqueue_area(&area.with_state(AreaState::InProgress), &tiles)
            .await
            .or_raise(|| ErrorKind::Store)?;
        tracing::info!(project = %project.id, tiles = tiles.len(), "offline area enqueued");
        self.scheduler.enqueue_tile_download_worker().await.or_raise(|| ErrorKind::Scheduler)
    }

    /// The first project the project source emits.
    async fn active_project(&self) -> Result<Project> {
        let mut projects = self.projects.active_project_stream();
        projects.next().await.ok_or_raise(|| ErrorKind::Project)?.or_raise(|| ErrorKind::Project)
    }

    /// Fetch the project's basemap source(s) and find the tiles intersecting
    /// `bounds`, across all fetched files.
    async fn compute_tiles(&self, project: &Project, bounds: &Bounds) -> Result<BTreeSet<TileFeature>> {
        let files = self.sources.fetch(project).await.or_raise(|| ErrorKind::Source)?;
        let bounds = *bounds;
        tokio::task::spawn_blocking(move || -> tilesync_geo::error::Result<BTreeSet<TileFeature>> {
            let mut tiles = BTreeSet::new();
            for file in files {
                // Earlier sources win when two of them describe the same tile.
                tiles.extend(intersecting_tiles(&bounds, &file)?);
            }
            Ok(tiles)
        })
        .await
        .or_raise(|| ErrorKind::Index)?
        .or_raise(|| ErrorKind::Index)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Live list of all areas.
    pub fn list_areas(&self) -> impl Stream<Item = Result<Vec<OfflineArea>>> + Send + 'static {
        self.repo.offline_areas_stream().map(|areas| areas.or_raise(|| ErrorKind::Store))
    }

    /// Returns [`ErrorKind::NotFound`] if no area has that ID.
    pub async fn get_area(&self, id: &str) -> Result<OfflineArea> {
        self.repo.get_offline_area_by_id(id).await.map_err(|err| store_error(err, id))
    }

    /// Tiles linked to one area, whatever their state.
    pub async fn area_tiles(&self, id: &str) -> Result<BTreeSet<Tile>> {
        // An unknown area has no tiles; make that an error rather than an empty set.
        self.get_area(id).await?;
        self.repo.tiles_for_area(id).await.or_raise(|| ErrorKind::Store)
    }

    /// Live set of every downloaded tile.
    pub fn downloaded_tiles(&self) -> impl Stream<Item = Result<BTreeSet<Tile>>> + Send + 'static {
        self.repo.tiles_stream().map(|tiles| {
            tiles
                .map(|tiles| tiles.into_iter().filter(|t| t.state == TileState::Downloaded).collect())
                .or_raise(|| ErrorKind::Store)
        })
    }

    /// Live set of the downloaded tiles covering `area`.
    ///
    /// The area's tiles are recomputed from the basemap source whenever the
    /// active project changes. Any failure along the way ends the stream
    /// with an empty set.
    pub fn intersecting_downloaded_tiles(
        &self,
        area: &OfflineArea,
    ) -> impl Stream<Item = BTreeSet<Tile>> + Send + 'static {
        recover_with(self.clone().intersecting_downloaded_tiles_inner(area.bounds), BTreeSet::new())
    }

    fn intersecting_downloaded_tiles_inner(
        self,
        bounds: Bounds,
    ) -> impl Stream<Item = Result<BTreeSet<Tile>>> + Send + 'static {
        enum Next {
            Project(Option<Result<Project>>),
            Tiles(Option<Result<BTreeSet<Tile>>>),
        }

        stream! {
            let mut projects = self.projects.active_project_stream();
            let mut next_project = projects.next().await;
            let mut projects_open = true;
            while let Some(project) = next_project.take() {
                let project = match project {
                    Ok(project) => project,
                    Err(err) => {
                        yield Err(err);
                        return;
                    },
                };
                let wanted: BTreeSet<TileCoord> = match self.compute_tiles(&project, &bounds).await {
                    Ok(features) => features.into_iter().map(|f| f.coord).collect(),
                    Err(err) => {
                        yield Err(err);
                        return;
                    },
                };
                let mut downloaded = Box::pin(self.downloaded_tiles());
                // Follow the downloaded tiles until the project changes.
                while next_project.is_none() {
                    let next = tokio::select! {
                        project = projects.next(), if projects_open => Next::Project(project),
                        tiles = downloaded.next() => Next::Tiles(tiles),
                    };
                    match next {
                        Next::Project(Some(project)) => next_project = Some(project),
                        Next::Project(None) => projects_open = false,
                        Next::Tiles(Some(Ok(tiles))) => {
                            yield Ok(tiles.into_iter().filter(|t| wanted.contains(&t.coord)).collect());
                        },
                        Next::Tiles(Some(Err(err))) => {
                            yield Err(err);
                            return;
                        },
                        Next::Tiles(None) => return,
                    }
                }
            }
        }
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Delete an area and every tile no other area needs.
    ///
    /// Returns the deleted tiles; their files are the caller's to clean up.
    #[instrument("removing offline area", skip(self))]
    pub async fn remove_area(&self, id: &str) -> Result<Vec<Tile>> {
        let removed = self.repo.delete_offline_area(id).await.map_err(|err| store_error(err, id))?;
        tracing::info!(tiles = removed.len(), "offline area removed");
        Ok(removed)
    }
}

fn store_error(err: StoreError, id: &str) -> crate::error::Error {
    let not_found = matches!(&*err, StoreErrorKind::NotFound(_));
    match not_found {
        true => err.raise(ErrorKind::NotFound(id.to_string())),
        false => err.raise(ErrorKind::Store),
    }
}
